//! SASL PLAIN over AUTHENTICATE.
//!
//! Two steps: mechanism selection (`AUTHENTICATE PLAIN` -> `AUTHENTICATE +`),
//! then base64 data frames. A 400-byte frame means continuation; a shorter
//! frame (or lone `+`) terminates the payload. The decoded payload is
//! `authzid\0authcid\0passphrase`.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use rook_proto::{Message, Numeric};

use crate::error::HandlerResult;
use crate::events::{
    topic, CommandHandler, CommandRegistry, CommandSpec, Event, EventBus, EventHandler, EventInfo,
};
use crate::security::password;
use crate::state::{ClientRef, ServerContext};

/// One AUTHENTICATE data frame.
const CHUNK_LEN: usize = 400;
/// Four continuation frames, then the payload is oversized.
const MAX_BUFFER_LEN: usize = CHUNK_LEN * 4;

pub fn register(commands: &mut CommandRegistry, events: &mut EventBus) {
    commands.register(
        "AUTHENTICATE",
        CommandSpec::new(1, Box::new(AuthenticateHandler)).allow_unregistered(),
    );
    events.register(
        "sasl authenticate plain",
        1,
        Box::new(SaslPlainVerifier),
    );
    events.register(topic::CLIENT_CONNECT, 1, Box::new(SaslAbortOnRegister));
}

fn fail(cli: &Arc<ClientRef>) {
    cli.send_numeric(Numeric::ERR_SASLFAIL, vec!["SASL authentication failed".into()]);
}

/// End the exchange and let registration proceed.
async fn finish(ctx: &Arc<ServerContext>, cli: &Arc<ClientRef>) {
    {
        let mut state = cli.state.write();
        state.sasl_mechanism = None;
        state.sasl_buffer.clear();
    }
    if cli.release_registration_lock(&["SASL"]) {
        ctx.try_register(cli).await;
    }
}

struct AuthenticateHandler;

#[async_trait]
impl CommandHandler for AuthenticateHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let arg = msg.params[0].clone();

        if arg == "*" {
            let in_flight = cli.state.read().sasl_mechanism.is_some();
            if in_flight {
                cli.send_numeric(
                    Numeric::ERR_SASLABORTED,
                    vec!["SASL authentication aborted".into()],
                );
            } else {
                fail(cli);
            }
            finish(ctx, cli).await;
            return Ok(());
        }

        let in_flight = cli.state.read().sasl_mechanism.is_some();
        if !in_flight {
            // mechanism selection
            let mechanism = arg.to_ascii_uppercase();
            if mechanism == "PLAIN" {
                {
                    let mut state = cli.state.write();
                    state.sasl_mechanism = Some(mechanism);
                    state.sasl_buffer.clear();
                }
                cli.push_registration_lock(&["SASL"]);
                cli.send_verb("AUTHENTICATE", vec!["+".into()]);
            } else {
                fail(cli);
            }
            return Ok(());
        }

        // data frames
        if arg.len() > CHUNK_LEN {
            cli.send_numeric(
                Numeric::ERR_SASLTOOLONG,
                vec!["SASL message too long".into()],
            );
            finish(ctx, cli).await;
            return Ok(());
        }
        if arg.len() == CHUNK_LEN {
            let overflow = {
                let mut state = cli.state.write();
                state.sasl_buffer.push_str(&arg);
                state.sasl_buffer.len() > MAX_BUFFER_LEN
            };
            if overflow {
                cli.send_numeric(
                    Numeric::ERR_SASLFAIL,
                    vec!["SASL authentication failed: Password too long".into()],
                );
                finish(ctx, cli).await;
            }
            return Ok(());
        }

        let (mechanism, payload) = {
            let mut state = cli.state.write();
            if arg != "+" {
                state.sasl_buffer.push_str(&arg);
            }
            (
                state.sasl_mechanism.clone().unwrap_or_default(),
                std::mem::take(&mut state.sasl_buffer),
            )
        };

        let data = match base64::engine::general_purpose::STANDARD.decode(&payload) {
            Ok(data) => data,
            Err(_) => {
                fail(cli);
                return Ok(());
            }
        };

        ctx.events
            .emit(
                ctx,
                &format!("sasl authenticate {}", mechanism.to_ascii_lowercase()),
                Event::SaslAuthenticate {
                    source: cli.id,
                    mechanism,
                    data,
                },
            )
            .await;
        Ok(())
    }
}

struct SaslPlainVerifier;

#[async_trait]
impl EventHandler for SaslPlainVerifier {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        let Event::SaslAuthenticate { source, data, .. } = &info.payload else {
            return Ok(());
        };
        let Some(cli) = ctx.client(*source) else {
            return Ok(());
        };

        let mut parts = data.split(|b| *b == 0);
        let (authzid, authcid, passphrase) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(z), Some(c), Some(p), None) => (
                String::from_utf8_lossy(z).into_owned(),
                String::from_utf8_lossy(c).into_owned(),
                String::from_utf8_lossy(p).into_owned(),
            ),
            _ => {
                fail(&cli);
                finish(ctx, &cli).await;
                return Ok(());
            }
        };

        let authzid = if authzid.is_empty() { authcid.clone() } else { authzid };

        let record = ctx.store.get(&authcid)?;
        let verified = match &record {
            Some(record) if record.verified && authzid == authcid => {
                match &record.credentials.passphrase {
                    Some(hash) => password::verify(passphrase, hash.clone()).await,
                    None => false,
                }
            }
            _ => false,
        };

        if !verified {
            fail(&cli);
            finish(ctx, &cli).await;
            return Ok(());
        }

        let account = record.map(|r| r.account).unwrap_or(authcid);
        cli.state.write().account = Some(account.clone());
        ctx.events
            .emit(
                ctx,
                topic::ACCOUNT_CHANGE,
                Event::AccountChange {
                    source: cli.id,
                    account: Some(account.clone()),
                },
            )
            .await;

        cli.send_numeric(
            Numeric::RPL_LOGGEDIN,
            vec![
                cli.hostmask_or_star(),
                account.clone(),
                format!("You are now logged in as {account}"),
            ],
        );
        cli.send_numeric(
            Numeric::RPL_SASLSUCCESS,
            vec!["SASL authentication successful".into()],
        );
        finish(ctx, &cli).await;
        Ok(())
    }
}

/// A registration that completes mid-exchange aborts the exchange.
struct SaslAbortOnRegister;

#[async_trait]
impl EventHandler for SaslAbortOnRegister {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        if let Event::ClientConnect { client } = &info.payload {
            if let Some(cli) = ctx.client(*client) {
                let in_flight = cli.state.read().sasl_mechanism.is_some();
                if in_flight {
                    {
                        let mut state = cli.state.write();
                        state.sasl_mechanism = None;
                        state.sasl_buffer.clear();
                    }
                    cli.send_numeric(
                        Numeric::ERR_SASLABORTED,
                        vec!["SASL authentication aborted".into()],
                    );
                }
            }
        }
        Ok(())
    }
}
