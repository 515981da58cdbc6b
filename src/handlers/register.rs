//! REG: account creation and verification.
//!
//! `REG CREATE <account> <callback> [cred-type] <credential>` and
//! `REG VERIFY <account> <code>`. The `*` callback creates a pre-verified
//! account and is only accepted when no callback namespaces are configured;
//! `mailto:` hands the verification code to the callback observer (the SMTP
//! transport is an external collaborator; the observer is the boundary).

use std::sync::Arc;

use async_trait::async_trait;
use rook_proto::{casefold, Message, Numeric};

use crate::error::HandlerResult;
use crate::events::{
    topic, CommandHandler, CommandRegistry, CommandSpec, Event, EventBus, EventHandler, EventInfo,
};
use crate::security::{codes_match, generate_auth_code, password};
use crate::store::{AccountRecord, Credentials};
use crate::state::{ClientRef, ServerContext};

pub fn register(commands: &mut CommandRegistry, events: &mut EventBus) {
    commands.register(
        "REG",
        CommandSpec::new(3, Box::new(RegHandler)).allow_unregistered(),
    );
    events.register("reg callback mailto", 1, Box::new(MailtoCallback));
}

/// Log the client in after creation or verification.
async fn log_in(ctx: &Arc<ServerContext>, cli: &Arc<ClientRef>, account: &str) {
    cli.state.write().account = Some(account.to_string());
    ctx.events
        .emit(
            ctx,
            topic::ACCOUNT_CHANGE,
            Event::AccountChange {
                source: cli.id,
                account: Some(account.to_string()),
            },
        )
        .await;
    cli.send_numeric(
        Numeric::RPL_LOGGEDIN,
        vec![
            cli.hostmask_or_star(),
            account.to_string(),
            format!("You are now logged in as {account}"),
        ],
    );
    cli.send_numeric(
        Numeric::RPL_SASLSUCCESS,
        vec!["Authentication successful".into()],
    );
}

struct RegHandler;

#[async_trait]
impl CommandHandler for RegHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        if !ctx.conf.register.enabled {
            cli.send_numeric(
                Numeric::ERR_REGUNAVAILABLE,
                vec!["Account registration is disabled".into()],
            );
            return Ok(());
        }

        match msg.params[0].to_ascii_lowercase().as_str() {
            "create" => handle_create(ctx, cli, msg).await,
            "verify" => handle_verify(ctx, cli, msg).await,
            other => {
                cli.send_numeric(
                    Numeric::ERR_UNKNOWNERROR,
                    vec!["REG".into(), other.into(), "Unknown subcommand".into()],
                );
                Ok(())
            }
        }
    }
}

async fn handle_create(
    ctx: &Arc<ServerContext>,
    cli: &Arc<ClientRef>,
    msg: &Message,
) -> HandlerResult {
    let account = casefold(&msg.params[1]);
    let now = ctx.now();

    if let Some(existing) = ctx.store.get(&account)? {
        let pending_window = now - existing.registered_ts < ctx.conf.register.verify_timeout_secs;
        if existing.verified || pending_window {
            cli.send_numeric(
                Numeric::ERR_ACCOUNTEXISTS,
                vec![account, "Account already exists".into()],
            );
            return Ok(());
        }
        // expired unverified reservation; the name frees up
        ctx.store.delete(&account)?;
    }

    let raw_callback = casefold(&msg.params[2]);
    let (namespace, callback) = if raw_callback == "*" {
        ("*".to_string(), None)
    } else if let Some((ns, rest)) = raw_callback.split_once(':') {
        (ns.to_string(), Some(rest.to_string()))
    } else {
        ("mailto".to_string(), Some(raw_callback.clone()))
    };

    let namespace_ok = namespace == "*"
        || ctx.conf.register.callbacks.iter().any(|cb| cb == &namespace);
    if !namespace_ok {
        cli.send_numeric(
            Numeric::ERR_REGINVALIDCALLBACK,
            vec![account, namespace, "Callback token is invalid".into()],
        );
        return Ok(());
    }

    let (cred_type, credential) = match (msg.params.get(3), msg.params.get(4)) {
        (Some(cred_type), Some(credential)) => (cred_type.to_ascii_lowercase(), credential.clone()),
        (Some(credential), None) => ("passphrase".to_string(), credential.clone()),
        _ => {
            cli.send_numeric(
                Numeric::ERR_NEEDMOREPARAMS,
                vec!["REG".into(), "Not enough parameters".into()],
            );
            return Ok(());
        }
    };
    if cred_type != "passphrase" {
        cli.send_numeric(
            Numeric::ERR_REGINVALIDCREDTYPE,
            vec![account, cred_type, "Credential type is invalid".into()],
        );
        return Ok(());
    }

    let passphrase_hash = password::hash(credential).await?;

    if namespace == "*" {
        // no-verify path: only valid while no callbacks are configured
        if !ctx.conf.register.callbacks.is_empty() {
            cli.send_numeric(
                Numeric::ERR_REGINVALIDCALLBACK,
                vec![account, "*".into(), "Callback token is invalid".into()],
            );
            return Ok(());
        }
        ctx.store.put(&AccountRecord {
            account: account.clone(),
            credentials: Credentials {
                passphrase: Some(passphrase_hash),
            },
            registered_ts: now,
            registered_by: cli.hostmask_or_star(),
            verified: true,
            auth_code: None,
        })?;
        cli.send_numeric(
            Numeric::RPL_REGISTERED,
            vec![account.clone(), "Account created".into()],
        );
        log_in(ctx, cli, &account).await;
        return Ok(());
    }

    let auth_code = generate_auth_code();
    ctx.store.put(&AccountRecord {
        account: account.clone(),
        credentials: Credentials {
            passphrase: Some(passphrase_hash),
        },
        registered_ts: now,
        registered_by: cli.hostmask_or_star(),
        verified: false,
        auth_code: Some(auth_code.clone()),
    })?;

    cli.send_numeric(
        Numeric::RPL_VERIFICATIONREQUIRED,
        vec![account.clone(), "Account created, pending verification".into()],
    );
    ctx.events
        .emit(
            ctx,
            &format!("reg callback {namespace}"),
            Event::RegCallback {
                source: cli.id,
                account,
                namespace,
                callback,
                auth_code,
            },
        )
        .await;
    Ok(())
}

async fn handle_verify(
    ctx: &Arc<ServerContext>,
    cli: &Arc<ClientRef>,
    msg: &Message,
) -> HandlerResult {
    let account = casefold(&msg.params[1]);
    let code = &msg.params[2];

    let Some(mut record) = ctx.store.get(&account)? else {
        cli.send_numeric(
            Numeric::ERR_BADVERIFYCODE,
            vec![account, "Invalid verification code".into()],
        );
        return Ok(());
    };
    if record.verified {
        cli.send_numeric(
            Numeric::ERR_ACCOUNTEXISTS,
            vec![account, "Account already exists".into()],
        );
        return Ok(());
    }
    let matches = record
        .auth_code
        .as_deref()
        .is_some_and(|expected| codes_match(expected, code));
    if !matches {
        cli.send_numeric(
            Numeric::ERR_BADVERIFYCODE,
            vec![account, "Invalid verification code".into()],
        );
        return Ok(());
    }

    record.verified = true;
    record.auth_code = None;
    ctx.store.put(&record)?;

    cli.send_numeric(
        Numeric::RPL_VERIFIED,
        vec![account.clone(), "Account verification successful".into()],
    );
    log_in(ctx, cli, &account).await;
    Ok(())
}

/// The SMTP transport lives outside the core; the observer logs the intent
/// and hands the code to whatever delivery mechanism the operator wires up.
struct MailtoCallback;

#[async_trait]
impl EventHandler for MailtoCallback {
    async fn handle(&self, _ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        if let Event::RegCallback {
            account, callback, ..
        } = &info.payload
        {
            tracing::info!(
                account = %account,
                callback = callback.as_deref().unwrap_or("-"),
                "verification code queued for mailto callback"
            );
        }
        Ok(())
    }
}
