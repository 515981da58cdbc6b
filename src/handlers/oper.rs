//! Operator commands: OPER and KILL.

use std::sync::Arc;

use async_trait::async_trait;
use rook_proto::{casefold_eq, matches_hostmask, Message, Numeric};
use subtle::ConstantTimeEq;

use crate::error::HandlerResult;
use crate::events::{CommandHandler, CommandRegistry, CommandSpec};
use crate::security::password;
use crate::state::{ClientRef, ServerContext};

pub fn register(commands: &mut CommandRegistry) {
    commands.register("OPER", CommandSpec::new(2, Box::new(OperHandler)));
    commands.register("KILL", CommandSpec::new(2, Box::new(KillHandler)));
}

struct OperHandler;

#[async_trait]
impl CommandHandler for OperHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let name = &msg.params[0];
        let supplied = msg.params[1].clone();
        let hostmask = cli.hostmask_or_star();

        // No block admits this host at all: say so without consuming a name.
        if !ctx
            .conf
            .oper
            .iter()
            .any(|block| matches_hostmask(&block.hostmask, &hostmask))
        {
            cli.send_numeric(
                Numeric::ERR_NOOPERHOST,
                vec!["No O-lines for your host".into()],
            );
            return Ok(());
        }

        // From here on, every failure is an indistinguishable 464.
        let mut authed = None;
        if let Some(block) = ctx.conf.oper.iter().find(|b| &b.name == name) {
            let pass_ok = match &block.scheme {
                Some(_) => password::verify(supplied, block.password.clone()).await,
                None => {
                    supplied.len() == block.password.len()
                        && bool::from(supplied.as_bytes().ct_eq(block.password.as_bytes()))
                }
            };
            if pass_ok && matches_hostmask(&block.hostmask, &hostmask) {
                authed = Some(block.role.clone());
            }
        }

        match authed {
            Some(role) => {
                {
                    let mut state = cli.state.write();
                    state.role = Some(role);
                    state.props.insert("special:oper", true);
                }
                cli.send_numeric(
                    Numeric::RPL_YOUREOPER,
                    vec!["You are now an IRC operator".into()],
                );
            }
            None => {
                cli.send_numeric(
                    Numeric::ERR_PASSWDMISMATCH,
                    vec!["Password incorrect".into()],
                );
            }
        }
        Ok(())
    }
}

struct KillHandler;

#[async_trait]
impl CommandHandler for KillHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        msg: &Message,
    ) -> HandlerResult {
        let target = &msg.params[0];
        let reason = &msg.params[1];

        let allowed = {
            let state = cli.state.read();
            state
                .role
                .as_deref()
                .and_then(|r| ctx.roles.get(r))
                .is_some_and(|role| role.has_capability("oper:local_kill"))
        };
        if !allowed {
            cli.send_numeric(Numeric::ERR_NOPRIVILEGES, vec!["Permission Denied".into()]);
            return Ok(());
        }

        if casefold_eq(target, ctx.server_name()) {
            cli.send_numeric(
                Numeric::ERR_CANTKILLSERVER,
                vec![target.clone(), "You can't kill a server!".into()],
            );
            return Ok(());
        }

        let Some(victim) = ctx.client_by_nick(target) else {
            cli.send_numeric(
                Numeric::ERR_NOSUCHNICK,
                vec![target.clone(), "No such nick/channel".into()],
            );
            return Ok(());
        };

        ctx.kill_client(cli, &victim, reason).await;
        Ok(())
    }
}
