//! Server queries: MOTD, VERSION, INFO.

use std::sync::Arc;

use async_trait::async_trait;
use rook_proto::{Message, Numeric};

use crate::error::HandlerResult;
use crate::events::{CommandHandler, CommandRegistry, CommandSpec};
use crate::state::context::VERSION;
use crate::state::{ClientRef, ServerContext};

const INFO_LINES: &[&str] = &[
    "rookd - Rook IRC Daemon",
    "A single-node ircd speaking RFC 1459 with IRCv3.2 capability negotiation.",
];

pub fn register(commands: &mut CommandRegistry) {
    commands.register("MOTD", CommandSpec::new(0, Box::new(MotdHandler)));
    commands.register("VERSION", CommandSpec::new(0, Box::new(VersionHandler)));
    commands.register("INFO", CommandSpec::new(0, Box::new(InfoHandler)));
}

struct MotdHandler;

#[async_trait]
impl CommandHandler for MotdHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        _msg: &Message,
    ) -> HandlerResult {
        if ctx.motd.is_empty() {
            cli.send_numeric(Numeric::ERR_NOMOTD, vec!["MOTD File is missing".into()]);
            return Ok(());
        }
        cli.send_numeric(
            Numeric::RPL_MOTDSTART,
            vec![format!("- {} Message of the Day -", ctx.server_name())],
        );
        for line in &ctx.motd {
            cli.send_numeric(Numeric::RPL_MOTD, vec![format!("- {line}")]);
        }
        cli.send_numeric(
            Numeric::RPL_ENDOFMOTD,
            vec!["End of /MOTD command.".into()],
        );
        Ok(())
    }
}

struct VersionHandler;

#[async_trait]
impl CommandHandler for VersionHandler {
    async fn handle(
        &self,
        ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        _msg: &Message,
    ) -> HandlerResult {
        cli.send_numeric(
            Numeric::RPL_VERSION,
            vec![VERSION.into(), ctx.server_name().to_string()],
        );
        ctx.send_isupport(cli);
        Ok(())
    }
}

struct InfoHandler;

#[async_trait]
impl CommandHandler for InfoHandler {
    async fn handle(
        &self,
        _ctx: &Arc<ServerContext>,
        cli: &Arc<ClientRef>,
        _msg: &Message,
    ) -> HandlerResult {
        for line in INFO_LINES {
            cli.send_numeric(Numeric::RPL_INFO, vec![line.to_string()]);
        }
        cli.send_numeric(Numeric::RPL_ENDOFINFO, vec!["End of /INFO list.".into()]);
        Ok(())
    }
}
