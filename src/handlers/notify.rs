//! account-notify: broadcast account logins to capable common peers.

use std::sync::Arc;

use async_trait::async_trait;
use rook_proto::Message;

use crate::error::HandlerResult;
use crate::events::{topic, Event, EventBus, EventHandler, EventInfo};
use crate::state::ServerContext;

pub fn register(events: &mut EventBus) {
    events.register(topic::ACCOUNT_CHANGE, 10, Box::new(AccountNotify));
}

struct AccountNotify;

#[async_trait]
impl EventHandler for AccountNotify {
    async fn handle(&self, ctx: &Arc<ServerContext>, info: &mut EventInfo) -> HandlerResult {
        let Event::AccountChange { source, account } = &info.payload else {
            return Ok(());
        };
        let Some(cli) = ctx.client(*source) else {
            return Ok(());
        };

        // `*` marks logout on the wire
        let account = account.clone().unwrap_or_else(|| "*".into());
        let account_msg =
            Message::new("ACCOUNT", vec![account]).with_source(cli.hostmask_or_star());
        for peer in ctx.common_peers(&cli, &[cli.id], Some("account-notify")) {
            peer.send(account_msg.clone());
        }
        Ok(())
    }
}
