//! Reverse DNS with forward confirmation.
//!
//! Runs once per connection; whatever the outcome, the `DNS` registration
//! lock is released so registration can proceed.

use std::net::IpAddr;
use std::sync::Arc;

use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use tracing::debug;

use crate::state::{ClientRef, ServerContext};

fn build_resolver() -> TokioResolver {
    TokioResolver::builder_tokio()
        .map(|b| b.build())
        .unwrap_or_else(|_| {
            TokioResolver::builder_with_config(
                ResolverConfig::default(),
                TokioConnectionProvider::default(),
            )
            .build()
        })
}

/// Resolve the peer's hostname: PTR lookup, then a forward lookup that must
/// contain the original address. On success the hostname replaces the
/// literal address.
pub async fn run_rdns_check(ctx: Arc<ServerContext>, cli: Arc<ClientRef>) {
    cli.send_notice("Looking up your hostname...");

    let realaddr = cli.state.read().realaddr.clone();
    let hostname = match realaddr.parse::<IpAddr>() {
        // loopback has no useful PTR and may have no resolver at all
        Ok(addr) if addr.is_loopback() => None,
        Ok(addr) => forward_confirmed_rdns(addr).await,
        Err(_) => None,
    };

    match hostname {
        Some(hostname) => {
            cli.send_notice(format!("Found your hostname: {hostname}"));
            cli.state.write().hostname = hostname;
        }
        None => {
            cli.send_notice("Could not find your hostname...");
        }
    }

    if cli.release_registration_lock(&["DNS"]) {
        ctx.try_register(&cli).await;
    }
}

async fn forward_confirmed_rdns(addr: IpAddr) -> Option<String> {
    let resolver = build_resolver();

    let ptr = resolver.reverse_lookup(addr).await.ok()?;
    let name = ptr.iter().next()?.to_utf8();
    let name = name.trim_end_matches('.').to_string();

    let forward = resolver.lookup_ip(name.as_str()).await.ok()?;
    if forward.iter().any(|resolved| resolved == addr) {
        Some(name)
    } else {
        debug!(%addr, %name, "rdns forward confirmation failed");
        None
    }
}
