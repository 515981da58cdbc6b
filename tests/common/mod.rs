//! Integration test infrastructure: spawn a rookd instance on a scratch
//! config and drive it with real TCP clients.

pub mod client;
pub mod server;

#[allow(unused_imports)]
pub use client::TestClient;
#[allow(unused_imports)]
pub use server::TestServer;
