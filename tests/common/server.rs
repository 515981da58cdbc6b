//! Test server management.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::sleep;

/// A rookd instance under test.
pub struct TestServer {
    child: Child,
    port: u16,
    _data_dir: tempfile::TempDir,
}

impl TestServer {
    /// Spawn a server listening on `port` with the standard test config.
    pub async fn spawn(port: u16) -> anyhow::Result<Self> {
        let data_dir = tempfile::tempdir()?;

        let config_path = data_dir.path().join("rookd.toml");
        let config_content = format!(
            r#"
[server]
name = "irc.example"
network = "ExampleNet"
description = "rookd test server"
motd = ["Welcome to the test network"]

[[listener]]
host = "127.0.0.1"
port = {port}

[limits]
recvq = 20

[register]
enabled = true

[store]
filename = "{store}"

[[role]]
name = "admin"
title = "server administrator"
capabilities = ["oper:local_kill", "metadata:set_global"]

[[oper]]
name = "root"
hostmask = "*!*@*"
password = "opersecret"
role = "admin"
"#,
            store = data_dir.path().join("accounts.db").display(),
        );
        std::fs::write(&config_path, config_content)?;

        let binary_path =
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("target/debug/rookd");
        let child = Command::new(&binary_path)
            .arg("--config")
            .arg(&config_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let server = Self {
            child,
            port,
            _data_dir: data_dir,
        };
        server.wait_until_ready().await?;
        Ok(server)
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    async fn wait_until_ready(&self) -> anyhow::Result<()> {
        for _ in 0..100 {
            if TcpStream::connect(self.addr()).await.is_ok() {
                return Ok(());
            }
            sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("server did not start listening on {}", self.addr())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
