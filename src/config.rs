//! Server configuration, read once at boot.
//!
//! TOML, deserialized with serde and validated before any listener opens.
//! The loaded [`Config`] is immutable for the lifetime of the process.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub listener: Vec<ListenerConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub register: RegisterConfig,
    #[serde(default)]
    pub oper: Vec<OperBlock>,
    #[serde(default)]
    pub role: Vec<RoleBlock>,
    #[serde(default)]
    pub store: StoreConfig,
    /// Optional behavior modules layered onto the core event buses.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub log: LogConfig,
}

/// Server identity and MOTD.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Server name, used as the source of every numeric.
    pub name: String,
    /// Network name advertised in 001 and ISUPPORT.
    pub network: String,
    #[serde(default)]
    pub description: String,
    /// Inline MOTD lines; `motd_file` wins when both are set.
    #[serde(default)]
    pub motd: Vec<String>,
    #[serde(default)]
    pub motd_file: Option<PathBuf>,
}

/// One TCP listener, optionally TLS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
}

/// Length and depth limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LimitsConfig {
    pub nick: usize,
    pub channel: usize,
    pub topic: usize,
    pub user: usize,
    /// Pending-message depth per connection before "Excess flood".
    pub recvq: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            nick: 32,
            channel: 64,
            topic: 400,
            user: 10,
            recvq: 20,
        }
    }
}

/// METADATA policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MetadataConfig {
    /// Cap on user-set keys per target; `None` removes the cap.
    pub limit: Option<usize>,
    /// When non-empty, only these keys may be set by users.
    pub whitelist: Vec<String>,
    /// Keys nobody may set, whitelisted or not.
    pub blacklist: Vec<String>,
    /// Keys gated behind role metakey grants.
    pub restricted_keys: Vec<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        MetadataConfig {
            limit: Some(20),
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            restricted_keys: Vec::new(),
        }
    }
}

/// MONITOR policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MonitorConfig {
    pub limit: Option<usize>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig { limit: Some(100) }
    }
}

/// Account registration (REG CREATE/VERIFY).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RegisterConfig {
    pub enabled: bool,
    /// Callback namespaces offered to clients, e.g. `["mailto"]`.
    /// Empty means only the no-verify `*` callback is accepted.
    pub callbacks: Vec<String>,
    /// Seconds an unverified account may occupy its name.
    pub verify_timeout_secs: i64,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        RegisterConfig {
            enabled: false,
            callbacks: Vec::new(),
            verify_timeout_secs: 86400,
        }
    }
}

/// One operator block.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperBlock {
    pub name: String,
    /// Glob matched against the caller's `nick!user@host`.
    pub hostmask: String,
    /// Stored hash (or plain text when `scheme` is absent).
    pub password: String,
    #[serde(default)]
    pub scheme: Option<String>,
    pub role: String,
}

/// One role block; `extends` chains are flattened at load time.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleBlock {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metakeys_get: Vec<String>,
    #[serde(default)]
    pub metakeys_set: Vec<String>,
    /// Shorthand for keys granted both ways.
    #[serde(default)]
    pub metakeys_access: Vec<String>,
}

/// Persistent account store.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StoreConfig {
    pub format: String,
    pub filename: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            format: "redb".into(),
            filename: "rookd.db".into(),
        }
    }
}

/// Logging.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".into(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    KNOWN_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

/// Extension modules that may appear in `extensions`.
pub const KNOWN_EXTENSIONS: &[&str] = &[
    "account-notify",
    "away-notify",
    "cap-notify",
    "echo-message",
    "extended-join",
    "metadata",
    "monitor",
    "nopost",
    "register",
    "sasl",
    "server-time",
    "userhost-in-names",
];

impl Config {
    /// Load and parse the configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Config> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Effective MOTD lines: the file when configured, inline lines otherwise.
    pub fn motd_lines(&self) -> Vec<String> {
        if let Some(path) = &self.server.motd_file {
            match std::fs::read_to_string(path) {
                Ok(text) => return text.lines().map(str::to_string).collect(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot read motd file");
                    return Vec::new();
                }
            }
        }
        self.server.motd.clone()
    }

    /// Whether an extension module is enabled.
    pub fn extension_enabled(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }
}

/// Validate the configuration; returns every problem found.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() {
        errors.push("server.name must not be empty".into());
    }
    if config.server.network.is_empty() {
        errors.push("server.network must not be empty".into());
    }
    if config.listener.is_empty() {
        errors.push("at least one [[listener]] is required".into());
    }
    for l in &config.listener {
        if l.tls && (l.cert.is_none() || l.key.is_none()) {
            errors.push(format!(
                "listener {}:{} has tls = true but no cert/key",
                l.host, l.port
            ));
        }
    }
    for oper in &config.oper {
        if !config.role.iter().any(|r| r.name == oper.role) {
            errors.push(format!(
                "oper {} references unknown role {}",
                oper.name, oper.role
            ));
        }
        if let Some(scheme) = &oper.scheme {
            if !crate::security::password::SCHEMES.contains(&scheme.as_str()) {
                errors.push(format!("oper {} uses unknown scheme {scheme}", oper.name));
            }
        }
    }
    for role in &config.role {
        if let Some(parent) = &role.extends {
            if !config.role.iter().any(|r| &r.name == parent) {
                errors.push(format!(
                    "role {} extends unknown role {parent}",
                    role.name
                ));
            }
        }
    }
    if config.store.format != "redb" {
        errors.push(format!("unsupported store format {}", config.store.format));
    }
    for ext in &config.extensions {
        if !KNOWN_EXTENSIONS.contains(&ext.as_str()) {
            errors.push(format!("unknown extension {ext}"));
        }
    }
    for cb in &config.register.callbacks {
        if cb != "mailto" {
            errors.push(format!("unknown register callback namespace {cb}"));
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        toml::from_str(
            r#"
            [server]
            name = "irc.example"
            network = "ExampleNet"

            [[listener]]
            host = "127.0.0.1"
            port = 6667
            "#,
        )
        .expect("minimal config parses")
    }

    #[test]
    fn minimal_config_is_valid() {
        let config = minimal();
        assert!(validate(&config).is_ok());
        assert_eq!(config.limits.recvq, 20);
        assert_eq!(config.metadata.limit, Some(20));
        assert_eq!(config.monitor.limit, Some(100));
        assert!(config.extension_enabled("monitor"));
    }

    #[test]
    fn tls_listener_requires_cert_and_key() {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "irc.example"
            network = "ExampleNet"

            [[listener]]
            host = "::"
            port = 6697
            tls = true
            "#,
        )
        .unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("cert/key")));
    }

    #[test]
    fn oper_role_must_exist() {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "irc.example"
            network = "ExampleNet"

            [[listener]]
            host = "127.0.0.1"
            port = 6667

            [[oper]]
            name = "root"
            hostmask = "*!*@*"
            password = "x"
            role = "nosuch"
            "#,
        )
        .unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("unknown role")));
    }

    #[test]
    fn unknown_extension_rejected() {
        let mut config = minimal();
        config.extensions.push("warp-drive".into());
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("warp-drive")));
    }

    #[test]
    fn role_blocks_parse_with_inheritance_fields() {
        let config: Config = toml::from_str(
            r#"
            [server]
            name = "irc.example"
            network = "ExampleNet"

            [[listener]]
            host = "127.0.0.1"
            port = 6667

            [[role]]
            name = "helper"
            title = "network helper"
            metakeys_access = ["server:note"]

            [[role]]
            name = "admin"
            title = "server administrator"
            extends = "helper"
            capabilities = ["oper:local_kill", "metadata:set_global"]
            "#,
        )
        .unwrap();
        assert!(validate(&config).is_ok());
        assert_eq!(config.role.len(), 2);
        assert_eq!(config.role[1].extends.as_deref(), Some("helper"));
    }
}
