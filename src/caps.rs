//! Capability registry.
//!
//! The global set of tokens the server advertises through CAP LS. Built once
//! at boot from the extensions list; per-client enabled sets live on the
//! [`Client`](crate::state::Client).

use rook_proto::CaseFoldMap;

use crate::config::Config;

/// One advertised capability token.
#[derive(Debug, Clone, Default)]
pub struct Capability {
    pub name: String,
    /// CAP 302 value payload (`sasl=PLAIN`).
    pub value: Option<String>,
    /// Sticky capabilities cannot be removed via CAP REQ.
    pub sticky: bool,
}

impl Capability {
    /// The LS atom: bare name for 3.1 clients, `name=value` for 3.2.
    pub fn atom(&self, ircv3_2: bool) -> String {
        match (&self.value, ircv3_2) {
            (Some(value), true) => format!("{}={}", self.name, value),
            _ => self.name.clone(),
        }
    }
}

/// Case-insensitive registry of advertised capabilities, fixed after boot.
#[derive(Debug, Default)]
pub struct CapRegistry {
    caps: CaseFoldMap<Capability>,
    /// Advertisement order, matching registration order.
    order: Vec<String>,
}

impl CapRegistry {
    pub fn new() -> Self {
        CapRegistry::default()
    }

    pub fn add(&mut self, name: &str, value: Option<&str>, sticky: bool) {
        self.order.push(name.to_string());
        self.caps.insert(
            name,
            Capability {
                name: name.to_string(),
                value: value.map(str::to_string),
                sticky,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.caps.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.caps.contains_key(name)
    }

    /// Capabilities in advertisement order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.order.iter().filter_map(|name| self.caps.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Build the registry from the configured extension list.
pub fn build_registry(conf: &Config) -> CapRegistry {
    let mut registry = CapRegistry::new();
    // cap-notify is core: CAP LS 302 implies it.
    registry.add("cap-notify", None, false);

    if conf.extension_enabled("sasl") {
        registry.add("sasl", Some("PLAIN"), false);
    }
    if conf.extension_enabled("away-notify") {
        registry.add("away-notify", None, false);
    }
    if conf.extension_enabled("account-notify") {
        registry.add("account-notify", None, false);
    }
    if conf.extension_enabled("echo-message") {
        registry.add("echo-message", None, false);
    }
    if conf.extension_enabled("extended-join") {
        registry.add("extended-join", None, false);
    }
    if conf.extension_enabled("server-time") {
        registry.add("server-time", None, false);
    }
    if conf.extension_enabled("userhost-in-names") {
        registry.add("userhost-in-names", None, false);
    }
    if conf.extension_enabled("metadata") {
        registry.add("metadata-notify", None, false);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_formatting() {
        let cap = Capability {
            name: "sasl".into(),
            value: Some("PLAIN".into()),
            sticky: false,
        };
        assert_eq!(cap.atom(false), "sasl");
        assert_eq!(cap.atom(true), "sasl=PLAIN");
    }

    #[test]
    fn registry_is_case_insensitive() {
        let mut registry = CapRegistry::new();
        registry.add("away-notify", None, false);
        assert!(registry.contains("AWAY-NOTIFY"));
        assert_eq!(registry.get("Away-Notify").unwrap().name, "away-notify");
    }

    #[test]
    fn iteration_keeps_registration_order() {
        let mut registry = CapRegistry::new();
        registry.add("cap-notify", None, false);
        registry.add("sasl", Some("PLAIN"), false);
        registry.add("away-notify", None, false);
        let names: Vec<_> = registry.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["cap-notify", "sasl", "away-notify"]);
    }
}
