//! Operator roles.
//!
//! Roles bundle capability strings (`oper:local_kill`, `metadata:set_global`)
//! with metadata-key grants. `extends` chains are flattened while the config
//! loads; at runtime a role is a plain value looked up by name.

use std::collections::HashMap;

use rook_proto::CaseFoldSet;

use crate::config::RoleBlock;

/// A resolved role.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: String,
    pub title: String,
    /// WHOIS 313 text, derived from the title.
    pub whois_line: String,
    pub capabilities: Vec<String>,
    pub metakeys_get: CaseFoldSet,
    pub metakeys_set: CaseFoldSet,
}

impl Role {
    pub fn has_capability(&self, cap: &str) -> bool {
        self.capabilities.iter().any(|c| c == cap)
    }
}

fn whois_line_for(title: &str) -> String {
    // "is an operator." vs "is a helper.": article keyed on the first letter.
    let article = match title.chars().find(|c| c.is_alphabetic()) {
        Some(c) if "aeiouAEIOU".contains(c) => "an",
        _ => "a",
    };
    format!("is {article} {title}.")
}

/// Flatten role blocks into resolved roles. A block may extend any earlier
/// block; unknown parents were already rejected by config validation.
pub fn resolve_roles(blocks: &[RoleBlock]) -> HashMap<String, Role> {
    let mut roles: HashMap<String, Role> = HashMap::new();

    for block in blocks {
        let mut capabilities = block.capabilities.clone();
        let mut metakeys_get = CaseFoldSet::new();
        let mut metakeys_set = CaseFoldSet::new();

        for key in &block.metakeys_get {
            metakeys_get.insert(key.clone());
        }
        for key in &block.metakeys_set {
            metakeys_set.insert(key.clone());
        }
        for key in &block.metakeys_access {
            metakeys_get.insert(key.clone());
            metakeys_set.insert(key.clone());
        }

        if let Some(parent) = block.extends.as_ref().and_then(|p| roles.get(p.as_str())) {
            for cap in &parent.capabilities {
                if !capabilities.contains(cap) {
                    capabilities.push(cap.clone());
                }
            }
            for key in parent.metakeys_get.iter() {
                metakeys_get.insert(key.to_string());
            }
            for key in parent.metakeys_set.iter() {
                metakeys_set.insert(key.to_string());
            }
        }

        roles.insert(
            block.name.clone(),
            Role {
                name: block.name.clone(),
                title: block.title.clone(),
                whois_line: whois_line_for(&block.title),
                capabilities,
                metakeys_get,
                metakeys_set,
            },
        );
    }

    roles
}
