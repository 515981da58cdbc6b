//! RPL_ISUPPORT (005) token assembly.

/// Collects ISUPPORT tokens and splits them into 005 parameter lists.
///
/// Tokens keep insertion order. A token with no value renders as a bare key
/// (`SAFELIST`), otherwise as `KEY=value`.
#[derive(Debug, Clone, Default)]
pub struct IsupportBuilder {
    tokens: Vec<(String, Option<String>)>,
}

/// At most this many tokens per 005 line, leaving room for the nick and the
/// trailing "are supported by this server".
const TOKENS_PER_LINE: usize = 13;

impl IsupportBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        IsupportBuilder { tokens: Vec::new() }
    }

    /// Add a bare token.
    pub fn flag(&mut self, key: impl Into<String>) -> &mut Self {
        self.tokens.push((key.into(), None));
        self
    }

    /// Add a `KEY=value` token.
    pub fn token(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.tokens.push((key.into(), Some(value.to_string())));
        self
    }

    /// Render into one parameter list per 005 line (trailing text excluded).
    pub fn lines(&self) -> Vec<Vec<String>> {
        self.tokens
            .chunks(TOKENS_PER_LINE)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|(k, v)| match v {
                        Some(v) => format!("{k}={v}"),
                        None => k.clone(),
                    })
                    .collect()
            })
            .collect()
    }
}
