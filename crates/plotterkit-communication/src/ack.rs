//! Acknowledgment detection
//!
//! The device answers every accepted line with a response line. Which
//! responses count as "ready for the next line" depends on the firmware, so
//! the link takes the rule as a trait object.

/// Decides whether an inbound line acknowledges the last sent line
pub trait AckPredicate: Send + Sync {
    /// Whether `line` is an acknowledgment
    fn is_ack(&self, line: &str) -> bool;
}

/// Case-insensitive substring match on a set of tokens
#[derive(Debug, Clone)]
pub struct TokenAck {
    tokens: Vec<String>,
}

impl TokenAck {
    /// Match any of `tokens`
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|t| t.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }
}

impl Default for TokenAck {
    fn default() -> Self {
        Self::new(["ok", "done"])
    }
}

impl AckPredicate for TokenAck {
    fn is_ack(&self, line: &str) -> bool {
        let line = line.to_ascii_lowercase();
        self.tokens.iter().any(|t| line.contains(t.as_str()))
    }
}

impl<F> AckPredicate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_ack(&self, line: &str) -> bool {
        self(line)
    }
}
