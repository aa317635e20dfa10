//! Secret scrubbing for anything that reaches the console or the run log.

use std::sync::Arc;

const MASK: &str = "********";

/// Replaces registered secret values with a mask
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Arc<Vec<String>>,
}

impl Redactor {
    /// Create a redactor for the given secrets; empty values are ignored
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut secrets: Vec<String> = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.trim().is_empty())
            .collect();
        // Longest first so a secret containing another is masked whole
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        Self {
            secrets: Arc::new(secrets),
        }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in self.secrets.iter() {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), MASK);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_registered_secret() {
        let redactor = Redactor::new(["ghp_abc123"]);
        assert_eq!(
            redactor.redact("Authorization: Bearer ghp_abc123"),
            "Authorization: Bearer ********"
        );
    }

    #[test]
    fn test_ignores_empty_secrets() {
        let redactor = Redactor::new(["", "  "]);
        assert_eq!(redactor.redact("nothing to hide"), "nothing to hide");
    }

    #[test]
    fn test_longest_secret_masked_first() {
        let redactor = Redactor::new(["abc", "abcdef"]);
        assert_eq!(redactor.redact("token=abcdef"), "token=********");
    }

    #[test]
    fn test_default_is_passthrough() {
        assert_eq!(Redactor::default().redact("plain"), "plain");
    }
}
