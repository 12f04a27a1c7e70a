//! Credential resolution.
//!
//! Passwords embedded in hop URLs always win; when a hop has none, the
//! session asks the resolver it was constructed with. Secret storage and
//! interactive prompting live behind this trait, outside the core.

use std::collections::HashMap;

use secrecy::SecretString;

/// External secret lookup for hops without an embedded password.
pub trait CredentialResolver: Send + Sync {
    /// Return the password for `username` on `host`, or `None` when unknown.
    fn resolve(&self, username: &str, host: &str) -> Option<SecretString>;
}

/// Resolver that never finds anything. Default for URL-only setups.
#[derive(Debug, Default)]
pub struct NoCredentials;

impl CredentialResolver for NoCredentials {
    fn resolve(&self, _username: &str, _host: &str) -> Option<SecretString> {
        None
    }
}

/// Fixed (username, host) -> password map. Used by the CLI and tests.
#[derive(Default)]
pub struct StaticCredentials {
    entries: HashMap<(String, String), SecretString>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a password for a (username, host) pair.
    pub fn with(mut self, username: &str, host: &str, password: &str) -> Self {
        self.entries.insert(
            (username.to_string(), host.to_string()),
            SecretString::from(password.to_string()),
        );
        self
    }
}

impl CredentialResolver for StaticCredentials {
    fn resolve(&self, username: &str, host: &str) -> Option<SecretString> {
        self.entries
            .get(&(username.to_string(), host.to_string()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_static_lookup() {
        let resolver = StaticCredentials::new().with("cisco", "10.0.0.1", "pw");
        let secret = resolver.resolve("cisco", "10.0.0.1").unwrap();
        assert_eq!(secret.expose_secret(), "pw");
        assert!(resolver.resolve("cisco", "10.0.0.2").is_none());
        assert!(NoCredentials.resolve("cisco", "10.0.0.1").is_none());
    }
}
