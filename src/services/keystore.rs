use crate::errors::ToolError;
use dashmap::DashMap;
use serde_json::Value;

/// Authentication material for one connect attempt. Never retained by the
/// pool or executor beyond the attempt itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    PrivateKey {
        path: String,
        passphrase: Option<String>,
    },
}

impl Credential {
    pub fn auth_mode(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::PrivateKey { .. } => "private_key",
        }
    }
}

/// Volatile keystore keyed by `(host, username)`. This process never writes
/// secrets to disk; restarting the service forgets everything.
pub struct CredentialStore {
    entries: DashMap<String, Credential>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn key(host: &str, username: &str) -> String {
        format!("{}|{}", host.to_lowercase(), username.to_lowercase())
    }

    pub fn put(&self, host: &str, username: &str, credential: Credential) {
        self.entries
            .insert(Self::key(host, username), credential);
    }

    pub fn get(&self, host: &str, username: &str) -> Option<Credential> {
        self.entries
            .get(&Self::key(host, username))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Credential resolution order: inline arguments, then the store, then
    /// failure. Inline credentials are never written back to the store.
    pub fn resolve(&self, host: &str, username: &str, args: &Value) -> Result<Credential, ToolError> {
        if let Some(inline) = credential_from_args(args)? {
            return Ok(inline);
        }
        self.get(host, username).ok_or_else(|| {
            ToolError::auth(format!(
                "No credentials provided and none stored for {}@{}",
                username, host
            ))
            .with_host(host)
        })
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn credential_from_args(args: &Value) -> Result<Option<Credential>, ToolError> {
    let password = args
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    let key_path = args
        .get("private_key_path")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    let passphrase = args
        .get("passphrase")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    match (password, key_path) {
        (_, Some(path)) => Ok(Some(Credential::PrivateKey {
            path: path.to_string(),
            passphrase,
        })),
        (Some(password), None) => Ok(Some(Credential::Password(password.to_string()))),
        (None, None) => {
            if passphrase.is_some() {
                return Err(ToolError::config(
                    "passphrase requires private_key_path",
                ));
            }
            Ok(None)
        }
    }
}
