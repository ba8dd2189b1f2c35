pub mod directory;
pub mod ssh;
pub mod transfer;

use crate::errors::ToolError;
use crate::services::keystore::{Credential, CredentialStore};
use crate::services::pool::HostKey;
use crate::services::validation::Validation;
use serde_json::Value;

/// Target + credential resolution shared by every remote-touching tool:
/// inline credentials win, then the keystore, then AuthFailure.
pub(crate) fn resolve_target(
    validation: &Validation,
    keystore: &CredentialStore,
    args: &Value,
) -> Result<(HostKey, Credential), ToolError> {
    let host = validation.ensure_string(args.get("host"), "host")?;
    let username = validation.ensure_string(args.get("username"), "username")?;
    let port = validation.ensure_port(args.get("port"))?;
    let credential = keystore.resolve(&host, &username, args)?;
    Ok((HostKey::new(host, port, username), credential))
}

/// Single-quote shell quoting; embedded quotes become `'\''`.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_wraps_and_escapes() {
        assert_eq!(shell_quote("/etc/os-release"), "'/etc/os-release'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn resolve_target_requires_host_and_username() {
        let validation = Validation::new();
        let keystore = CredentialStore::new();
        let err = resolve_target(&validation, &keystore, &serde_json::json!({"host": "h"}))
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::ToolErrorKind::ConfigError);

        let (key, credential) = resolve_target(
            &validation,
            &keystore,
            &serde_json::json!({"host": "h", "username": "u", "password": "pw", "port": 2222}),
        )
        .unwrap();
        assert_eq!(key.to_string(), "u@h:2222");
        assert_eq!(credential, Credential::Password("pw".to_string()));
    }
}
