use crate::errors::ToolError;
use serde_json::Value;

pub struct ToolSpec {
    pub name: &'static str,
    pub required: &'static [&'static str],
    pub description: &'static str,
}

/// The full tool surface. Argument semantics beyond presence checks are
/// enforced by the owning manager.
pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "auth_store_credentials",
        required: &["host", "username"],
        description: "Store a password or private key path for (host, username)",
    },
    ToolSpec {
        name: "ssh_execute",
        required: &["host", "username", "command"],
        description: "Execute one command through the pooled transport",
    },
    ToolSpec {
        name: "ssh_execute_batch",
        required: &["host", "username", "commands"],
        description: "Execute commands sequentially on one leased transport",
    },
    ToolSpec {
        name: "ssh_execute_script",
        required: &["host", "username", "script"],
        description: "Upload a script over SFTP and run it with the configured shell",
    },
    ToolSpec {
        name: "ssh_system_info",
        required: &["host", "username"],
        description: "Composite host report, cached in the static tier",
    },
    ToolSpec {
        name: "ssh_search_content",
        required: &["host", "username", "query", "path"],
        description: "Recursive grep with token-bounded output",
    },
    ToolSpec {
        name: "ssh_health_check",
        required: &["host", "username"],
        description: "Connectivity probe (echo ok), never cached",
    },
    ToolSpec {
        name: "ssh_session_info",
        required: &[],
        description: "Cache, pool, session and log statistics",
    },
    ToolSpec {
        name: "ssh_clear_cache",
        required: &[],
        description: "Invalidate cached results, optionally for one host",
    },
    ToolSpec {
        name: "file_upload",
        required: &["host", "username", "local_path", "remote_path"],
        description: "Chunked SFTP upload with staging and hash verification",
    },
    ToolSpec {
        name: "file_download",
        required: &["host", "username", "remote_path", "local_path"],
        description: "Chunked SFTP download with staging and hash verification",
    },
    ToolSpec {
        name: "file_info",
        required: &["host", "username", "path"],
        description: "Remote stat",
    },
    ToolSpec {
        name: "dir_list",
        required: &["host", "username", "path"],
        description: "Paged, regex-filterable directory listing",
    },
    ToolSpec {
        name: "dir_interactive",
        required: &["op"],
        description: "Interactive shell sessions: open, send, close",
    },
];

pub fn tool_by_name(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|tool| tool.name == name)
}

pub fn validate(tool: &str, args: &Value) -> Result<(), ToolError> {
    let Some(spec) = tool_by_name(tool) else {
        let known: Vec<&str> = TOOLS.iter().map(|t| t.name).collect();
        return Err(ToolError::config(format!("Unknown tool {:?}", tool))
            .with_details(serde_json::json!({"known_tools": known})));
    };
    if !args.is_null() && !args.is_object() {
        return Err(ToolError::config("args must be a JSON object"));
    }
    let missing: Vec<&str> = spec
        .required
        .iter()
        .filter(|key| {
            args.get(**key)
                .map(|value| value.is_null())
                .unwrap_or(true)
        })
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(ToolError::config(format!(
            "Missing required arguments for {}: {}",
            tool,
            missing.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn catalog_exposes_fourteen_tools() {
        assert_eq!(TOOLS.len(), 14);
    }

    #[test]
    fn unknown_tool_lists_the_catalog() {
        let err = validate("ssh_exec", &json!({})).unwrap_err();
        assert_eq!(err.kind, crate::errors::ToolErrorKind::ConfigError);
        let known = err
            .details
            .as_ref()
            .and_then(|d| d.get("known_tools"))
            .and_then(|v| v.as_array())
            .expect("known tools");
        assert_eq!(known.len(), 14);
    }

    #[test]
    fn missing_required_arguments_are_named() {
        let err = validate("ssh_execute", &json!({"host": "h"})).unwrap_err();
        assert!(err.message.contains("username"));
        assert!(err.message.contains("command"));
    }

    #[test]
    fn null_required_argument_counts_as_missing() {
        let err = validate("dir_interactive", &json!({"op": null})).unwrap_err();
        assert!(err.message.contains("op"));
    }

    #[test]
    fn tools_without_required_args_accept_null_args() {
        assert!(validate("ssh_session_info", &Value::Null).is_ok());
        assert!(validate("ssh_clear_cache", &json!({})).is_ok());
    }
}
