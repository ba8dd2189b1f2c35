use crate::config::Settings;
use crate::errors::ToolError;
use crate::managers::resolve_target;
use crate::services::keystore::CredentialStore;
use crate::services::logger::Logger;
use crate::services::sessions::{SessionRegistry, SshPool};
use crate::services::validation::Validation;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const INTERACTIVE_OPS: &[&str] = &["open", "send", "close"];

/// Remote directory listing plus the interactive-session tool surface.
pub struct DirectoryManager {
    logger: Logger,
    settings: Settings,
    validation: Validation,
    pool: SshPool,
    keystore: Arc<CredentialStore>,
    sessions: Arc<SessionRegistry>,
}

impl DirectoryManager {
    pub fn new(
        logger: Logger,
        settings: Settings,
        validation: Validation,
        pool: SshPool,
        keystore: Arc<CredentialStore>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            logger: logger.child("dir"),
            settings,
            validation,
            pool,
            keystore,
            sessions,
        }
    }

    pub async fn list(&self, args: &Value) -> Result<Value, ToolError> {
        let (key, credential) = resolve_target(&self.validation, &self.keystore, args)?;
        let path = self.validation.ensure_string(args.get("path"), "path")?;
        let page = self
            .validation
            .ensure_positive_int(args.get("page"), "page")?
            .unwrap_or(crate::constants::pagination::DEFAULT_PAGE as u64) as usize;
        let page_size = self
            .validation
            .ensure_positive_int(args.get("page_size"), "page_size")?
            .map(|n| n as usize)
            .unwrap_or(self.settings.default_page_size)
            .min(crate::constants::pagination::MAX_PAGE_SIZE);
        let filter = self
            .validation
            .ensure_regex(args.get("filter_pattern"), "filter_pattern")?;

        let mut lease = self.pool.lease(&key, &credential).await?;
        let transport = lease
            .take_transport()
            .ok_or_else(|| ToolError::execution("leased transport unavailable"))?;
        let path_clone = path.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = list_names_blocking(&transport.conn, &path_clone);
            (transport, result)
        })
        .await;

        let result = match joined {
            Ok((transport, result)) => {
                lease.put_back(transport);
                match &result {
                    Ok(_) => lease.release(),
                    Err(_) => lease.discard(),
                }
                result
            }
            Err(_) => {
                lease.release();
                Err(ToolError::execution("listing task failed"))
            }
        };
        let names = result.map_err(|err| err.with_host(key.host.clone()))?;

        let (total, items) = paginate(names, page, page_size, filter.as_ref());
        self.logger.debug(
            "dir listed",
            Some(&serde_json::json!({"target": key.to_string(), "path": path, "total": total})),
        );
        Ok(serde_json::json!({
            "host": key.host,
            "port": key.port,
            "path": path,
            "page": page,
            "page_size": page_size,
            "total": total,
            "items": items,
            "filter_pattern": args.get("filter_pattern").cloned().unwrap_or(Value::Null),
        }))
    }

    pub async fn interactive(&self, args: &Value) -> Result<Value, ToolError> {
        let op = self.validation.ensure_string(args.get("op"), "op")?;
        match op.as_str() {
            "open" => {
                let (key, credential) = resolve_target(&self.validation, &self.keystore, args)?;
                let idle_ttl = self
                    .validation
                    .ensure_positive_int(args.get("idle_ttl_seconds"), "idle_ttl_seconds")?
                    .map(Duration::from_secs);
                let session_id = self.sessions.open(key.clone(), &credential, idle_ttl).await?;
                Ok(serde_json::json!({
                    "op": "open",
                    "session_id": session_id,
                    "host": key.host,
                    "port": key.port,
                }))
            }
            "send" => {
                let session_id = self
                    .validation
                    .ensure_string(args.get("session_id"), "session_id")?;
                let input = args
                    .get("input")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ToolError::config("input is required for op=send"))?;
                let read_timeout = self
                    .validation
                    .ensure_positive_int(args.get("read_timeout_seconds"), "read_timeout_seconds")?
                    .map(Duration::from_secs);
                self.sessions.send(&session_id, input, read_timeout).await
            }
            "close" => {
                let session_id = self
                    .validation
                    .ensure_string(args.get("session_id"), "session_id")?;
                self.sessions.close(&session_id).await?;
                Ok(serde_json::json!({"op": "close", "session_id": session_id, "closed": true}))
            }
            other => Err(ToolError::config(format!(
                "Unknown op {:?}; expected one of {}",
                other,
                INTERACTIVE_OPS.join(", ")
            ))),
        }
    }
}

fn list_names_blocking(session: &ssh2::Session, path: &str) -> Result<Vec<String>, ToolError> {
    session.set_blocking(true);
    let sftp = session
        .sftp()
        .map_err(|err| ToolError::transfer(format!("Failed to open SFTP channel: {}", err)))?;
    let entries = sftp
        .readdir(Path::new(path))
        .map_err(|err| ToolError::execution(format!("readdir {} failed: {}", path, err)))?;
    Ok(entries
        .into_iter()
        .filter_map(|(entry_path, _stat)| {
            entry_path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
        })
        .collect())
}

/// Sort, filter, then slice: the page window applies to the filtered order.
fn paginate(
    mut names: Vec<String>,
    page: usize,
    page_size: usize,
    filter: Option<&Regex>,
) -> (usize, Vec<String>) {
    names.sort();
    let filtered: Vec<String> = match filter {
        Some(re) => names.into_iter().filter(|n| re.is_match(n)).collect(),
        None => names,
    };
    let total = filtered.len();
    let start = (page.saturating_sub(1)) * page_size;
    let items = if start >= total {
        Vec::new()
    } else {
        filtered[start..(start + page_size).min(total)].to_vec()
    };
    (total, items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(prefixes: &[&str]) -> Vec<String> {
        prefixes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn pagination_slices_the_filtered_lexicographic_order() {
        let mut input = Vec::new();
        for i in 0..45 {
            input.push(format!("svc{:02}.conf", i));
            input.push(format!("svc{:02}.log", i));
        }
        input.reverse();
        let re = Regex::new(r"\.conf$").unwrap();
        let (total, items) = paginate(input, 2, 20, Some(&re));
        assert_eq!(total, 45);
        assert_eq!(items.len(), 20);
        assert_eq!(items.first().map(String::as_str), Some("svc20.conf"));
        assert_eq!(items.last().map(String::as_str), Some("svc39.conf"));
    }

    #[test]
    fn page_past_the_end_is_empty() {
        let (total, items) = paginate(names(&["a", "b"]), 5, 10, None);
        assert_eq!(total, 2);
        assert!(items.is_empty());
    }

    #[test]
    fn unfiltered_listing_is_sorted() {
        let (total, items) = paginate(names(&["zeta", "alpha", "mid"]), 1, 10, None);
        assert_eq!(total, 3);
        assert_eq!(items, names(&["alpha", "mid", "zeta"]));
    }
}
