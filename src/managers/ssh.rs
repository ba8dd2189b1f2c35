use crate::config::Settings;
use crate::constants::exec::{CLOSE_GRACE_MS, POLL_SLEEP_MS, READ_BUF_BYTES};
use crate::constants::shaping::SEARCH_MAX_TOKENS;
use crate::errors::ToolError;
use crate::managers::{resolve_target, shell_quote};
use crate::services::cache::{CacheTier, ResultCache};
use crate::services::keystore::{Credential, CredentialStore};
use crate::services::logger::Logger;
use crate::services::pool::HostKey;
use crate::services::security::SafetyGate;
use crate::services::sessions::{SessionRegistry, SshPool};
use crate::services::shaper::{self, ShapeSpec};
use crate::services::validation::Validation;
use serde_json::Value;
use ssh2::Session;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SYSTEM_INFO_PROBES: &[(&str, &str)] = &[
    ("hostname", "hostname"),
    ("kernel", "uname -a"),
    ("uptime", "uptime"),
    ("whoami", "whoami"),
    ("os_release", "cat /etc/os-release || true"),
];

#[derive(Debug)]
pub(crate) struct RawExec {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) exit_code: i64,
    pub(crate) timed_out: bool,
    pub(crate) duration_ms: u128,
}

/// Orchestrates one remote execution: safety gate, cache lookup, pool lease,
/// channel I/O with timeout, output shaping, cache insert.
pub struct SshManager {
    logger: Logger,
    settings: Settings,
    validation: Validation,
    pool: SshPool,
    cache: Arc<ResultCache>,
    gate: Arc<SafetyGate>,
    keystore: Arc<CredentialStore>,
    sessions: Arc<SessionRegistry>,
}

impl SshManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logger: Logger,
        settings: Settings,
        validation: Validation,
        pool: SshPool,
        cache: Arc<ResultCache>,
        gate: Arc<SafetyGate>,
        keystore: Arc<CredentialStore>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            logger: logger.child("ssh"),
            settings,
            validation,
            pool,
            cache,
            gate,
            keystore,
            sessions,
        }
    }

    pub fn store_credentials(&self, args: &Value) -> Result<Value, ToolError> {
        let host = self.validation.ensure_string(args.get("host"), "host")?;
        let username = self.validation.ensure_string(args.get("username"), "username")?;
        let credential = crate::services::keystore::credential_from_args(args)?
            .ok_or_else(|| ToolError::config("Provide password or private_key_path"))?;
        let auth_mode = credential.auth_mode();
        self.keystore.put(&host, &username, credential);
        Ok(serde_json::json!({
            "ok": true,
            "host": host,
            "username": username,
            "auth_mode": auth_mode,
        }))
    }

    pub async fn execute(&self, args: &Value) -> Result<Value, ToolError> {
        let (key, credential) = resolve_target(&self.validation, &self.keystore, args)?;
        let command = self.validation.ensure_string(args.get("command"), "command")?;
        let warnings = self.gate.check(&command)?;
        let spec = ShapeSpec::from_args(args)?;
        let timeout = self.command_timeout(args)?;

        let use_cache = self.validation.ensure_bool(args.get("use_cache"), true);
        let tier = CacheTier::parse(args.get("cache_category").and_then(|v| v.as_str()));
        let ttl = self
            .validation
            .ensure_positive_int(args.get("cache_ttl_seconds"), "cache_ttl_seconds")?
            .map(Duration::from_secs);

        let cacheable =
            use_cache && warnings.is_empty() && ResultCache::should_cache_command(&command);
        let cache_key =
            ResultCache::build_key(&key.host, key.port, &key.username, &command, &spec);
        if cacheable {
            if let Some(mut hit) = self.cache.get(&cache_key) {
                if let Some(obj) = hit.as_object_mut() {
                    obj.insert("from_cache".to_string(), Value::Bool(true));
                }
                return Ok(hit);
            }
        }

        let raw = self.run_on_pool(&key, &credential, &command, timeout).await?;
        if raw.timed_out {
            return Err(self.timed_out_error(&key, &command, &raw, timeout));
        }
        let result = self.shape_result(&key, &command, raw, &spec, &warnings)?;
        if cacheable && result.get("exit_code").and_then(|v| v.as_i64()) == Some(0) {
            self.cache.put(&cache_key, result.clone(), tier, ttl, &key.host);
        }
        Ok(result)
    }

    pub async fn execute_batch(&self, args: &Value) -> Result<Value, ToolError> {
        let (key, credential) = resolve_target(&self.validation, &self.keystore, args)?;
        let commands: Vec<String> = args
            .get("commands")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if commands.is_empty() {
            return Err(ToolError::config("commands must be a non-empty array of strings"));
        }
        let stop_on_error = self.validation.ensure_bool(args.get("stop_on_error"), true);
        let spec = ShapeSpec::from_args(args)?;
        let timeout = self.command_timeout(args)?;

        // The whole batch is gated up front: one blocked command refuses the
        // batch before anything runs.
        let mut gated = Vec::with_capacity(commands.len());
        for command in &commands {
            gated.push(self.gate.check(command)?);
        }

        let mut lease = self.pool.lease(&key, &credential).await?;
        let mut results = Vec::with_capacity(commands.len());
        let mut failed = false;
        for (command, warnings) in commands.iter().zip(gated) {
            let exec = self
                .run_on_lease(&mut lease, command.clone(), timeout)
                .await;
            let raw = match exec {
                Ok(raw) => raw,
                Err(err) => {
                    lease.discard();
                    return Err(err);
                }
            };
            if raw.timed_out {
                lease.release();
                return Err(self.timed_out_error(&key, command, &raw, timeout));
            }
            let exit_code = raw.exit_code;
            results.push(self.shape_result(&key, command, raw, &spec, &warnings)?);
            if exit_code != 0 {
                failed = true;
                if stop_on_error {
                    break;
                }
            }
        }
        lease.release();
        Ok(serde_json::json!({
            "success": !failed,
            "results": results,
        }))
    }

    pub async fn execute_script(&self, args: &Value) -> Result<Value, ToolError> {
        let (key, credential) = resolve_target(&self.validation, &self.keystore, args)?;
        let script = self.validation.ensure_string(args.get("script"), "script")?;
        let shell = self
            .validation
            .ensure_optional_string(args.get("shell"), "shell")?
            .unwrap_or_else(|| "/bin/bash".to_string());
        let spec = ShapeSpec::from_args(args)?;
        let timeout = self.command_timeout(args)?;
        let warnings = self.gate.scan_script(&script);

        let remote_path = format!("/tmp/sshmux-{}.sh", uuid::Uuid::new_v4().simple());
        let command = format!("{} {}", shell_quote(&shell), shell_quote(&remote_path));

        let mut lease = self.pool.lease(&key, &credential).await?;
        let transport = lease
            .take_transport()
            .ok_or_else(|| ToolError::execution("leased transport unavailable"))?;
        let script_bytes = script.into_bytes();
        let remote_path_clone = remote_path.clone();
        let command_clone = command.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = (|| {
                upload_blob(&transport.conn, &remote_path_clone, &script_bytes, 0o700)?;
                let raw = run_command_blocking(&transport.conn, &command_clone, timeout);
                // best-effort cleanup, also on failed runs
                let cleanup = format!("rm -f {}", shell_quote(&remote_path_clone));
                let _ = run_command_blocking(
                    &transport.conn,
                    &cleanup,
                    Duration::from_secs(5),
                );
                raw
            })();
            (transport, result)
        })
        .await;

        let raw = match joined {
            Ok((transport, result)) => {
                lease.put_back(transport);
                match result {
                    Ok(raw) => {
                        lease.release();
                        raw
                    }
                    Err(err) => {
                        lease.discard();
                        return Err(err.with_host(key.host.clone()));
                    }
                }
            }
            Err(_) => {
                lease.release();
                return Err(ToolError::execution("script task failed").with_host(key.host.clone()));
            }
        };

        if raw.timed_out {
            return Err(self.timed_out_error(&key, &command, &raw, timeout));
        }
        self.shape_result(&key, &command, raw, &spec, &warnings)
    }

    pub async fn system_info(&self, args: &Value) -> Result<Value, ToolError> {
        let (key, credential) = resolve_target(&self.validation, &self.keystore, args)?;
        let force_refresh = self.validation.ensure_bool(args.get("force_refresh"), false);

        let spec = ShapeSpec::full();
        let cache_key =
            ResultCache::build_key(&key.host, key.port, &key.username, "__system_info__", &spec);
        if !force_refresh {
            if let Some(mut hit) = self.cache.get(&cache_key) {
                if let Some(obj) = hit.as_object_mut() {
                    obj.insert("from_cache".to_string(), Value::Bool(true));
                }
                return Ok(hit);
            }
        }

        let timeout = Duration::from_secs(self.settings.command_timeout_seconds);
        let mut lease = self.pool.lease(&key, &credential).await?;
        let mut report = serde_json::Map::new();
        for (name, probe) in SYSTEM_INFO_PROBES {
            let exec = self
                .run_on_lease(&mut lease, probe.to_string(), timeout)
                .await;
            match exec {
                Ok(raw) => {
                    report.insert(
                        name.to_string(),
                        serde_json::json!({
                            "exit_code": raw.exit_code,
                            "stdout": raw.stdout.trim(),
                            "stderr": raw.stderr.trim(),
                        }),
                    );
                }
                Err(err) => {
                    lease.discard();
                    return Err(err);
                }
            }
        }
        lease.release();

        let result = serde_json::json!({
            "host": key.host,
            "port": key.port,
            "system_info": Value::Object(report),
            "from_cache": false,
        });
        self.cache.put(
            &cache_key,
            result.clone(),
            CacheTier::Static,
            None,
            &key.host,
        );
        Ok(result)
    }

    pub async fn search_content(&self, args: &Value) -> Result<Value, ToolError> {
        let query = self.validation.ensure_string(args.get("query"), "query")?;
        let path = self.validation.ensure_string(args.get("path"), "path")?;
        let command = build_search_command(&query, &path);

        let mut exec_args = args.clone();
        if let Value::Object(map) = &mut exec_args {
            map.insert("command".to_string(), Value::String(command));
            if !map.contains_key("token_mode") {
                map.insert("token_mode".to_string(), Value::String("truncate".to_string()));
            }
            if map.get("token_mode").and_then(|v| v.as_str()) == Some("truncate")
                && !map.contains_key("max_tokens")
            {
                map.insert(
                    "max_tokens".to_string(),
                    Value::Number((SEARCH_MAX_TOKENS as u64).into()),
                );
            }
        }
        self.execute(&exec_args).await
    }

    pub async fn health_check(&self, args: &Value) -> Result<Value, ToolError> {
        let (key, credential) = resolve_target(&self.validation, &self.keystore, args)?;
        let timeout = Duration::from_secs(self.settings.command_timeout_seconds);
        let raw = self
            .run_on_pool(&key, &credential, "echo ok", timeout)
            .await?;
        Ok(serde_json::json!({
            "ok": raw.exit_code == 0 && !raw.timed_out,
            "host": key.host,
            "stdout": raw.stdout.trim(),
            "stderr": raw.stderr.trim(),
            "duration_ms": raw.duration_ms as u64,
        }))
    }

    pub fn session_info(&self) -> Value {
        serde_json::json!({
            "cache": self.cache.info(crate::constants::cache::INFO_KEY_HEAD),
            "pool": self.pool.stats(),
            "interactive_sessions": self.sessions.describe(),
            "log": self.logger.stats(),
        })
    }

    pub fn clear_cache(&self, args: &Value) -> Result<Value, ToolError> {
        let host = self
            .validation
            .ensure_optional_string(args.get("host"), "host")?;
        let removed = match &host {
            Some(host) => self.cache.invalidate_host(host),
            None => self.cache.invalidate_all(),
        };
        Ok(serde_json::json!({
            "removed": removed,
            "host": host,
            "cache": self.cache.info(crate::constants::cache::INFO_KEY_HEAD),
        }))
    }

    fn command_timeout(&self, args: &Value) -> Result<Duration, ToolError> {
        let seconds = self
            .validation
            .ensure_positive_int(args.get("timeout_seconds"), "timeout_seconds")?
            .unwrap_or(self.settings.command_timeout_seconds);
        Ok(Duration::from_secs(seconds))
    }

    fn timed_out_error(
        &self,
        key: &HostKey,
        command: &str,
        raw: &RawExec,
        timeout: Duration,
    ) -> ToolError {
        ToolError::timed_out(format!(
            "Command exceeded {}s timeout",
            timeout.as_secs()
        ))
        .with_host(key.host.clone())
        .with_details(serde_json::json!({
            "command": command,
            "stdout": raw.stdout,
            "stderr": raw.stderr,
            "duration_ms": raw.duration_ms as u64,
        }))
    }

    async fn run_on_pool(
        &self,
        key: &HostKey,
        credential: &Credential,
        command: &str,
        timeout: Duration,
    ) -> Result<RawExec, ToolError> {
        let mut lease = self.pool.lease(key, credential).await?;
        let result = self
            .run_on_lease(&mut lease, command.to_string(), timeout)
            .await;
        match result {
            Ok(raw) => {
                lease.release();
                Ok(raw)
            }
            Err(err) => {
                lease.discard();
                Err(err)
            }
        }
    }

    /// Runs one command on the leased transport's own channel. The transport
    /// travels into the blocking pool and back; on a vanished transport the
    /// lease degrades to quota repair.
    async fn run_on_lease(
        &self,
        lease: &mut crate::services::pool::Lease<crate::services::connector::SshConnector>,
        command: String,
        timeout: Duration,
    ) -> Result<RawExec, ToolError> {
        let host = lease.key().host.clone();
        let transport = lease
            .take_transport()
            .ok_or_else(|| ToolError::execution("leased transport unavailable").with_host(host.clone()))?;
        self.logger.debug(
            "exec",
            Some(&serde_json::json!({"target": transport.key.to_string()})),
        );
        let joined = tokio::task::spawn_blocking(move || {
            let result = run_command_blocking(&transport.conn, &command, timeout);
            (transport, result)
        })
        .await;
        match joined {
            Ok((transport, result)) => {
                lease.put_back(transport);
                result.map_err(|err| err.with_host(host))
            }
            Err(_) => Err(ToolError::execution("exec task failed").with_host(host)),
        }
    }

    fn shape_result(
        &self,
        key: &HostKey,
        command: &str,
        raw: RawExec,
        spec: &ShapeSpec,
        warnings: &[String],
    ) -> Result<Value, ToolError> {
        let stdout = shaper::shape(&raw.stdout, spec)?;
        let stderr = shaper::shape(&raw.stderr, spec)?;
        Ok(serde_json::json!({
            "host": key.host,
            "port": key.port,
            "command": command,
            "exit_code": raw.exit_code,
            "stdout": stdout.text,
            "stderr": stderr.text,
            "duration_ms": raw.duration_ms as u64,
            "truncated": stdout.truncated || stderr.truncated,
            "token_mode": spec.mode.as_str(),
            "token_estimate": stdout.token_estimate,
            "warnings": warnings,
            "from_cache": false,
        }))
    }
}

fn build_search_command(query: &str, path: &str) -> String {
    format!(
        "grep -R -n --binary-files=without-match -- {} {} || true",
        shell_quote(query),
        shell_quote(path)
    )
}

/// One exec channel on an authenticated session: write the command, drain
/// stdout and stderr until EOF or deadline, then collect the exit status.
/// On timeout the channel is closed (the remote sees EOF/SIGHUP) but the
/// transport itself stays usable.
pub(crate) fn run_command_blocking(
    session: &Session,
    command: &str,
    timeout: Duration,
) -> Result<RawExec, ToolError> {
    session.set_blocking(true);
    let mut channel = session
        .channel_session()
        .map_err(|err| ToolError::execution(format!("Failed to open channel: {}", err)))?;
    channel
        .exec(command)
        .map_err(|err| ToolError::execution(format!("Failed to start command: {}", err)))?;
    session.set_blocking(false);

    let started = Instant::now();
    let mut stdout: Vec<u8> = Vec::new();
    let mut stderr: Vec<u8> = Vec::new();
    let mut buf = [0u8; READ_BUF_BYTES];
    let mut timed_out = false;

    loop {
        let mut progressed = false;
        match channel.read(&mut buf) {
            Ok(n) if n > 0 => {
                stdout.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => {
                session.set_blocking(true);
                return Err(ToolError::execution(format!("Channel read failed: {}", err)));
            }
        }
        match channel.stderr().read(&mut buf) {
            Ok(n) if n > 0 => {
                stderr.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => {}
        }

        if channel.eof() {
            break;
        }
        if started.elapsed() > timeout {
            timed_out = true;
            break;
        }
        if !progressed {
            std::thread::sleep(Duration::from_millis(POLL_SLEEP_MS));
        }
    }

    if timed_out {
        let _ = channel.close();
        let deadline = Instant::now() + Duration::from_millis(CLOSE_GRACE_MS);
        while Instant::now() < deadline && !channel.eof() {
            std::thread::sleep(Duration::from_millis(POLL_SLEEP_MS));
        }
    }

    let _ = channel.wait_close();
    let exit_code = i64::from(channel.exit_status().unwrap_or(-1));
    session.set_blocking(true);

    Ok(RawExec {
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        exit_code,
        timed_out,
        duration_ms: started.elapsed().as_millis(),
    })
}

/// Writes a small buffer to a remote path over SFTP.
fn upload_blob(
    session: &Session,
    remote_path: &str,
    bytes: &[u8],
    mode: i32,
) -> Result<(), ToolError> {
    use std::io::Write;
    session.set_blocking(true);
    let sftp = session
        .sftp()
        .map_err(|err| ToolError::transfer(format!("Failed to open SFTP channel: {}", err)))?;
    let mut file = sftp
        .open_mode(
            std::path::Path::new(remote_path),
            ssh2::OpenFlags::WRITE | ssh2::OpenFlags::CREATE | ssh2::OpenFlags::TRUNCATE,
            mode,
            ssh2::OpenType::File,
        )
        .map_err(|err| ToolError::transfer(format!("Failed to create {}: {}", remote_path, err)))?;
    file.write_all(bytes)
        .map_err(|err| ToolError::transfer(format!("Failed to write {}: {}", remote_path, err)))?;
    Ok(())
}
