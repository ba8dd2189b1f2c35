use crate::constants::exec::{POLL_SLEEP_MS, READ_BUF_BYTES};
use crate::constants::session::{QUIET_WINDOW_MS, SWEEP_INTERVAL_SECONDS};
use crate::errors::ToolError;
use crate::services::connector::SshConnector;
use crate::services::keystore::Credential;
use crate::services::logger::Logger;
use crate::services::pool::{ConnectionPool, HostKey, Lease, Transport};
use dashmap::DashMap;
use ssh2::{Channel, Session};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub type SshPool = ConnectionPool<SshConnector>;
type SshLease = Lease<SshConnector>;
type SshTransport = Transport<Session>;

/// A persistent shell bound to a transport pinned for the session's
/// lifetime. The pinned transport still counts against the host quota.
struct ShellSession {
    lease: SshLease,
    transport: SshTransport,
    channel: Channel,
}

struct SessionSlot {
    key: HostKey,
    created_at: Instant,
    idle_ttl: Duration,
    /// Millis since registry epoch; updated by every successful send.
    last_activity_ms: AtomicU64,
    /// `try_lock` failure is exactly the SessionBusy condition: sends on one
    /// session are serialized, never queued.
    state: Mutex<Option<ShellSession>>,
}

/// Registry of long-lived interactive sessions, keyed by opaque ids.
pub struct SessionRegistry {
    pool: SshPool,
    logger: Logger,
    sessions: DashMap<String, Arc<SessionSlot>>,
    epoch: Instant,
    default_idle_ttl: Duration,
    default_read_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(
        pool: SshPool,
        default_idle_ttl: Duration,
        default_read_timeout: Duration,
        logger: Logger,
    ) -> Self {
        Self {
            pool,
            logger: logger.child("sessions"),
            sessions: DashMap::new(),
            epoch: Instant::now(),
            default_idle_ttl,
            default_read_timeout,
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn default_read_timeout(&self) -> Duration {
        self.default_read_timeout
    }

    /// Opens a shell on a freshly leased transport and registers it under a
    /// new unguessable id.
    pub async fn open(
        &self,
        key: HostKey,
        credential: &Credential,
        idle_ttl: Option<Duration>,
    ) -> Result<String, ToolError> {
        let mut lease = self.pool.lease(&key, credential).await?;
        let transport = lease
            .take_transport()
            .ok_or_else(|| ToolError::execution("leased transport unavailable"))?;

        let opened = tokio::task::spawn_blocking(move || {
            let result = open_shell(&transport);
            (transport, result)
        })
        .await
        .map_err(|_| ToolError::execution("shell setup task failed").with_host(key.host.clone()))?;

        let (transport, result) = opened;
        let channel = match result {
            Ok(channel) => channel,
            Err(err) => {
                lease.put_back(transport);
                lease.discard();
                return Err(err.with_host(key.host.clone()));
            }
        };

        let session_id = uuid::Uuid::new_v4().simple().to_string();
        let slot = Arc::new(SessionSlot {
            key: key.clone(),
            created_at: Instant::now(),
            idle_ttl: idle_ttl.unwrap_or(self.default_idle_ttl),
            last_activity_ms: AtomicU64::new(self.now_ms()),
            state: Mutex::new(Some(ShellSession {
                lease,
                transport,
                channel,
            })),
        });
        self.sessions.insert(session_id.clone(), slot);
        self.logger.info(
            "session opened",
            Some(&serde_json::json!({"session_id": session_id, "target": key.to_string()})),
        );
        Ok(session_id)
    }

    /// Writes `input` to the shell and reads whatever arrives within
    /// `read_timeout`. stdout and stderr are drained in the same loop so a
    /// chatty stderr can never stall stdout consumption.
    pub async fn send(
        &self,
        session_id: &str,
        input: &str,
        read_timeout: Option<Duration>,
    ) -> Result<serde_json::Value, ToolError> {
        let slot = self
            .sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| unknown_session(session_id))?;

        let mut guard = slot
            .state
            .try_lock()
            .map_err(|_| ToolError::session_busy(format!(
                "Session {} is already executing a send",
                session_id
            )))?;
        let mut shell = guard.take().ok_or_else(|| unknown_session(session_id))?;

        let input = input.to_string();
        let timeout = read_timeout.unwrap_or(self.default_read_timeout);
        let (shell_back, result) = tokio::task::spawn_blocking(move || {
            let result = shell_io(&mut shell, &input, timeout);
            (shell, result)
        })
        .await
        .map_err(|_| ToolError::execution("session io task failed"))?;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                // A broken channel ends the session; the transport is not
                // returned to the idle set.
                let ShellSession {
                    mut lease,
                    transport,
                    channel,
                } = shell_back;
                drop(channel);
                lease.put_back(transport);
                lease.discard();
                drop(guard);
                self.sessions.remove(session_id);
                return Err(err.with_host(slot.key.host.clone()));
            }
        };

        *guard = Some(shell_back);
        // strictly later than the previous value, even within one tick
        let prev = slot.last_activity_ms.load(Ordering::SeqCst);
        slot.last_activity_ms
            .store(self.now_ms().max(prev + 1), Ordering::SeqCst);
        Ok(serde_json::json!({
            "session_id": session_id,
            "stdout": output.0,
            "stderr": output.1,
        }))
    }

    /// Closes the shell and returns the pinned transport to the pool.
    pub async fn close(&self, session_id: &str) -> Result<(), ToolError> {
        let (_, slot) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| unknown_session(session_id))?;

        // Waits for an in-flight send rather than racing it.
        let mut guard = slot.state.lock().await;
        let Some(shell) = guard.take() else {
            return Ok(());
        };
        drop(guard);

        let ShellSession {
            mut lease,
            transport,
            mut channel,
        } = shell;
        let transport = tokio::task::spawn_blocking(move || {
            let _ = channel.send_eof();
            let _ = channel.close();
            transport
        })
        .await
        .map_err(|_| ToolError::execution("session close task failed"))?;

        lease.put_back(transport);
        lease.release();
        self.logger.info(
            "session closed",
            Some(&serde_json::json!({"session_id": session_id})),
        );
        Ok(())
    }

    /// Sweeps sessions idle beyond their ttl. Returns closed session ids.
    pub async fn close_expired(&self) -> Vec<String> {
        let now = self.now_ms();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                let slot = entry.value();
                let idle = now.saturating_sub(slot.last_activity_ms.load(Ordering::SeqCst));
                idle > slot.idle_ttl.as_millis() as u64
            })
            .map(|entry| entry.key().clone())
            .collect();
        let mut closed = Vec::new();
        for session_id in expired {
            if self.close(&session_id).await.is_ok() {
                self.logger.info(
                    "session expired",
                    Some(&serde_json::json!({"session_id": session_id})),
                );
                closed.push(session_id);
            }
        }
        closed
    }

    pub async fn close_all(&self) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for session_id in ids {
            if self.close(&session_id).await.is_ok() {
                closed += 1;
            }
        }
        closed
    }

    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(SWEEP_INTERVAL_SECONDS)).await;
                let _ = registry.close_expired().await;
            }
        })
    }

    pub fn describe(&self) -> serde_json::Value {
        let sessions: Vec<serde_json::Value> = self
            .sessions
            .iter()
            .map(|entry| {
                let slot = entry.value();
                serde_json::json!({
                    "session_id": entry.key(),
                    "target": slot.key.to_string(),
                    "age_seconds": slot.created_at.elapsed().as_secs(),
                    "idle_ttl_seconds": slot.idle_ttl.as_secs(),
                })
            })
            .collect();
        serde_json::json!({"count": sessions.len(), "sessions": sessions})
    }
}

fn unknown_session(session_id: &str) -> ToolError {
    ToolError::session_not_found(format!("Unknown session id: {}", session_id))
}

fn open_shell(transport: &SshTransport) -> Result<Channel, ToolError> {
    let session = &transport.conn;
    session.set_blocking(true);
    let mut channel = session
        .channel_session()
        .map_err(|err| ToolError::execution(format!("Failed to open shell channel: {}", err)))?;
    channel
        .request_pty("xterm", None, None)
        .map_err(|err| ToolError::execution(format!("Failed to request pty: {}", err)))?;
    channel
        .shell()
        .map_err(|err| ToolError::execution(format!("Failed to start shell: {}", err)))?;
    Ok(channel)
}

/// Write-then-drain. Reads stop once output has been quiet for a short
/// window, the timeout elapses, or the channel reaches EOF.
fn shell_io(
    shell: &mut ShellSession,
    input: &str,
    read_timeout: Duration,
) -> Result<(String, String), ToolError> {
    let session = &shell.transport.conn;
    session.set_blocking(true);
    shell
        .channel
        .write_all(input.as_bytes())
        .map_err(|err| ToolError::execution(format!("Failed to write to shell: {}", err)))?;
    let _ = shell.channel.flush();

    session.set_blocking(false);
    let started = Instant::now();
    let quiet_window = Duration::from_millis(QUIET_WINDOW_MS);
    let mut last_data: Option<Instant> = None;
    let mut stdout: Vec<u8> = Vec::new();
    let mut stderr: Vec<u8> = Vec::new();
    let mut buf = [0u8; READ_BUF_BYTES];

    loop {
        let mut progressed = false;
        match shell.channel.read(&mut buf) {
            Ok(n) if n > 0 => {
                stdout.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => {
                session.set_blocking(true);
                return Err(ToolError::execution(format!("Shell read failed: {}", err)));
            }
        }
        match shell.channel.stderr().read(&mut buf) {
            Ok(n) if n > 0 => {
                stderr.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => {}
        }

        let now = Instant::now();
        if progressed {
            last_data = Some(now);
        }
        if shell.channel.eof() {
            break;
        }
        if now.duration_since(started) >= read_timeout {
            break;
        }
        if let Some(last) = last_data {
            if now.duration_since(last) >= quiet_window {
                break;
            }
        }
        if !progressed {
            std::thread::sleep(Duration::from_millis(POLL_SLEEP_MS));
        }
    }
    session.set_blocking(true);

    Ok((
        String::from_utf8_lossy(&stdout).to_string(),
        String::from_utf8_lossy(&stderr).to_string(),
    ))
}
