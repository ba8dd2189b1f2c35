use crate::config::Settings;
use crate::errors::ToolError;
use crate::managers::directory::DirectoryManager;
use crate::managers::ssh::SshManager;
use crate::managers::transfer::TransferManager;
use crate::services::cache::ResultCache;
use crate::services::connector::SshConnector;
use crate::services::keystore::CredentialStore;
use crate::services::logger::Logger;
use crate::services::pool::ConnectionPool;
use crate::services::security::SafetyGate;
use crate::services::sessions::{SessionRegistry, SshPool};
use crate::services::validation::Validation;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// Root context object. Pool, cache and session registry are singletons per
/// process; everything reaches them through here, never through globals.
pub struct App {
    pub logger: Logger,
    pub settings: Settings,
    pub pool: SshPool,
    pub cache: Arc<ResultCache>,
    pub keystore: Arc<CredentialStore>,
    pub sessions: Arc<SessionRegistry>,
    pub ssh_manager: SshManager,
    pub transfer_manager: TransferManager,
    pub directory_manager: DirectoryManager,
    background: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl App {
    pub fn initialize() -> Result<Self, ToolError> {
        let settings = Settings::load()?;
        Self::with_settings(settings)
    }

    pub fn with_settings(settings: Settings) -> Result<Self, ToolError> {
        let logger = Logger::new("sshmux", &settings.log_level);
        let validation = Validation::new();

        let gate = Arc::new(SafetyGate::new(
            settings.allowlist_only,
            &settings.allowlist_patterns,
        )?);
        let cache = Arc::new(ResultCache::new(
            settings.cache_maxsize,
            Duration::from_secs(settings.static_ttl_seconds),
            Duration::from_secs(settings.dynamic_ttl_seconds),
        ));
        let keystore = Arc::new(CredentialStore::new());

        let connector = SshConnector::new(settings.known_hosts_policy, logger.clone());
        let pool: SshPool = ConnectionPool::new(
            connector,
            settings.per_host_max_connections,
            Duration::from_secs(settings.idle_connection_ttl_seconds),
            settings.connection_retry_count,
            Duration::from_secs_f64(settings.connection_retry_delay_seconds.max(0.0)),
            logger.clone(),
        );
        let sessions = Arc::new(SessionRegistry::new(
            pool.clone(),
            Duration::from_secs(settings.session_idle_ttl_seconds),
            Duration::from_secs(settings.session_read_timeout_seconds),
            logger.clone(),
        ));

        let ssh_manager = SshManager::new(
            logger.clone(),
            settings.clone(),
            validation.clone(),
            pool.clone(),
            cache.clone(),
            gate,
            keystore.clone(),
            sessions.clone(),
        );
        let transfer_manager = TransferManager::new(
            logger.clone(),
            settings.clone(),
            validation.clone(),
            pool.clone(),
            keystore.clone(),
        );
        let directory_manager = DirectoryManager::new(
            logger.clone(),
            settings.clone(),
            validation,
            pool.clone(),
            keystore.clone(),
            sessions.clone(),
        );

        Ok(Self {
            logger,
            settings,
            pool,
            cache,
            keystore,
            sessions,
            ssh_manager,
            transfer_manager,
            directory_manager,
            background: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the idle reaper and the session sweeper. Safe to skip in
    /// short-lived embeddings (tests drive the passes directly).
    pub fn start_background_tasks(&self) {
        let mut handles = self.background.lock().unwrap_or_else(|e| e.into_inner());
        handles.push(self.pool.spawn_reaper());
        handles.push(self.sessions.spawn_sweeper());
    }

    /// First-class shutdown: stop the periodic tasks, close interactive
    /// sessions (returning their pinned transports), then drain the pool.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = {
            let mut guard = self.background.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            handle.abort();
        }
        let closed = self.sessions.close_all().await;
        if closed > 0 {
            self.logger.info(
                "closed interactive sessions",
                Some(&serde_json::json!({"count": closed})),
            );
        }
        self.pool.shutdown().await;
    }
}
