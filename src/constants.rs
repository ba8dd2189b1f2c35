pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const TCP_CONNECT_TIMEOUT_MS: u64 = 10_000;
    pub const KEEPALIVE_INTERVAL_SECS: u32 = 30;
}

pub mod pool {
    pub const PER_HOST_MAX_CONNECTIONS: usize = 5;
    pub const IDLE_TTL_SECONDS: u64 = 300;
    pub const RETRY_COUNT: u32 = 3;
    pub const RETRY_DELAY_SECONDS: f64 = 1.0;
    pub const REAP_INTERVAL_MIN_SECONDS: u64 = 5;
    pub const REAP_INTERVAL_MAX_SECONDS: u64 = 60;
    pub const SHUTDOWN_GRACE_MS: u64 = 5_000;
    pub const SHUTDOWN_POLL_MS: u64 = 50;
}

pub mod exec {
    pub const COMMAND_TIMEOUT_SECONDS: u64 = 30;
    pub const CLOSE_GRACE_MS: u64 = 2_000;
    pub const POLL_SLEEP_MS: u64 = 20;
    pub const READ_BUF_BYTES: usize = 8192;
}

pub mod cache {
    pub const MAXSIZE: usize = 128;
    pub const STATIC_TTL_SECONDS: u64 = 3_600;
    pub const DYNAMIC_TTL_SECONDS: u64 = 120;
    pub const INFO_KEY_HEAD: usize = 50;
}

pub mod transfer {
    pub const CHUNK_SIZE_BYTES: usize = 32 * 1024;
    pub const PART_SUFFIX: &str = ".part";
    pub const NO_HASH_MARKER: &str = "__SSHMUX_NO_HASH__";
}

pub mod shaping {
    pub const TOKEN_BYTES: usize = 4;
    pub const SEARCH_MAX_TOKENS: usize = 800;
}

pub mod session {
    pub const IDLE_TTL_SECONDS: u64 = 300;
    pub const READ_TIMEOUT_SECONDS: u64 = 10;
    pub const QUIET_WINDOW_MS: u64 = 200;
    pub const SWEEP_INTERVAL_SECONDS: u64 = 30;
}

pub mod pagination {
    pub const DEFAULT_PAGE: usize = 1;
    pub const DEFAULT_PAGE_SIZE: usize = 100;
    pub const MAX_PAGE_SIZE: usize = 2_000;
}
