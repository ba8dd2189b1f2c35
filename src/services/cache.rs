use crate::services::shaper::ShapeSpec;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Commands that mutate remote state must never be served from cache, even
/// when the caller opts in.
static WRITE_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)\b(
        rm|rmdir|mv|cp|dd|truncate|touch|chmod|chown|chgrp|
        sed|perl|python|tee|
        apt|apt-get|yum|dnf|pacman|systemctl|service|
        useradd|userdel|usermod|groupadd|groupdel|groupmod|
        iptables|ufw|firewall-cmd|
        reboot|shutdown
        )\b",
    )
    .expect("write-command pattern")
});

static SHELL_REDIRECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[<>]{1,2}|\|\s*tee\b").expect("redirect pattern"));

static SED_INPLACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsed\b.*\s-i(\s|$)").expect("sed pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Static,
    Dynamic,
}

impl CacheTier {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("static") => CacheTier::Static,
            _ => CacheTier::Dynamic,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheTier::Static => "static",
            CacheTier::Dynamic => "dynamic",
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
    tier: CacheTier,
    host: String,
    last_used: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    recency: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Two-tier TTL+LRU store for shaped command results. Static entries are
/// only evicted once the dynamic tier is empty.
pub struct ResultCache {
    maxsize: usize,
    static_ttl: Duration,
    dynamic_ttl: Duration,
    inner: Mutex<Inner>,
}

impl ResultCache {
    pub fn new(maxsize: usize, static_ttl: Duration, dynamic_ttl: Duration) -> Self {
        Self {
            maxsize: maxsize.max(1),
            static_ttl,
            dynamic_ttl,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn should_cache_command(command: &str) -> bool {
        let cmd = command.trim();
        if cmd.is_empty() {
            return false;
        }
        if SED_INPLACE.is_match(cmd) {
            return false;
        }
        if SHELL_REDIRECT.is_match(cmd) {
            return false;
        }
        !WRITE_COMMAND.is_match(cmd)
    }

    /// Key digest over target, canonicalized command and shaping spec.
    /// Credentials are deliberately excluded: the same command on the same
    /// (host, port, username) produces the same output regardless of how the
    /// caller authenticated.
    pub fn build_key(host: &str, port: u16, username: &str, command: &str, spec: &ShapeSpec) -> String {
        let payload = serde_json::json!({
            "host": host,
            "port": port,
            "username": username,
            "command": command.trim(),
            "shaping": spec.cache_fragment(),
        });
        let mut hasher = Sha256::new();
        hasher.update(stable_stringify(&payload).as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn default_ttl(&self, tier: CacheTier) -> Duration {
        match tier {
            CacheTier::Static => self.static_ttl,
            CacheTier::Dynamic => self.dynamic_ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let expired = matches!(inner.entries.get(key), Some(entry) if entry.expires_at <= now);
        if expired {
            inner.entries.remove(key);
            inner.misses += 1;
            return None;
        }
        let Some(value) = inner.entries.get(key).map(|entry| entry.value.clone()) else {
            inner.misses += 1;
            return None;
        };
        inner.recency += 1;
        let recency = inner.recency;
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.last_used = recency;
        }
        inner.hits += 1;
        Some(value)
    }

    pub fn put(&self, key: &str, value: Value, tier: CacheTier, ttl: Option<Duration>, host: &str) {
        let ttl = ttl.unwrap_or_else(|| self.default_ttl(tier));
        if ttl.is_zero() {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        inner.recency += 1;
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
            tier,
            host: host.to_string(),
            last_used: inner.recency,
        };
        inner.entries.insert(key.to_string(), entry);
        self.evict_over_capacity(&mut inner);
    }

    fn evict_over_capacity(&self, inner: &mut Inner) {
        while inner.entries.len() > self.maxsize {
            let victim = Self::lru_key(inner, CacheTier::Dynamic)
                .or_else(|| Self::lru_key(inner, CacheTier::Static));
            match victim {
                Some(key) => {
                    inner.entries.remove(&key);
                    inner.evictions += 1;
                }
                None => break,
            }
        }
    }

    fn lru_key(inner: &Inner, tier: CacheTier) -> Option<String> {
        inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.tier == tier)
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
    }

    pub fn invalidate_host(&self, host: &str) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.host != host);
        before - inner.entries.len()
    }

    pub fn invalidate_all(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let removed = inner.entries.len();
        inner.entries.clear();
        removed
    }

    pub fn info(&self, head: usize) -> Value {
        let now = Instant::now();
        let inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        let mut keys: Vec<(&String, u64)> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at > now)
            .map(|(key, entry)| (key, entry.last_used))
            .collect();
        keys.sort_by_key(|(_, last_used)| std::cmp::Reverse(*last_used));
        let keys: Vec<String> = keys.into_iter().take(head).map(|(k, _)| k.clone()).collect();
        serde_json::json!({
            "maxsize": self.maxsize,
            "size": inner.entries.len(),
            "hits": inner.hits,
            "misses": inner.misses,
            "evictions": inner.evictions,
            "keys": keys,
        })
    }
}

fn stable_stringify(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_else(|_| s.clone()),
        Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(stable_stringify).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(key).unwrap_or_default(),
                        stable_stringify(&map[*key])
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
    }
}
