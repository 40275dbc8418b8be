//! Fixed-window rate limiting.
//!
//! Three independent pools: privileged relay operations, plain reads, and
//! the low-level rpc proxy. Counters are memory-only; losing them on a
//! restart is safe, unlike the used-reference store.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Deserialize;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct WindowConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pool {
    Relay,
    Read,
    Proxy,
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    count: u32,
    window_reset_at: u64,
}

pub struct RateLimiter {
    relay: WindowConfig,
    read: WindowConfig,
    proxy: WindowConfig,
    entries: Mutex<HashMap<(Pool, String), Entry>>,
}

impl RateLimiter {
    pub fn new(relay: WindowConfig, read: WindowConfig, proxy: WindowConfig) -> Self {
        Self {
            relay,
            read,
            proxy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn config(&self, pool: Pool) -> WindowConfig {
        match pool {
            Pool::Relay => self.relay,
            Pool::Read => self.read,
            Pool::Proxy => self.proxy,
        }
    }

    /// Consume one unit for `key` in `pool`, or report how long until the
    /// window resets.
    pub fn hit(&self, pool: Pool, key: &str) -> Result<(), u64> {
        self.hit_at(pool, key, unix_now())
    }

    fn hit_at(&self, pool: Pool, key: &str, now: u64) -> Result<(), u64> {
        let config = self.config(pool);
        let mut entries = self.entries.lock().expect("rate limiter poisoned");
        let entry = entries
            .entry((pool, key.to_string()))
            .or_insert(Entry {
                count: 0,
                window_reset_at: now + config.window_secs,
            });

        if now >= entry.window_reset_at {
            entry.count = 0;
            entry.window_reset_at = now + config.window_secs;
        }
        if entry.count >= config.max_requests {
            return Err((entry.window_reset_at.saturating_sub(now)).max(1));
        }
        entry.count += 1;
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
