//! Last fetched host map

use parking_lot::Mutex;
use portgroup_common::HostMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of the current instant, injectable for tests
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Holds the most recent host map.
///
/// `/hosts.json` refreshes it, port-group lookups read it and re-registration
/// clears it. With a TTL, an entry older than the TTL reads as empty.
///
/// Each invalidation starts a new generation. A fetch records the generation
/// it started in and its result is only stored if no invalidation happened
/// since.
pub struct HostCache {
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    generation: u64,
    entry: Option<(Instant, HostMap)>,
}

impl HostCache {
    pub fn new(ttl: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn get(&self) -> Option<HostMap> {
        let state = self.state.lock();
        let (stored_at, hosts) = state.entry.as_ref()?;
        if let Some(ttl) = self.ttl {
            if self.clock.now().saturating_duration_since(*stored_at) >= ttl {
                return None;
            }
        }
        Some(hosts.clone())
    }

    /// Store `hosts` fetched during `generation`. Returns false, storing
    /// nothing, when the cache was invalidated after that fetch began.
    pub fn store(&self, generation: u64, hosts: HostMap) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        state.entry = Some((self.clock.now(), hosts));
        true
    }

    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.entry = None;
    }
}
