//! Per-IP throttling of unsolicited requests
//!
//! Each request from an IP adds to a saturating level that decays by one
//! per second. Above the limit, requests from that IP may still refresh a
//! known routing table entry but not add new ones.

use lru::LruCache;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Instant;

const INCREMENT: u32 = 10;
const SATURATION: u32 = 60;
const LIMIT: u32 = 30;
const TRACKED_IPS: usize = 4096;

struct Level {
    value: u32,
    updated: Instant,
}

pub(crate) struct Throttle {
    levels: Mutex<LruCache<IpAddr, Level>>,
}

impl Throttle {
    pub(crate) fn new() -> Self {
        let capacity = NonZeroUsize::new(TRACKED_IPS).unwrap_or(NonZeroUsize::MIN);
        Throttle {
            levels: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Register a request from `ip`; true if it is over the limit
    pub(crate) fn register(&self, ip: IpAddr) -> bool {
        self.register_at(ip, Instant::now())
    }

    fn register_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut levels = self.levels.lock().unwrap_or_else(|e| e.into_inner());
        let level = match levels.get_mut(&ip) {
            Some(level) => {
                let decay = now.saturating_duration_since(level.updated).as_secs();
                if decay > 0 {
                    level.value = level.value.saturating_sub(decay.min(u32::MAX as u64) as u32);
                    level.updated = now;
                }
                level.value = (level.value + INCREMENT).min(SATURATION);
                level.value
            }
            None => {
                levels.put(
                    ip,
                    Level {
                        value: INCREMENT,
                        updated: now,
                    },
                );
                INCREMENT
            }
        };
        level > LIMIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_burst_gets_throttled() {
        let throttle = Throttle::new();
        let ip: IpAddr = "10.0.0.9".parse().unwrap();
        let now = Instant::now();

        assert!(!throttle.register_at(ip, now));
        assert!(!throttle.register_at(ip, now));
        assert!(!throttle.register_at(ip, now));
        assert!(throttle.register_at(ip, now));

        let other: IpAddr = "10.0.0.10".parse().unwrap();
        assert!(!throttle.register_at(other, now));
    }

    #[test]
    fn test_level_decays() {
        let throttle = Throttle::new();
        let ip: IpAddr = "10.0.0.9".parse().unwrap();
        let now = Instant::now();
        for _ in 0..10 {
            throttle.register_at(ip, now);
        }
        assert!(throttle.register_at(ip, now));

        // saturated at 60, 40 seconds later it is back to 20 + 10
        assert!(!throttle.register_at(ip, now + Duration::from_secs(40)));
    }
}
