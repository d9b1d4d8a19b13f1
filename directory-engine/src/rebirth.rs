use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use directory_types::topic::Address;
use log::debug;
use rand::Rng;
use tokio::time::Instant;

use crate::config::RebirthConfig;

/// Decides when unrecognised DATA should produce a rebirth request.
///
/// An address is first given a randomised window to rebirth on its own. If it is still not
/// online afterwards one request is sent, and no more for that address until the cooldown
/// has passed.
#[derive(Debug)]
pub struct RebirthDebouncer {
    config: RebirthConfig,
    pending: HashSet<Address>,
    sent: HashMap<Address, Instant>,
}

impl RebirthDebouncer {
    pub fn new(config: RebirthConfig) -> Self {
        Self {
            config,
            pending: HashSet::new(),
            sent: HashMap::new(),
        }
    }

    /// Called for DATA. Returns how long to wait before calling [Self::complete], or `None` if
    /// no rebirth should be considered.
    pub fn begin(&mut self, address: &Address, online: bool, now: Instant) -> Option<Duration> {
        if let Some(sent) = self.sent.get(address) {
            if now.duration_since(*sent) < self.config.cooldown {
                return None;
            }
            self.sent.remove(address);
        }
        if self.pending.contains(address) || online {
            return None;
        }
        self.pending.insert(address.clone());
        let window = self.window();
        debug!("Waiting {window:?} for {address} to rebirth");
        Some(window)
    }

    /// Called once the wait is over. Returns true if a rebirth request should be sent now.
    pub fn complete(&mut self, address: &Address, online: bool, now: Instant) -> bool {
        self.pending.remove(address);
        if online {
            return false;
        }
        self.sent.insert(address.clone(), now);
        true
    }

    fn window(&self) -> Duration {
        let RebirthConfig {
            window_min,
            window_max,
            ..
        } = self.config;
        if window_max <= window_min {
            return window_min;
        }
        rand::thread_rng().gen_range(window_min..=window_max)
    }
}
