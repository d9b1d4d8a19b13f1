use std::time::Duration;

use directory_types::{constants::uuids, topic::Address};
use uuid::Uuid;

/// The directory's own place in the Sparkplug namespace.
///
/// With an identity the directory publishes a BIRTH, escalates rebirth requests through its own
/// DATA topic and publishes change notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// A Node level address.
    pub address: Address,
    pub device: Uuid,
    /// Advertised as `Service_URL` in the BIRTH.
    pub service_url: Option<String>,
}

impl Identity {
    pub fn new<S1: Into<String>, S2: Into<String>>(group: S1, node: S2, device: Uuid) -> Self {
        Self {
            address: Address::node(group, node),
            device,
            service_url: None,
        }
    }

    pub fn with_service_url<S: Into<String>>(mut self, url: S) -> Self {
        self.service_url = Some(url.into());
        self
    }
}

/// Schemas recognised when walking a cooperating BIRTH
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaConfig {
    pub alert: Uuid,
    /// Links are not extracted without one.
    pub link: Option<Uuid>,
    pub service: Uuid,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            alert: uuids::SCHEMA_ALERT,
            link: None,
            service: uuids::SCHEMA_SERVICE,
        }
    }
}

/// Rebirth request debouncing
#[derive(Debug, Clone, PartialEq)]
pub struct RebirthConfig {
    pub enabled: bool,
    /// Shortest wait before deciding an address needs a rebirth.
    pub window_min: Duration,
    pub window_max: Duration,
    /// Minimum time between requests for the same address.
    pub cooldown: Duration,
}

impl Default for RebirthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_min: Duration::from_secs(5),
            window_max: Duration::from_secs(10),
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryConfig {
    pub identity: Option<Identity>,
    /// Monitor only: ingest but never publish.
    pub silent: bool,
    pub schemas: SchemaConfig,
    pub rebirth: RebirthConfig,
}

impl DirectoryConfig {
    /// The identity to publish as, if the directory publishes at all.
    pub fn publishing_identity(&self) -> Option<&Identity> {
        self.identity.as_ref().filter(|_| !self.silent)
    }

    pub fn sends_rebirths(&self) -> bool {
        self.rebirth.enabled && !self.silent
    }
}
