use chrono::{DateTime, Utc};
use directory_types::topic::Address;
use uuid::Uuid;

/// A database row id
pub type Id = i32;

/// Tables holding nothing but a UUID identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Device,
    Schema,
    Service,
    AlertType,
    LinkRel,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Device => "device",
            Table::Schema => "schema",
            Table::Service => "service",
            Table::AlertType => "alert_type",
            Table::LinkRel => "link_rel",
        }
    }
}

/// A new session to open for a device at an address
#[derive(Debug, Clone)]
pub struct BirthRecord {
    pub device: Id,
    pub address: Id,
    pub time: DateTime<Utc>,
    pub top_schema: Option<Uuid>,
}

/// A session closed by a DEATH
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedSession {
    pub device: Uuid,
    pub address: Address,
}

/// An alert as declared in a BIRTH
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub uuid: Uuid,
    pub alert_type: Uuid,
    pub metric: String,
    pub active: bool,
    pub stamp: DateTime<Utc>,
    /// UUIDs of links nested under the alert.
    pub links: Vec<Uuid>,
}

/// A link as declared in a BIRTH
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRecord {
    pub uuid: Uuid,
    /// The instance the link hangs from.
    pub source: Uuid,
    pub relation: Uuid,
    pub target: Uuid,
}

/// A service advertised by a device
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRecord {
    pub service: Uuid,
    pub device: Uuid,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Id,
    pub device: Uuid,
    pub address: Address,
    pub start: DateTime<Utc>,
    pub finish: Option<DateTime<Utc>>,
    pub top_schema: Option<Uuid>,
    pub next_for_device: Option<Id>,
    pub next_for_address: Option<Id>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.finish.is_none()
    }

    pub fn is_current_for_device(&self) -> bool {
        self.next_for_device.is_none()
    }

    pub fn is_current_for_address(&self) -> bool {
        self.next_for_address.is_none()
    }
}

/// What the change notifier needs to know about a session row
#[derive(Debug, Clone, PartialEq)]
pub struct SessionNotificationInfo {
    pub device: Uuid,
    pub address: Address,
    pub next_for_device: Option<Id>,
    pub next_for_address: Option<Id>,
    pub prev_for_device: Option<Id>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub uuid: Uuid,
    pub device: Uuid,
    pub alert_type: Uuid,
    pub metric: String,
    pub active: bool,
    pub last_change: DateTime<Utc>,
    pub stale: bool,
    /// Sorted link UUIDs.
    pub links: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertSummary {
    pub uuid: Uuid,
    pub alert_type: Uuid,
}

/// Selects non-stale alerts. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub active_only: bool,
    pub types: Option<Vec<Uuid>>,
    pub devices: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub uuid: Uuid,
    pub device: Uuid,
    pub source: Uuid,
    pub relation: Uuid,
    pub target: Uuid,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkSummary {
    pub uuid: Uuid,
    pub relation: Uuid,
}

/// Selects non-stale links. Unset fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct LinkFilter {
    pub device: Option<Uuid>,
    pub relation: Option<Uuid>,
    pub target: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceProvider {
    pub device: Uuid,
    pub url: Option<String>,
}
