use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::types::Id;

/// The channel row change notifications are published on
pub const CHANNEL: &str = "mqtt";

pub mod tables {
    pub const ALERT: &str = "alert";
    pub const LINK: &str = "link";
    pub const SESSION: &str = "session";
    pub const SERVICE_PROVIDER: &str = "service_provider";
}

#[derive(Error, Debug, PartialEq)]
pub enum NotificationError {
    #[error("notification payload has no ':' separator")]
    MissingSeparator,
    #[error("bad row id '{0}'")]
    BadId(String),
}

/// A changed row, as `<table>:<id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub table: String,
    pub id: Id,
}

impl Notification {
    pub fn new<S: Into<String>>(table: S, id: Id) -> Self {
        Self {
            table: table.into(),
            id,
        }
    }
}

impl FromStr for Notification {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (table, id) = s
            .split_once(':')
            .ok_or(NotificationError::MissingSeparator)?;
        let id = id
            .parse()
            .map_err(|_| NotificationError::BadId(id.to_string()))?;
        Ok(Self::new(table, id))
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.id)
    }
}
