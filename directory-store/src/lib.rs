//! Part of the Sparkplug directory.
//!
//! This library defines the directory's persistent model: device sessions, alerts, links and
//! service providers, behind the [Store] and [Queries] traits.
//!
//! Two backends are provided. [PgStore] keeps the model in PostgreSQL and reports row changes
//! through `LISTEN`/`NOTIFY`. [MemoryStore] keeps it in process with the same semantics.

mod error;
mod memory;
mod notification;
mod postgres;
mod queries;
mod types;

pub use error::{Error, Result};
pub use memory::{MemoryStore, MemoryTxn};
pub use notification::{tables, Notification, NotificationError, CHANNEL};
pub use postgres::{PgConnectionManager, PgPool, PgQueries, PgStore};
pub use queries::{txn, DynStore, Queries, Store, TxnWork};
pub use types::*;
