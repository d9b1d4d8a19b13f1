//! An in-memory [Store] with the same semantics as the PostgreSQL one.
//!
//! Used to test the engine without a database, and usable for a directory that does not need
//! its history to outlive the process.

mod tables;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directory_types::topic::Address;
use log::trace;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::{
    error::Result,
    notification::Notification,
    queries::{Queries, Store, TxnWork},
    types::{
        Alert, AlertFilter, AlertRecord, AlertSummary, BirthRecord, ClosedSession, Id, Link,
        LinkFilter, LinkRecord, LinkSummary, ServiceProvider, ServiceRecord, Session,
        SessionNotificationInfo, Table,
    },
};

use tables::{Changes, Tables};

/// An in-memory store.
///
/// Cloning gives another handle onto the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    notify: Option<mpsc::UnboundedSender<Notification>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that reports changed rows, the way the database triggers do.
    pub fn with_notifications() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tables: Arc::default(),
                notify: Some(tx),
            },
            rx,
        )
    }

    fn publish(&self, changes: Changes) {
        let Some(notify) = &self.notify else {
            return;
        };
        for change in changes {
            trace!("notify {change}");
            _ = notify.send(change);
        }
    }

    async fn access<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tables, &mut Changes) -> Result<T> + Send,
    {
        let mut changes = Changes::new();
        let result = {
            let mut tables = self.tables.lock().await;
            // a failed statement leaves no trace, as in the database
            let mut working = tables.clone();
            let result = f(&mut working, &mut changes)?;
            *tables = working;
            result
        };
        self.publish(changes);
        Ok(result)
    }

    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tables) -> Result<T> + Send,
    {
        f(&*self.tables.lock().await)
    }
}

struct Snapshot {
    tables: Tables,
    changes: Changes,
}

/// The [Queries] handle passed to transaction work.
pub struct MemoryTxn {
    state: Mutex<Snapshot>,
}

impl MemoryTxn {
    async fn access<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tables, &mut Changes) -> Result<T> + Send,
    {
        let mut state = self.state.lock().await;
        let Snapshot { tables, changes } = &mut *state;
        f(tables, changes)
    }

    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tables) -> Result<T> + Send,
    {
        f(&self.state.lock().await.tables)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn transaction(&self, work: TxnWork) -> Result<()> {
        let mut live = self.tables.lock().await;
        let txn = MemoryTxn {
            state: Mutex::new(Snapshot {
                tables: live.clone(),
                changes: Changes::new(),
            }),
        };
        work(&txn).await?;

        let Snapshot { tables, changes } = txn.state.into_inner();
        *live = tables;
        drop(live);
        self.publish(changes);
        Ok(())
    }
}

macro_rules! memory_queries {
    (
        $ty:ty;
        write { $( fn $wname:ident(&self $(, $warg:ident: $wty:ty)*) -> $wret:ty; )* }
        read { $( fn $rname:ident(&self $(, $rarg:ident: $rty:ty)*) -> $rret:ty; )* }
    ) => {
        #[async_trait]
        impl Queries for $ty {
            $(
                async fn $wname(&self $(, $warg: $wty)*) -> Result<$wret> {
                    self.access(|tables, changes| tables.$wname(changes $(, $warg)*)).await
                }
            )*
            $(
                async fn $rname(&self $(, $rarg: $rty)*) -> Result<$rret> {
                    self.read(|tables| tables.$rname($($rarg),*)).await
                }
            )*
        }
    };
}

macro_rules! memory_backend {
    ($($ty:ty),*) => {
        $(
            memory_queries! {
                $ty;
                write {
                    fn find_or_create(&self, table: Table, uuid: Uuid) -> Id;
                    fn find_or_create_address(&self, address: &Address) -> Id;
                    fn find_or_create_missing_uuid(&self, address: Id) -> Uuid;
                    fn record_birth(&self, birth: &BirthRecord) -> Id;
                    fn record_schema(&self, session: Id, schema: Uuid) -> ();
                    fn record_death(&self, address: &Address, time: DateTime<Utc>) -> Vec<ClosedSession>;
                    fn record_link(&self, device: Id, link: &LinkRecord) -> ();
                    fn record_stale_links(&self, device: Id, valid: &[Uuid]) -> u64;
                    fn record_alert(&self, device: Id, alert: &AlertRecord) -> ();
                    fn record_stale_alerts(&self, device: Id, valid: &[Uuid]) -> u64;
                    fn update_alert_active(&self, uuid: Uuid, active: bool, stamp: DateTime<Utc>) -> bool;
                    fn record_service(&self, service: &ServiceRecord) -> bool;
                }
                read {
                    fn alert_list(&self, filter: &AlertFilter) -> Vec<Alert>;
                    fn alert_by_uuid(&self, uuid: Uuid) -> Option<Alert>;
                    fn alert_by_id(&self, id: Id) -> Option<AlertSummary>;
                    fn link_list(&self, filter: &LinkFilter) -> Vec<Link>;
                    fn link_by_uuid(&self, uuid: Uuid) -> Option<Link>;
                    fn link_by_id(&self, id: Id) -> Option<LinkSummary>;
                    fn address_device(&self, address: &Address) -> Option<Uuid>;
                    fn device_sessions(&self, device: Uuid) -> Vec<Session>;
                    fn address_sessions(&self, address: &Address) -> Vec<Session>;
                    fn session_notification_info(&self, id: Id) -> Option<SessionNotificationInfo>;
                    fn session_schemas(&self, id: Id) -> Vec<Uuid>;
                    fn schema_devices(&self, schema: Uuid) -> Vec<Uuid>;
                    fn service_providers(&self, service: Uuid) -> Vec<ServiceProvider>;
                    fn service_from_provider(&self, id: Id) -> Option<Uuid>;
                }
            }
        )*
    };
}

memory_backend!(MemoryStore, MemoryTxn);
