use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directory_types::topic::Address;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    error::Result,
    types::{
        Alert, AlertFilter, AlertRecord, AlertSummary, BirthRecord, ClosedSession, Id, Link,
        LinkFilter, LinkRecord, LinkSummary, ServiceProvider, ServiceRecord, Session,
        SessionNotificationInfo, Table,
    },
};

/// The storage operations, available both on a [Store] and inside one of its transactions.
///
/// Every write is idempotent: repeating it with the same arguments changes nothing further.
#[async_trait]
pub trait Queries: Send + Sync {
    /// Find the row for `uuid` in one of the identity tables, inserting it if needed.
    async fn find_or_create(&self, table: Table, uuid: Uuid) -> Result<Id>;

    async fn find_or_create_address(&self, address: &Address) -> Result<Id>;

    /// The placeholder device UUID for an address whose BIRTH named no device.
    ///
    /// Generated on first use and stable afterwards.
    async fn find_or_create_missing_uuid(&self, address: Id) -> Result<Uuid>;

    /// Open a session, superseding the current session of both the device and the address.
    async fn record_birth(&self, birth: &BirthRecord) -> Result<Id>;

    async fn record_schema(&self, session: Id, schema: Uuid) -> Result<()>;

    /// Close every open session at `address`. A Node address also closes its devices' sessions.
    async fn record_death(
        &self,
        address: &Address,
        time: DateTime<Utc>,
    ) -> Result<Vec<ClosedSession>>;

    async fn record_link(&self, device: Id, link: &LinkRecord) -> Result<()>;

    /// Mark stale the device's links not in `valid`. Returns how many were marked.
    async fn record_stale_links(&self, device: Id, valid: &[Uuid]) -> Result<u64>;

    /// Create or update an alert and its link associations, writing only what changed.
    ///
    /// Links must already be recorded for the association to be made.
    async fn record_alert(&self, device: Id, alert: &AlertRecord) -> Result<()>;

    /// Mark stale the device's alerts not in `valid`. Returns how many were marked.
    async fn record_stale_alerts(&self, device: Id, valid: &[Uuid]) -> Result<u64>;

    /// Set an alert's active flag. Returns false if it already had that value.
    async fn update_alert_active(
        &self,
        uuid: Uuid,
        active: bool,
        stamp: DateTime<Utc>,
    ) -> Result<bool>;

    /// Record a service advertisement. Returns false if nothing changed.
    async fn record_service(&self, service: &ServiceRecord) -> Result<bool>;

    async fn alert_list(&self, filter: &AlertFilter) -> Result<Vec<Alert>>;

    /// Look up an alert, stale or not.
    async fn alert_by_uuid(&self, uuid: Uuid) -> Result<Option<Alert>>;

    async fn alert_by_id(&self, id: Id) -> Result<Option<AlertSummary>>;

    async fn link_list(&self, filter: &LinkFilter) -> Result<Vec<Link>>;

    /// Look up a link, stale or not.
    async fn link_by_uuid(&self, uuid: Uuid) -> Result<Option<Link>>;

    async fn link_by_id(&self, id: Id) -> Result<Option<LinkSummary>>;

    /// The device currently occupying an address.
    async fn address_device(&self, address: &Address) -> Result<Option<Uuid>>;

    async fn device_sessions(&self, device: Uuid) -> Result<Vec<Session>>;

    async fn address_sessions(&self, address: &Address) -> Result<Vec<Session>>;

    async fn session_notification_info(&self, id: Id) -> Result<Option<SessionNotificationInfo>>;

    async fn session_schemas(&self, id: Id) -> Result<Vec<Uuid>>;

    /// Devices whose current session uses `schema`.
    async fn schema_devices(&self, schema: Uuid) -> Result<Vec<Uuid>>;

    async fn service_providers(&self, service: Uuid) -> Result<Vec<ServiceProvider>>;

    async fn service_from_provider(&self, id: Id) -> Result<Option<Uuid>>;
}

/// Work to run inside a transaction
pub type TxnWork =
    Box<dyn for<'q> FnOnce(&'q dyn Queries) -> BoxFuture<'q, Result<()>> + Send>;

/// Box up a closure as [TxnWork].
///
/// ```ignore
/// store.transaction(txn(move |q| async move {
///     let address = q.find_or_create_address(&address).await?;
///     Ok(())
/// }.boxed())).await?;
/// ```
pub fn txn<F>(work: F) -> TxnWork
where
    F: for<'q> FnOnce(&'q dyn Queries) -> BoxFuture<'q, Result<()>> + Send + 'static,
{
    Box::new(work)
}

/// A storage backend
#[async_trait]
pub trait Store: Queries {
    /// Run `work` against a transaction.
    ///
    /// Commits if `work` returns `Ok`. Nothing `work` wrote is visible if it returns `Err`
    /// or the returned future is dropped.
    async fn transaction(&self, work: TxnWork) -> Result<()>;
}

pub type DynStore = dyn Store;
