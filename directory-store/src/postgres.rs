//! The PostgreSQL [Store].

mod queries;

use async_trait::async_trait;
use bb8::{ManageConnection, Pool};
use chrono::{DateTime, Utc};
use directory_types::topic::Address;
use futures::future::poll_fn;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_postgres::{AsyncMessage, Client, Config as PgConfig, NoTls};
use uuid::Uuid;

pub use queries::PgQueries;

use crate::{
    error::{Error, Result},
    notification::{Notification, CHANNEL},
    queries::{Queries, Store, TxnWork},
    types::{
        Alert, AlertFilter, AlertRecord, AlertSummary, BirthRecord, ClosedSession, Id, Link,
        LinkFilter, LinkRecord, LinkSummary, ServiceProvider, ServiceRecord, Session,
        SessionNotificationInfo, Table,
    },
};

const SCHEMA: &str = include_str!("../migrations/schema.sql");

pub type PgPool = Pool<PgConnectionManager>;

#[derive(Clone)]
pub struct PgConnectionManager {
    config: PgConfig,
}

impl PgConnectionManager {
    pub fn new(database_url: &str) -> Result<Self> {
        let config = database_url
            .parse::<PgConfig>()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self { config })
    }
}

#[async_trait]
impl ManageConnection for PgConnectionManager {
    type Connection = Client;
    type Error = tokio_postgres::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let (client, connection) = self.config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Database connection error: {e}");
            }
        });
        Ok(client)
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.batch_execute("SELECT 1").await
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_closed()
    }
}

/// A [Store] backed by a pool of PostgreSQL connections.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    manager: PgConnectionManager,
}

impl PgStore {
    /// Connect a pool of up to `max_size` connections.
    pub async fn connect(database_url: &str, max_size: u32) -> Result<Self> {
        let manager = PgConnectionManager::new(database_url)?;
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager.clone())
            .await?;

        // fail fast if the credentials are wrong
        match pool.get().await {
            Ok(_) => info!("Database connectivity check succeeded"),
            Err(e) => error!("Initial database connectivity check failed: {e}"),
        }

        Ok(Self { pool, manager })
    }

    /// Create any missing tables, indexes and change notification triggers.
    pub async fn migrate(&self) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA).await?;
        debug!("Database schema is up to date");
        Ok(())
    }

    /// Subscribe to row change notifications.
    ///
    /// Uses a dedicated connection outside the pool, which is closed when the receiver is dropped.
    pub async fn listen(&self) -> Result<mpsc::UnboundedReceiver<Notification>> {
        let (client, mut connection) = self.manager.config.connect(NoTls).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let forward = tx.clone();
        tokio::spawn(async move {
            loop {
                match poll_fn(|cx| connection.poll_message(cx)).await {
                    Some(Ok(AsyncMessage::Notification(n))) => {
                        match n.payload().parse::<Notification>() {
                            Ok(notification) => {
                                if forward.send(notification).is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("Ignoring notification '{}': {e}", n.payload()),
                        }
                    }
                    Some(Ok(_)) => (),
                    Some(Err(e)) => {
                        error!("Notification connection error: {e}");
                        break;
                    }
                    None => break,
                }
            }
            debug!("Notification connection closed");
        });

        client.batch_execute(&format!("LISTEN {CHANNEL}")).await?;
        tokio::spawn(async move {
            tx.closed().await;
            drop(client);
        });
        Ok(rx)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn transaction(&self, work: TxnWork) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let txn = conn.transaction().await?;
        // dropping the transaction uncommitted rolls it back
        work(&PgQueries::new(&txn)).await?;
        txn.commit().await?;
        Ok(())
    }
}

macro_rules! pooled {
    ($( fn $name:ident(&self $(, $arg:ident: $ty:ty)*) -> $ret:ty; )*) => {
        #[async_trait]
        impl Queries for PgStore {
            $(
                async fn $name(&self $(, $arg: $ty)*) -> Result<$ret> {
                    let conn = self.pool.get().await?;
                    PgQueries::new(&*conn).$name($($arg),*).await
                }
            )*
        }
    };
}

pooled! {
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
