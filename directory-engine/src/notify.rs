use std::{collections::BTreeSet, sync::Arc};

use directory_store::{tables, DynStore, Id, Notification};
use log::{error, trace, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    error::Result,
    eventloop::{Change, DirectoryClient},
};

/// Turns store row change notifications into `Last_Changed` publishes.
pub struct ChangeNotifier {
    store: Arc<DynStore>,
    client: DirectoryClient,
}

impl ChangeNotifier {
    pub fn new(store: Arc<DynStore>, client: DirectoryClient) -> Self {
        Self { store, client }
    }

    pub async fn run(self, mut notifications: mpsc::UnboundedReceiver<Notification>) {
        while let Some(notification) = notifications.recv().await {
            self.handle(&notification).await;
        }
    }

    pub async fn handle(&self, notification: &Notification) {
        trace!("NOTIFY: {notification}");
        let changes = match self.changes(notification).await {
            Ok(changes) => changes,
            Err(e) => {
                error!("Unable to look up change {notification}: {e}");
                return;
            }
        };
        if changes.is_empty() {
            return;
        }
        if self.client.publish_changed(changes).await.is_err() {
            warn!("Unable to publish changes for {notification}");
        }
    }

    /// The directory entries a changed row affects
    pub async fn changes(&self, notification: &Notification) -> Result<Vec<Change>> {
        let id = notification.id;
        let changes = match notification.table.as_str() {
            tables::ALERT => self
                .store
                .alert_by_id(id)
                .await?
                .map(|alert| Change::AlertType(alert.alert_type))
                .into_iter()
                .collect(),
            tables::LINK => self
                .store
                .link_by_id(id)
                .await?
                .map(|link| Change::LinkRelation(link.relation))
                .into_iter()
                .collect(),
            tables::SERVICE_PROVIDER => self
                .store
                .service_from_provider(id)
                .await?
                .map(Change::Service)
                .into_iter()
                .collect(),
            tables::SESSION => self.session_changes(id).await?,
            other => {
                warn!("Change notification for unknown table {other}");
                Vec::new()
            }
        };
        Ok(changes)
    }

    async fn session_changes(&self, id: Id) -> Result<Vec<Change>> {
        let Some(session) = self.store.session_notification_info(id).await? else {
            return Ok(Vec::new());
        };

        let mut changes = Vec::new();
        if session.next_for_device.is_none() {
            changes.push(Change::DeviceUuid(session.device));
        }
        if session.next_for_address.is_none() {
            changes.push(Change::DeviceAddress(session.address));
        }

        // schemas that appeared or disappeared compared to the device's last session
        let current = self.schemas(Some(id)).await?;
        let previous = self.schemas(session.prev_for_device).await?;
        changes.extend(
            current
                .symmetric_difference(&previous)
                .map(|schema| Change::SchemaUsage(*schema)),
        );
        Ok(changes)
    }

    async fn schemas(&self, session: Option<Id>) -> Result<BTreeSet<Uuid>> {
        let Some(session) = session else {
            return Ok(BTreeSet::new());
        };
        Ok(self
            .store
            .session_schemas(session)
            .await?
            .into_iter()
            .collect())
    }
}
