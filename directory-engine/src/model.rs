use std::sync::Arc;

use chrono::{DateTime, Utc};
use directory_store::{txn, BirthRecord, ClosedSession, DynStore, Id, Queries, ServiceRecord, Table};
use directory_types::topic::Address;
use futures::FutureExt;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::Result,
    extract::{AlertUpdate, Birth, DeviceRef},
};

/// The storage side of BIRTH, DEATH and DATA handling
#[derive(Clone)]
pub struct Model {
    store: Arc<DynStore>,
}

impl Model {
    pub fn new(store: Arc<DynStore>) -> Self {
        Self { store }
    }

    /// Record a BIRTH in one transaction. Returns the new session, or `None` if the BIRTH
    /// named a device that could not be resolved.
    pub async fn birth(&self, birth: Birth) -> Result<Option<(Uuid, Id)>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.store
            .transaction(txn(move |q| {
                async move {
                    let opened = record_birth(q, &birth).await?;
                    _ = tx.send(opened);
                    Ok(())
                }
                .boxed()
            }))
            .await?;
        Ok(rx.await.ok().flatten())
    }

    /// Close the sessions a DEATH ends. Returns the devices that went offline.
    pub async fn death(
        &self,
        address: &Address,
        time: DateTime<Utc>,
    ) -> Result<Vec<ClosedSession>> {
        let closed = self.store.record_death(address, time).await?;
        debug!("DEATH for {address} closed {} sessions", closed.len());
        Ok(closed)
    }

    /// Apply alert active flag changes. Returns how many alerts changed.
    pub async fn update_alerts(&self, updates: &[AlertUpdate]) -> Result<usize> {
        let mut changed = 0;
        for update in updates {
            if self
                .store
                .update_alert_active(update.uuid, update.active, update.stamp)
                .await?
            {
                changed += 1;
            }
        }
        Ok(changed)
    }
}

async fn record_birth(
    q: &dyn Queries,
    birth: &Birth,
) -> directory_store::Result<Option<(Uuid, Id)>> {
    let address = q.find_or_create_address(&birth.address).await?;

    let device = match &birth.device {
        DeviceRef::Declared(uuid) => *uuid,
        DeviceRef::Missing => q.find_or_create_missing_uuid(address).await?,
        DeviceRef::Invalid(value) => {
            warn!(
                "BIRTH for {} has an invalid Instance_UUID '{value}', not recording a session",
                birth.address
            );
            return Ok(None);
        }
    };
    let device_id = q.find_or_create(Table::Device, device).await?;

    let session = q
        .record_birth(&BirthRecord {
            device: device_id,
            address,
            time: birth.time,
            top_schema: birth.top_schema,
        })
        .await?;
    for schema in &birth.schemas {
        q.record_schema(session, *schema).await?;
    }

    // alert link associations need the link rows
    let links: Vec<Uuid> = birth.links.iter().map(|link| link.uuid).collect();
    for link in &birth.links {
        q.record_link(device_id, &link.record(device)).await?;
    }
    let stale = q.record_stale_links(device_id, &links).await?;
    if stale > 0 {
        info!("Marked {stale} links of {device} stale");
    }

    let alerts: Vec<Uuid> = birth.alerts.iter().map(|alert| alert.record.uuid).collect();
    for alert in &birth.alerts {
        q.record_alert(device_id, &alert.record).await?;
    }
    let stale = q.record_stale_alerts(device_id, &alerts).await?;
    if stale > 0 {
        info!("Marked {stale} alerts of {device} stale");
    }

    if let Some(service) = &birth.service {
        let changed = q
            .record_service(&ServiceRecord {
                service: service.service,
                device,
                url: service.url.clone(),
            })
            .await?;
        if changed {
            info!("{device} now provides service {}", service.service);
        }
    }

    Ok(Some((device, session)))
}
