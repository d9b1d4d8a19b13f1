//! Find the structure the directory records in a cooperating BIRTH.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use directory_store::{AlertRecord, LinkRecord};
use directory_types::{
    constants::{metrics, uuids},
    metric_tree::MetricTree,
    payload::{Metric, Payload},
    topic::Address,
    utils::payload_timestamp,
};
use log::{debug, warn};
use uuid::Uuid;

use crate::config::SchemaConfig;

/// Convert a Sparkplug millisecond timestamp.
pub fn datetime(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_default()
}

/// True if the payload header carries the marker of a publisher following the metric tree conventions.
///
/// The marker must be in canonical lowercase hyphenated form.
pub fn is_cooperating(payload: &Payload) -> bool {
    let mut buf = Uuid::encode_buffer();
    let marker: &str = uuids::FACTORY_PLUS.hyphenated().encode_lower(&mut buf);
    payload.uuid.as_deref() == Some(marker)
}

/// The metric tree of a cooperating payload. Anyone else's metrics are not trusted for structure.
pub fn metric_tree(payload: &Payload) -> MetricTree {
    if is_cooperating(payload) {
        MetricTree::from_payload(payload)
    } else {
        MetricTree::new()
    }
}

/// How a BIRTH identified its device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceRef {
    Declared(Uuid),
    /// No `Instance_UUID`, a placeholder is used.
    Missing,
    /// An `Instance_UUID` that is not a UUID.
    Invalid(String),
}

/// An alert instance, with what later DATA needs to refer back to it
#[derive(Debug, Clone, PartialEq)]
pub struct FoundAlert {
    pub record: AlertRecord,
    pub alias: Option<u64>,
}

/// A link instance. Without an enclosing instance the link hangs from the device itself.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundLink {
    pub uuid: Uuid,
    pub parent: Option<Uuid>,
    pub relation: Uuid,
    pub target: Uuid,
}

impl FoundLink {
    pub fn record(&self, device: Uuid) -> LinkRecord {
        LinkRecord {
            uuid: self.uuid,
            source: self.parent.unwrap_or(device),
            relation: self.relation,
            target: self.target,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceAdvert {
    pub service: Uuid,
    pub url: Option<String>,
}

pub fn find_alerts(tree: &MetricTree, schema: Uuid, fallback: u64) -> Vec<FoundAlert> {
    let mut alerts = Vec::new();
    for instance in tree.instances().into_iter().filter(|i| i.schema == schema) {
        let Some(alert_type) = instance.branch.uuid(metrics::ALERT_TYPE) else {
            warn!("Alert {} has no valid {}", instance.uuid, metrics::ALERT_TYPE);
            continue;
        };
        let Some(active) = instance.branch.leaf(metrics::ALERT_ACTIVE) else {
            warn!("Alert {} has no {} metric", instance.uuid, metrics::ALERT_ACTIVE);
            continue;
        };
        let (Some(name), Some(value)) = (&active.name, active.as_bool()) else {
            warn!("Alert {} has a non boolean {}", instance.uuid, metrics::ALERT_ACTIVE);
            continue;
        };
        alerts.push(FoundAlert {
            record: AlertRecord {
                uuid: instance.uuid,
                alert_type,
                metric: name.clone(),
                active: value,
                stamp: datetime(active.timestamp.unwrap_or(fallback)),
                links: Vec::new(),
            },
            alias: active.alias,
        });
    }
    debug!("Found alerts: {alerts:?}");
    alerts
}

pub fn find_links(tree: &MetricTree, schema: Uuid) -> Vec<FoundLink> {
    let mut links = Vec::new();
    for instance in tree.instances().into_iter().filter(|i| i.schema == schema) {
        let relation = instance.branch.uuid(metrics::LINK_RELATION);
        let target = instance.branch.uuid(metrics::LINK_TARGET);
        let (Some(relation), Some(target)) = (relation, target) else {
            warn!("Link {} needs a valid Relation and Target", instance.uuid);
            continue;
        };
        links.push(FoundLink {
            uuid: instance.uuid,
            parent: instance.parent,
            relation,
            target,
        });
    }
    debug!("Found links: {links:?}");
    links
}

pub fn find_service(tree: &MetricTree, schema: Uuid) -> Option<ServiceAdvert> {
    if tree.uuid(metrics::SCHEMA_UUID)? != schema {
        return None;
    }
    Some(ServiceAdvert {
        service: tree.uuid(metrics::SERVICE_UUID)?,
        url: tree.string(metrics::SERVICE_URL).map(str::to_string),
    })
}

/// Everything a BIRTH records
#[derive(Debug, Clone)]
pub struct Birth {
    pub address: Address,
    pub time: DateTime<Utc>,
    pub device: DeviceRef,
    pub top_schema: Option<Uuid>,
    pub schemas: BTreeSet<Uuid>,
    pub alerts: Vec<FoundAlert>,
    pub links: Vec<FoundLink>,
    pub service: Option<ServiceAdvert>,
}

impl Birth {
    pub fn from_payload(address: Address, payload: &Payload, schemas: &SchemaConfig) -> Self {
        let stamp = payload_timestamp(payload);
        let tree = metric_tree(payload);

        let device = match tree.string(metrics::INSTANCE_UUID) {
            None => DeviceRef::Missing,
            Some(uuid) => match Uuid::parse_str(uuid) {
                Ok(uuid) => DeviceRef::Declared(uuid),
                Err(_) => DeviceRef::Invalid(uuid.to_string()),
            },
        };

        let links = match schemas.link {
            Some(schema) => find_links(&tree, schema),
            None => Vec::new(),
        };
        let mut alerts = find_alerts(&tree, schemas.alert, stamp);
        for alert in alerts.iter_mut() {
            alert.record.links = links
                .iter()
                .filter(|link| link.parent == Some(alert.record.uuid))
                .map(|link| link.uuid)
                .collect();
        }

        Self {
            address,
            time: datetime(stamp),
            device,
            top_schema: tree.uuid(metrics::SCHEMA_UUID),
            schemas: tree.schemas(),
            alerts,
            links,
            service: find_service(&tree, schemas.service),
        }
    }
}

/// Resolves DATA metrics to the alerts declared at BIRTH
#[derive(Debug, Clone, Default)]
pub struct AlertIndex {
    names: HashMap<String, Uuid>,
    aliases: HashMap<u64, Uuid>,
}

impl AlertIndex {
    pub fn new(alerts: &[FoundAlert]) -> Self {
        let mut index = Self::default();
        for alert in alerts {
            index
                .names
                .insert(alert.record.metric.clone(), alert.record.uuid);
            if let Some(alias) = alert.alias {
                index.aliases.insert(alias, alert.record.uuid);
            }
        }
        index
    }

    /// A metric with an alias is looked up by alias only.
    pub fn resolve(&self, metric: &Metric) -> Option<Uuid> {
        match (metric.alias, &metric.name) {
            (Some(alias), _) => self.aliases.get(&alias).copied(),
            (None, Some(name)) => self.names.get(name).copied(),
            (None, None) => None,
        }
    }

    /// The alert active flag updates carried by a DATA payload.
    pub fn updates(&self, payload: &Payload) -> Vec<AlertUpdate> {
        let fallback = payload_timestamp(payload);
        payload
            .metrics
            .iter()
            .filter_map(|metric| {
                let uuid = self.resolve(metric)?;
                let Some(active) = metric.as_bool() else {
                    debug!("Ignoring non boolean update for alert {uuid}");
                    return None;
                };
                Some(AlertUpdate {
                    uuid,
                    active,
                    stamp: datetime(metric.timestamp.unwrap_or(fallback)),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertUpdate {
    pub uuid: Uuid,
    pub active: bool,
    pub stamp: DateTime<Utc>,
}
