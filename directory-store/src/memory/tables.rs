use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use directory_types::topic::Address;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    notification::{tables, Notification},
    types::{
        Alert, AlertFilter, AlertRecord, AlertSummary, BirthRecord, ClosedSession, Id, Link,
        LinkFilter, LinkRecord, LinkSummary, ServiceProvider, ServiceRecord, Session,
        SessionNotificationInfo, Table,
    },
};

pub(crate) type Changes = Vec<Notification>;

#[derive(Debug, Clone)]
struct SessionRow {
    device: Id,
    address: Id,
    start: DateTime<Utc>,
    finish: Option<DateTime<Utc>>,
    top_schema: Option<Id>,
    next_for_device: Option<Id>,
    next_for_address: Option<Id>,
}

#[derive(Debug, Clone)]
struct AlertRow {
    uuid: Uuid,
    device: Id,
    atype: Id,
    metric: String,
    active: bool,
    last_change: DateTime<Utc>,
    stale: bool,
}

#[derive(Debug, Clone)]
struct LinkRow {
    uuid: Uuid,
    device: Id,
    source: Uuid,
    relation: Id,
    target: Uuid,
    stale: bool,
}

#[derive(Debug, Clone)]
struct ProviderRow {
    service: Id,
    device: Id,
    url: Option<String>,
}

/// The in-memory equivalent of the database tables.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    next_id: Id,
    identities: BTreeMap<(Table, Uuid), Id>,
    addresses: BTreeMap<Address, Id>,
    missing_uuids: BTreeMap<Id, Uuid>,
    sessions: BTreeMap<Id, SessionRow>,
    schema_used: BTreeSet<(Id, Id)>,
    alerts: BTreeMap<Id, AlertRow>,
    alert_links: BTreeSet<(Id, Id)>,
    links: BTreeMap<Id, LinkRow>,
    providers: BTreeMap<Id, ProviderRow>,
}

fn identity(identities: &BTreeMap<(Table, Uuid), Id>, table: Table, id: Id) -> Result<Uuid> {
    identities
        .iter()
        .find(|((t, _), row)| *t == table && **row == id)
        .map(|((_, uuid), _)| *uuid)
        .ok_or(Error::MissingRow(table.name()))
}

fn address(addresses: &BTreeMap<Address, Id>, id: Id) -> Result<&Address> {
    addresses
        .iter()
        .find(|(_, row)| **row == id)
        .map(|(address, _)| address)
        .ok_or(Error::MissingRow("address"))
}

impl Tables {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    fn identity_id(&self, table: Table, uuid: Uuid) -> Option<Id> {
        self.identities.get(&(table, uuid)).copied()
    }

    fn link_id(&self, uuid: Uuid) -> Option<Id> {
        self.links
            .iter()
            .find(|(_, row)| row.uuid == uuid)
            .map(|(id, _)| *id)
    }

    fn alert_id(&self, uuid: Uuid) -> Option<Id> {
        self.alerts
            .iter()
            .find(|(_, row)| row.uuid == uuid)
            .map(|(id, _)| *id)
    }

    fn session(&self, id: Id, row: &SessionRow) -> Result<Session> {
        Ok(Session {
            id,
            device: identity(&self.identities, Table::Device, row.device)?,
            address: address(&self.addresses, row.address)?.clone(),
            start: row.start,
            finish: row.finish,
            top_schema: row
                .top_schema
                .map(|schema| identity(&self.identities, Table::Schema, schema))
                .transpose()?,
            next_for_device: row.next_for_device,
            next_for_address: row.next_for_address,
        })
    }

    fn alert(&self, id: Id, row: &AlertRow) -> Result<Alert> {
        let mut links = Vec::new();
        for (_, link) in self.alert_links.iter().filter(|(alert, _)| *alert == id) {
            let link = self.links.get(link).ok_or(Error::MissingRow("link"))?;
            links.push(link.uuid);
        }
        links.sort();
        Ok(Alert {
            uuid: row.uuid,
            device: identity(&self.identities, Table::Device, row.device)?,
            alert_type: identity(&self.identities, Table::AlertType, row.atype)?,
            metric: row.metric.clone(),
            active: row.active,
            last_change: row.last_change,
            stale: row.stale,
            links,
        })
    }

    fn link(&self, row: &LinkRow) -> Result<Link> {
        Ok(Link {
            uuid: row.uuid,
            device: identity(&self.identities, Table::Device, row.device)?,
            source: row.source,
            relation: identity(&self.identities, Table::LinkRel, row.relation)?,
            target: row.target,
            stale: row.stale,
        })
    }

    pub fn find_or_create(&mut self, _changes: &mut Changes, table: Table, uuid: Uuid) -> Result<Id> {
        if let Some(id) = self.identity_id(table, uuid) {
            return Ok(id);
        }
        let id = self.next_id();
        self.identities.insert((table, uuid), id);
        Ok(id)
    }

    pub fn find_or_create_address(&mut self, _changes: &mut Changes, address: &Address) -> Result<Id> {
        if let Some(id) = self.addresses.get(address) {
            return Ok(*id);
        }
        let id = self.next_id();
        self.addresses.insert(address.clone(), id);
        Ok(id)
    }

    pub fn find_or_create_missing_uuid(&mut self, _changes: &mut Changes, address: Id) -> Result<Uuid> {
        Ok(*self
            .missing_uuids
            .entry(address)
            .or_insert_with(Uuid::new_v4))
    }

    pub fn record_birth(&mut self, changes: &mut Changes, birth: &BirthRecord) -> Result<Id> {
        let top_schema = birth
            .top_schema
            .map(|schema| self.find_or_create(changes, Table::Schema, schema))
            .transpose()?;

        let session = self.next_id();
        self.sessions.insert(
            session,
            SessionRow {
                device: birth.device,
                address: birth.address,
                start: birth.time,
                finish: None,
                top_schema,
                next_for_device: None,
                next_for_address: None,
            },
        );
        changes.push(Notification::new(tables::SESSION, session));

        for (id, row) in self.sessions.iter_mut() {
            if *id == session {
                continue;
            }
            if row.device == birth.device && row.next_for_device.is_none() {
                row.next_for_device = Some(session);
                changes.push(Notification::new(tables::SESSION, *id));
            }
            if row.address == birth.address && row.next_for_address.is_none() {
                row.next_for_address = Some(session);
                changes.push(Notification::new(tables::SESSION, *id));
            }
        }
        Ok(session)
    }

    pub fn record_schema(&mut self, changes: &mut Changes, session: Id, schema: Uuid) -> Result<()> {
        let schema = self.find_or_create(changes, Table::Schema, schema)?;
        self.schema_used.insert((session, schema));
        Ok(())
    }

    pub fn record_death(
        &mut self,
        changes: &mut Changes,
        target: &Address,
        time: DateTime<Utc>,
    ) -> Result<Vec<ClosedSession>> {
        let mut closed = Vec::new();
        for (id, row) in self.sessions.iter_mut() {
            if row.finish.is_some() {
                continue;
            }
            let at = address(&self.addresses, row.address)?;
            let matched = at.group == target.group
                && at.node == target.node
                && (target.device.is_none() || at.device == target.device);
            if !matched {
                continue;
            }
            row.finish = Some(time);
            changes.push(Notification::new(tables::SESSION, *id));
            closed.push(ClosedSession {
                device: identity(&self.identities, Table::Device, row.device)?,
                address: at.clone(),
            });
        }
        Ok(closed)
    }

    pub fn record_link(&mut self, changes: &mut Changes, device: Id, link: &LinkRecord) -> Result<()> {
        let relation = self.find_or_create(changes, Table::LinkRel, link.relation)?;
        let row = LinkRow {
            uuid: link.uuid,
            device,
            source: link.source,
            relation,
            target: link.target,
            stale: false,
        };

        let id = match self.link_id(link.uuid) {
            Some(id) => {
                let Some(existing) = self.links.get_mut(&id) else {
                    return Err(Error::MissingRow("link"));
                };
                let unchanged = existing.device == row.device
                    && existing.source == row.source
                    && existing.relation == row.relation
                    && existing.target == row.target
                    && !existing.stale;
                if unchanged {
                    return Ok(());
                }
                *existing = row;
                id
            }
            None => {
                let id = self.next_id();
                self.links.insert(id, row);
                id
            }
        };
        changes.push(Notification::new(tables::LINK, id));
        Ok(())
    }

    pub fn record_stale_links(&mut self, changes: &mut Changes, device: Id, valid: &[Uuid]) -> Result<u64> {
        let mut count = 0;
        for (id, row) in self.links.iter_mut() {
            if row.device == device && !row.stale && !valid.contains(&row.uuid) {
                row.stale = true;
                changes.push(Notification::new(tables::LINK, *id));
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn record_alert(&mut self, changes: &mut Changes, device: Id, alert: &AlertRecord) -> Result<()> {
        let atype = self.find_or_create(changes, Table::AlertType, alert.alert_type)?;
        let wanted: BTreeSet<Id> = alert
            .links
            .iter()
            .filter_map(|uuid| self.link_id(*uuid))
            .collect();

        let Some(id) = self.alert_id(alert.uuid) else {
            let id = self.next_id();
            self.alerts.insert(
                id,
                AlertRow {
                    uuid: alert.uuid,
                    device,
                    atype,
                    metric: alert.metric.clone(),
                    active: alert.active,
                    last_change: alert.stamp,
                    stale: false,
                },
            );
            self.alert_links.extend(wanted.into_iter().map(|link| (id, link)));
            changes.push(Notification::new(tables::ALERT, id));
            return Ok(());
        };

        let current: BTreeSet<Id> = self
            .alert_links
            .iter()
            .filter(|(alert, _)| *alert == id)
            .map(|(_, link)| *link)
            .collect();
        let links_changed = current != wanted;
        if links_changed {
            self.alert_links
                .retain(|(alert, link)| *alert != id || wanted.contains(link));
            self.alert_links.extend(wanted.iter().map(|link| (id, *link)));
        }

        let Some(row) = self.alerts.get_mut(&id) else {
            return Err(Error::MissingRow("alert"));
        };
        let changed = row.device != device
            || row.atype != atype
            || row.metric != alert.metric
            || row.active != alert.active
            || row.stale
            || links_changed;
        if !changed {
            return Ok(());
        }
        if row.active != alert.active {
            row.last_change = alert.stamp;
        }
        row.device = device;
        row.atype = atype;
        row.metric = alert.metric.clone();
        row.active = alert.active;
        row.stale = false;
        changes.push(Notification::new(tables::ALERT, id));
        Ok(())
    }

    pub fn record_stale_alerts(&mut self, changes: &mut Changes, device: Id, valid: &[Uuid]) -> Result<u64> {
        let mut count = 0;
        for (id, row) in self.alerts.iter_mut() {
            if row.device == device && !row.stale && !valid.contains(&row.uuid) {
                row.stale = true;
                changes.push(Notification::new(tables::ALERT, *id));
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn update_alert_active(
        &mut self,
        changes: &mut Changes,
        uuid: Uuid,
        active: bool,
        stamp: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(id) = self.alert_id(uuid) else {
            return Ok(false);
        };
        let Some(row) = self.alerts.get_mut(&id) else {
            return Ok(false);
        };
        if row.active == active {
            return Ok(false);
        }
        row.active = active;
        row.last_change = stamp;
        changes.push(Notification::new(tables::ALERT, id));
        Ok(true)
    }

    pub fn record_service(&mut self, changes: &mut Changes, service: &ServiceRecord) -> Result<bool> {
        let device = self.find_or_create(changes, Table::Device, service.device)?;
        let srv = self.find_or_create(changes, Table::Service, service.service)?;

        let existing = self
            .providers
            .iter_mut()
            .find(|(_, row)| row.service == srv && row.device == device);
        let id = match existing {
            Some((_, row)) if row.url == service.url => return Ok(false),
            Some((id, row)) => {
                row.url = service.url.clone();
                *id
            }
            None => {
                let id = self.next_id();
                self.providers.insert(
                    id,
                    ProviderRow {
                        service: srv,
                        device,
                        url: service.url.clone(),
                    },
                );
                id
            }
        };
        changes.push(Notification::new(tables::SERVICE_PROVIDER, id));
        Ok(true)
    }

    pub fn alert_list(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let mut alerts = Vec::new();
        for (id, row) in &self.alerts {
            if row.stale || (filter.active_only && !row.active) {
                continue;
            }
            let alert = self.alert(*id, row)?;
            if let Some(types) = &filter.types {
                if !types.contains(&alert.alert_type) {
                    continue;
                }
            }
            if let Some(devices) = &filter.devices {
                if !devices.contains(&alert.device) {
                    continue;
                }
            }
            alerts.push(alert);
        }
        alerts.sort_by_key(|a| a.uuid);
        Ok(alerts)
    }

    pub fn alert_by_uuid(&self, uuid: Uuid) -> Result<Option<Alert>> {
        match self.alert_id(uuid) {
            Some(id) => match self.alerts.get(&id) {
                Some(row) => self.alert(id, row).map(Some),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    pub fn alert_by_id(&self, id: Id) -> Result<Option<AlertSummary>> {
        let Some(row) = self.alerts.get(&id) else {
            return Ok(None);
        };
        Ok(Some(AlertSummary {
            uuid: row.uuid,
            alert_type: identity(&self.identities, Table::AlertType, row.atype)?,
        }))
    }

    pub fn link_list(&self, filter: &LinkFilter) -> Result<Vec<Link>> {
        let mut links = Vec::new();
        for row in self.links.values().filter(|row| !row.stale) {
            let link = self.link(row)?;
            let keep = filter.device.map_or(true, |d| d == link.device)
                && filter.relation.map_or(true, |r| r == link.relation)
                && filter.target.map_or(true, |t| t == link.target);
            if keep {
                links.push(link);
            }
        }
        links.sort_by_key(|l| l.uuid);
        Ok(links)
    }

    pub fn link_by_uuid(&self, uuid: Uuid) -> Result<Option<Link>> {
        match self.link_id(uuid).and_then(|id| self.links.get(&id)) {
            Some(row) => self.link(row).map(Some),
            None => Ok(None),
        }
    }

    pub fn link_by_id(&self, id: Id) -> Result<Option<LinkSummary>> {
        let Some(row) = self.links.get(&id) else {
            return Ok(None);
        };
        Ok(Some(LinkSummary {
            uuid: row.uuid,
            relation: identity(&self.identities, Table::LinkRel, row.relation)?,
        }))
    }

    pub fn address_device(&self, address: &Address) -> Result<Option<Uuid>> {
        let Some(address) = self.addresses.get(address) else {
            return Ok(None);
        };
        self.sessions
            .values()
            .filter(|row| row.address == *address && row.next_for_address.is_none())
            .last()
            .map(|row| identity(&self.identities, Table::Device, row.device))
            .transpose()
    }

    pub fn device_sessions(&self, device: Uuid) -> Result<Vec<Session>> {
        let Some(device) = self.identity_id(Table::Device, device) else {
            return Ok(Vec::new());
        };
        self.sessions
            .iter()
            .filter(|(_, row)| row.device == device)
            .map(|(id, row)| self.session(*id, row))
            .collect()
    }

    pub fn address_sessions(&self, address: &Address) -> Result<Vec<Session>> {
        let Some(address) = self.addresses.get(address) else {
            return Ok(Vec::new());
        };
        self.sessions
            .iter()
            .filter(|(_, row)| row.address == *address)
            .map(|(id, row)| self.session(*id, row))
            .collect()
    }

    pub fn session_notification_info(&self, id: Id) -> Result<Option<SessionNotificationInfo>> {
        let Some(row) = self.sessions.get(&id) else {
            return Ok(None);
        };
        let prev_for_device = self
            .sessions
            .iter()
            .find(|(_, prev)| prev.next_for_device == Some(id))
            .map(|(prev, _)| *prev);
        Ok(Some(SessionNotificationInfo {
            device: identity(&self.identities, Table::Device, row.device)?,
            address: address(&self.addresses, row.address)?.clone(),
            next_for_device: row.next_for_device,
            next_for_address: row.next_for_address,
            prev_for_device,
        }))
    }

    pub fn session_schemas(&self, id: Id) -> Result<Vec<Uuid>> {
        let mut schemas = self
            .schema_used
            .iter()
            .filter(|(session, _)| *session == id)
            .map(|(_, schema)| identity(&self.identities, Table::Schema, *schema))
            .collect::<Result<Vec<Uuid>>>()?;
        schemas.sort();
        Ok(schemas)
    }

    pub fn schema_devices(&self, schema: Uuid) -> Result<Vec<Uuid>> {
        let Some(schema) = self.identity_id(Table::Schema, schema) else {
            return Ok(Vec::new());
        };
        let mut devices = BTreeSet::new();
        for (id, row) in &self.sessions {
            if row.next_for_device.is_none() && self.schema_used.contains(&(*id, schema)) {
                devices.insert(identity(&self.identities, Table::Device, row.device)?);
            }
        }
        Ok(devices.into_iter().collect())
    }

    pub fn service_providers(&self, service: Uuid) -> Result<Vec<ServiceProvider>> {
        let Some(service) = self.identity_id(Table::Service, service) else {
            return Ok(Vec::new());
        };
        let mut providers = self
            .providers
            .values()
            .filter(|row| row.service == service)
            .map(|row| -> Result<ServiceProvider> {
                Ok(ServiceProvider {
                    device: identity(&self.identities, Table::Device, row.device)?,
                    url: row.url.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        providers.sort_by_key(|p| p.device);
        Ok(providers)
    }

    pub fn service_from_provider(&self, id: Id) -> Result<Option<Uuid>> {
        self.providers
            .get(&id)
            .map(|row| identity(&self.identities, Table::Service, row.service))
            .transpose()
    }
}
