use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directory_types::topic::Address;
use tokio_postgres::{GenericClient, Row};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    queries::Queries,
    types::{
        Alert, AlertFilter, AlertRecord, AlertSummary, BirthRecord, ClosedSession, Id, Link,
        LinkFilter, LinkRecord, LinkSummary, ServiceProvider, ServiceRecord, Session,
        SessionNotificationInfo, Table,
    },
};

const SESSION_SELECT: &str = "
    select ses.id, dev.uuid device,
        adr.group_id, adr.node_id, adr.device_id,
        ses.start, ses.finish, sch.uuid top_schema,
        ses.next_for_device, ses.next_for_address
    from session ses
        join device dev on dev.id = ses.device
        join address adr on adr.id = ses.address
        left join schema sch on sch.id = ses.top_schema";

const ALERT_SELECT: &str = "
    select a.uuid, d.uuid device, t.uuid atype, a.metric,
        a.active, a.last_change, a.stale,
        (select coalesce(array_agg(l.uuid order by l.uuid), '{}'::uuid[])
            from alert_link al join link l on l.id = al.link
            where al.alert = a.id) links
    from alert a
        join alert_type t on a.atype = t.id
        join device d on a.device = d.id";

const LINK_SELECT: &str = "
    select l.uuid, d.uuid device, l.source, r.uuid relation, l.target, l.stale
    from link l
        join device d on l.device = d.id
        join link_rel r on l.relation = r.id";

fn address(row: &Row) -> Result<Address> {
    Ok(Address::new(
        row.try_get::<_, String>("group_id")?,
        row.try_get::<_, String>("node_id")?,
        Some(row.try_get::<_, String>("device_id")?),
    ))
}

fn session(row: &Row) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        device: row.try_get("device")?,
        address: address(row)?,
        start: row.try_get("start")?,
        finish: row.try_get("finish")?,
        top_schema: row.try_get("top_schema")?,
        next_for_device: row.try_get("next_for_device")?,
        next_for_address: row.try_get("next_for_address")?,
    })
}

fn alert(row: &Row) -> Result<Alert> {
    Ok(Alert {
        uuid: row.try_get("uuid")?,
        device: row.try_get("device")?,
        alert_type: row.try_get("atype")?,
        metric: row.try_get("metric")?,
        active: row.try_get("active")?,
        last_change: row.try_get("last_change")?,
        stale: row.try_get("stale")?,
        links: row.try_get("links")?,
    })
}

fn link(row: &Row) -> Result<Link> {
    Ok(Link {
        uuid: row.try_get("uuid")?,
        device: row.try_get("device")?,
        source: row.try_get("source")?,
        relation: row.try_get("relation")?,
        target: row.try_get("target")?,
        stale: row.try_get("stale")?,
    })
}

fn uuids(rows: Vec<Row>) -> Result<Vec<Uuid>> {
    rows.iter()
        .map(|row| row.try_get(0).map_err(Error::from))
        .collect()
}

/// [Queries] over a plain connection or a transaction
pub struct PgQueries<'a, C> {
    client: &'a C,
}

impl<'a, C: GenericClient + Sync> PgQueries<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    async fn alert_links(&self, alert: Id) -> Result<Vec<Uuid>> {
        let rows = self
            .client
            .query(
                "select l.uuid
                from alert_link al join link l on l.id = al.link
                where al.alert = $1
                order by l.uuid",
                &[&alert],
            )
            .await?;
        uuids(rows)
    }

    /// The subset of `links` that have been recorded, sorted
    async fn known_links(&self, links: &[Uuid]) -> Result<Vec<Uuid>> {
        let rows = self
            .client
            .query(
                "select uuid from link where uuid = any ($1) order by uuid",
                &[&links],
            )
            .await?;
        uuids(rows)
    }

    async fn insert_alert_links(&self, alert: Id, links: &[Uuid]) -> Result<()> {
        self.client
            .execute(
                "insert into alert_link (alert, link)
                select $1, l.id from link l where l.uuid = any ($2)
                on conflict (alert, link) do nothing",
                &[&alert, &links],
            )
            .await?;
        Ok(())
    }

    async fn update_alert_info(
        &self,
        id: Id,
        device: Id,
        atype: Id,
        alert: &AlertRecord,
    ) -> Result<()> {
        let wanted = self.known_links(&alert.links).await?;
        let links_changed = self.alert_links(id).await? != wanted;

        if links_changed {
            self.insert_alert_links(id, &wanted).await?;
            self.client
                .execute(
                    "delete from alert_link al
                    using link l
                    where al.alert = $1
                        and l.id = al.link
                        and l.uuid <> all ($2)",
                    &[&id, &wanted],
                )
                .await?;
        }

        self.client
            .execute(
                "update alert
                set device = $2, atype = $3, metric = $4, active = $5, stale = false,
                    last_change = case when active <> $5 then $6 else last_change end
                where id = $1
                    and (device <> $2 or atype <> $3 or metric <> $4 or active <> $5
                        or stale or $7)",
                &[
                    &id,
                    &device,
                    &atype,
                    &alert.metric,
                    &alert.active,
                    &alert.stamp,
                    &links_changed,
                ],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<C: GenericClient + Sync> Queries for PgQueries<'_, C> {
    async fn find_or_create(&self, table: Table, uuid: Uuid) -> Result<Id> {
        let table = table.name();
        let insert = format!("insert into {table} (uuid) values ($1) on conflict do nothing");
        self.client.execute(insert.as_str(), &[&uuid]).await?;

        let select = format!("select id from {table} where uuid = $1");
        let row = self
            .client
            .query_opt(select.as_str(), &[&uuid])
            .await?
            .ok_or(Error::MissingRow(table))?;
        Ok(row.try_get(0)?)
    }

    async fn find_or_create_address(&self, address: &Address) -> Result<Id> {
        let params: [&(dyn tokio_postgres::types::ToSql + Sync); 3] =
            [&address.group, &address.node, &address.device_id()];
        self.client
            .execute(
                "insert into address (group_id, node_id, device_id)
                values ($1, $2, $3) on conflict do nothing",
                &params,
            )
            .await?;

        let row = self
            .client
            .query_opt(
                "select id from address
                where group_id = $1 and node_id = $2 and device_id = $3",
                &params,
            )
            .await?
            .ok_or(Error::MissingRow("address"))?;
        Ok(row.try_get(0)?)
    }

    async fn find_or_create_missing_uuid(&self, address: Id) -> Result<Uuid> {
        self.client
            .execute(
                "insert into missing_uuid (address) values ($1) on conflict do nothing",
                &[&address],
            )
            .await?;

        let row = self
            .client
            .query_opt("select uuid from missing_uuid where address = $1", &[&address])
            .await?
            .ok_or(Error::MissingRow("missing_uuid"))?;
        Ok(row.try_get(0)?)
    }

    async fn record_birth(&self, birth: &BirthRecord) -> Result<Id> {
        let top_schema = match birth.top_schema {
            Some(schema) => Some(self.find_or_create(Table::Schema, schema).await?),
            None => None,
        };

        let row = self
            .client
            .query_one(
                "insert into session (device, address, start, top_schema)
                values ($1, $2, $3, $4) returning id",
                &[&birth.device, &birth.address, &birth.time, &top_schema],
            )
            .await?;
        let session: Id = row.try_get(0)?;

        self.client
            .execute(
                "update session set next_for_device = $1
                where device = $2 and next_for_device is null and id <> $1",
                &[&session, &birth.device],
            )
            .await?;
        self.client
            .execute(
                "update session set next_for_address = $1
                where address = $2 and next_for_address is null and id <> $1",
                &[&session, &birth.address],
            )
            .await?;

        Ok(session)
    }

    async fn record_schema(&self, session: Id, schema: Uuid) -> Result<()> {
        let schema = self.find_or_create(Table::Schema, schema).await?;
        self.client
            .execute(
                "insert into schema_used (session, schema) values ($1, $2)
                on conflict do nothing",
                &[&session, &schema],
            )
            .await?;
        Ok(())
    }

    async fn record_death(
        &self,
        address: &Address,
        time: DateTime<Utc>,
    ) -> Result<Vec<ClosedSession>> {
        let rows = self
            .client
            .query(
                "update session ses
                set finish = $1
                from device dev, address adr
                where dev.id = ses.device
                    and adr.id = ses.address
                    and adr.group_id = $2
                    and adr.node_id = $3
                    and ($4 = '' or adr.device_id = $4)
                    and ses.finish is null
                returning dev.uuid, adr.group_id, adr.node_id, adr.device_id",
                &[&time, &address.group, &address.node, &address.device_id()],
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<ClosedSession> {
                Ok(ClosedSession {
                    device: row.try_get("uuid")?,
                    address: self::address(row)?,
                })
            })
            .collect()
    }

    async fn record_link(&self, device: Id, link: &LinkRecord) -> Result<()> {
        let relation = self.find_or_create(Table::LinkRel, link.relation).await?;
        self.client
            .execute(
                "insert into link (uuid, device, source, relation, target)
                values ($1, $2, $3, $4, $5)
                on conflict (uuid) do update
                    set device = $2, source = $3, relation = $4, target = $5, stale = false
                    where link.device <> $2 or link.source <> $3
                        or link.relation <> $4 or link.target <> $5 or link.stale",
                &[&link.uuid, &device, &link.source, &relation, &link.target],
            )
            .await?;
        Ok(())
    }

    async fn record_stale_links(&self, device: Id, valid: &[Uuid]) -> Result<u64> {
        Ok(self
            .client
            .execute(
                "update link set stale = true
                where device = $1 and not stale and uuid <> all ($2::uuid[])",
                &[&device, &valid],
            )
            .await?)
    }

    async fn record_alert(&self, device: Id, alert: &AlertRecord) -> Result<()> {
        let atype = self.find_or_create(Table::AlertType, alert.alert_type).await?;

        let existing = self
            .client
            .query_opt("select id from alert where uuid = $1", &[&alert.uuid])
            .await?;
        if let Some(row) = existing {
            return self
                .update_alert_info(row.try_get(0)?, device, atype, alert)
                .await;
        }

        let row = self
            .client
            .query_one(
                "insert into alert (uuid, device, atype, metric, active, last_change)
                values ($1, $2, $3, $4, $5, $6)
                returning id",
                &[
                    &alert.uuid,
                    &device,
                    &atype,
                    &alert.metric,
                    &alert.active,
                    &alert.stamp,
                ],
            )
            .await?;
        self.insert_alert_links(row.try_get(0)?, &alert.links)
            .await
    }

    async fn record_stale_alerts(&self, device: Id, valid: &[Uuid]) -> Result<u64> {
        Ok(self
            .client
            .execute(
                "update alert set stale = true
                where device = $1 and not stale and uuid <> all ($2::uuid[])",
                &[&device, &valid],
            )
            .await?)
    }

    async fn update_alert_active(
        &self,
        uuid: Uuid,
        active: bool,
        stamp: DateTime<Utc>,
    ) -> Result<bool> {
        let updated = self
            .client
            .execute(
                "update alert set active = $2, last_change = $3
                where uuid = $1 and active <> $2",
                &[&uuid, &active, &stamp],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn record_service(&self, service: &ServiceRecord) -> Result<bool> {
        let device = self.find_or_create(Table::Device, service.device).await?;
        let srv = self.find_or_create(Table::Service, service.service).await?;

        let written = self
            .client
            .execute(
                "insert into service_provider as prv (service, device, url)
                values ($1, $2, $3)
                on conflict (service, device) do update
                    set url = $3
                    where prv.url is distinct from $3",
                &[&srv, &device, &service.url],
            )
            .await?;
        Ok(written == 1)
    }

    async fn alert_list(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let sql = format!(
            "{ALERT_SELECT}
            where not a.stale
                and (a.active or not $1)
                and ($2::uuid[] is null or t.uuid = any ($2))
                and ($3::uuid[] is null or d.uuid = any ($3))
            order by a.uuid"
        );
        let rows = self
            .client
            .query(
                sql.as_str(),
                &[&filter.active_only, &filter.types, &filter.devices],
            )
            .await?;
        rows.iter().map(alert).collect()
    }

    async fn alert_by_uuid(&self, uuid: Uuid) -> Result<Option<Alert>> {
        let sql = format!("{ALERT_SELECT} where a.uuid = $1");
        let row = self.client.query_opt(sql.as_str(), &[&uuid]).await?;
        row.as_ref().map(alert).transpose()
    }

    async fn alert_by_id(&self, id: Id) -> Result<Option<AlertSummary>> {
        let row = self
            .client
            .query_opt(
                "select a.uuid, t.uuid atype
                from alert a join alert_type t on a.atype = t.id
                where a.id = $1",
                &[&id],
            )
            .await?;
        row.map(|row| -> Result<AlertSummary> {
            Ok(AlertSummary {
                uuid: row.try_get("uuid")?,
                alert_type: row.try_get("atype")?,
            })
        })
        .transpose()
    }

    async fn link_list(&self, filter: &LinkFilter) -> Result<Vec<Link>> {
        let sql = format!(
            "{LINK_SELECT}
            where not l.stale
                and ($1::uuid is null or d.uuid = $1)
                and ($2::uuid is null or r.uuid = $2)
                and ($3::uuid is null or l.target = $3)
            order by l.uuid"
        );
        let rows = self
            .client
            .query(
                sql.as_str(),
                &[&filter.device, &filter.relation, &filter.target],
            )
            .await?;
        rows.iter().map(link).collect()
    }

    async fn link_by_uuid(&self, uuid: Uuid) -> Result<Option<Link>> {
        let sql = format!("{LINK_SELECT} where l.uuid = $1");
        let row = self.client.query_opt(sql.as_str(), &[&uuid]).await?;
        row.as_ref().map(link).transpose()
    }

    async fn link_by_id(&self, id: Id) -> Result<Option<LinkSummary>> {
        let row = self
            .client
            .query_opt(
                "select l.uuid, r.uuid relation
                from link l join link_rel r on l.relation = r.id
                where l.id = $1",
                &[&id],
            )
            .await?;
        row.map(|row| -> Result<LinkSummary> {
            Ok(LinkSummary {
                uuid: row.try_get("uuid")?,
                relation: row.try_get("relation")?,
            })
        })
        .transpose()
    }

    async fn address_device(&self, address: &Address) -> Result<Option<Uuid>> {
        let row = self
            .client
            .query_opt(
                "select dev.uuid
                from session ses
                    join device dev on dev.id = ses.device
                    join address adr on adr.id = ses.address
                where adr.group_id = $1 and adr.node_id = $2 and adr.device_id = $3
                    and ses.next_for_address is null
                order by ses.id desc
                limit 1",
                &[&address.group, &address.node, &address.device_id()],
            )
            .await?;
        Ok(row.map(|row| row.try_get(0)).transpose()?)
    }

    async fn device_sessions(&self, device: Uuid) -> Result<Vec<Session>> {
        let sql = format!("{SESSION_SELECT} where dev.uuid = $1 order by ses.id");
        let rows = self.client.query(sql.as_str(), &[&device]).await?;
        rows.iter().map(session).collect()
    }

    async fn address_sessions(&self, address: &Address) -> Result<Vec<Session>> {
        let sql = format!(
            "{SESSION_SELECT}
            where adr.group_id = $1 and adr.node_id = $2 and adr.device_id = $3
            order by ses.id"
        );
        let rows = self
            .client
            .query(
                sql.as_str(),
                &[&address.group, &address.node, &address.device_id()],
            )
            .await?;
        rows.iter().map(session).collect()
    }

    async fn session_notification_info(&self, id: Id) -> Result<Option<SessionNotificationInfo>> {
        let row = self
            .client
            .query_opt(
                "select dev.uuid device,
                    adr.group_id, adr.node_id, adr.device_id,
                    ses.next_for_device, ses.next_for_address,
                    prev.id prev_for_device
                from session ses
                    join device dev on dev.id = ses.device
                    join address adr on adr.id = ses.address
                    left join session prev on prev.next_for_device = ses.id
                where ses.id = $1",
                &[&id],
            )
            .await?;
        row.map(|row| -> Result<SessionNotificationInfo> {
            Ok(SessionNotificationInfo {
                device: row.try_get("device")?,
                address: address(&row)?,
                next_for_device: row.try_get("next_for_device")?,
                next_for_address: row.try_get("next_for_address")?,
                prev_for_device: row.try_get("prev_for_device")?,
            })
        })
        .transpose()
    }

    async fn session_schemas(&self, id: Id) -> Result<Vec<Uuid>> {
        let rows = self
            .client
            .query(
                "select sch.uuid
                from schema_used su join schema sch on sch.id = su.schema
                where su.session = $1
                order by sch.uuid",
                &[&id],
            )
            .await?;
        uuids(rows)
    }

    async fn schema_devices(&self, schema: Uuid) -> Result<Vec<Uuid>> {
        let rows = self
            .client
            .query(
                "select distinct dev.uuid
                from schema_used u
                    join schema sch on sch.id = u.schema
                    join session ses on ses.id = u.session
                    join device dev on dev.id = ses.device
                where sch.uuid = $1 and ses.next_for_device is null
                order by dev.uuid",
                &[&schema],
            )
            .await?;
        uuids(rows)
    }

    async fn service_providers(&self, service: Uuid) -> Result<Vec<ServiceProvider>> {
        let rows = self
            .client
            .query(
                "select dev.uuid device, prv.url
                from service_provider prv
                    join service srv on srv.id = prv.service
                    join device dev on dev.id = prv.device
                where srv.uuid = $1
                order by dev.uuid",
                &[&service],
            )
            .await?;
        rows.iter()
            .map(|row| -> Result<ServiceProvider> {
                Ok(ServiceProvider {
                    device: row.try_get("device")?,
                    url: row.try_get("url")?,
                })
            })
            .collect()
    }

    async fn service_from_provider(&self, id: Id) -> Result<Option<Uuid>> {
        let row = self
            .client
            .query_opt(
                "select srv.uuid
                from service_provider prv join service srv on srv.id = prv.service
                where prv.id = $1",
                &[&id],
            )
            .await?;
        Ok(row.map(|row| row.try_get(0)).transpose()?)
    }
}
