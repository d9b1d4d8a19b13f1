use chrono::{DateTime, TimeZone, Utc};
use directory_store::{
    tables, txn, AlertFilter, AlertRecord, BirthRecord, Error, Id, LinkFilter, LinkRecord,
    MemoryStore, Notification, Queries, ServiceRecord, Store, Table,
};
use directory_types::topic::Address;
use futures::FutureExt;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap()
}

fn uuid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

async fn birth(store: &MemoryStore, device: Uuid, address: &Address, time: i64) -> Id {
    let device = store.find_or_create(Table::Device, device).await.unwrap();
    let address = store.find_or_create_address(address).await.unwrap();
    store
        .record_birth(&BirthRecord {
            device,
            address,
            time: at(time),
            top_schema: None,
        })
        .await
        .unwrap()
}

fn drain(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut all = Vec::new();
    while let Ok(n) = rx.try_recv() {
        all.push(n);
    }
    all
}

#[tokio::test]
async fn sessions_chain_per_device_and_address() {
    let store = MemoryStore::new();
    let a1 = Address::device("g", "n", "d1");
    let a2 = Address::device("g", "n", "d2");
    let dev = uuid(1);
    let other = uuid(2);

    let first = birth(&store, dev, &a1, 1000).await;
    let moved = birth(&store, dev, &a2, 2000).await;

    let sessions = store.device_sessions(dev).await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].id, first);
    assert_eq!(sessions[0].next_for_device, Some(moved));
    assert!(sessions[0].is_current_for_address());
    assert!(sessions[1].is_current_for_device());

    // a1 still shows its last occupant until another device births there
    assert_eq!(store.address_device(&a1).await.unwrap(), Some(dev));
    let replaced = birth(&store, other, &a1, 3000).await;
    assert_eq!(store.address_device(&a1).await.unwrap(), Some(other));
    assert_eq!(store.address_device(&a2).await.unwrap(), Some(dev));

    let at_a1 = store.address_sessions(&a1).await.unwrap();
    assert_eq!(at_a1.len(), 2);
    assert_eq!(at_a1[0].next_for_address, Some(replaced));
    assert_eq!(at_a1[0].next_for_device, Some(moved));
}

#[tokio::test]
async fn rebirth_at_same_address_supersedes_both_chains() {
    let store = MemoryStore::new();
    let address = Address::device("g", "n", "d");
    let first = birth(&store, uuid(1), &address, 1000).await;
    let second = birth(&store, uuid(1), &address, 2000).await;

    let info = store.session_notification_info(first).await.unwrap().unwrap();
    assert_eq!(info.next_for_device, Some(second));
    assert_eq!(info.next_for_address, Some(second));

    let info = store.session_notification_info(second).await.unwrap().unwrap();
    assert_eq!(info.prev_for_device, Some(first));
    assert_eq!(info.next_for_device, None);
}

#[tokio::test]
async fn node_death_closes_devices_and_is_idempotent() {
    let store = MemoryStore::new();
    let node = Address::node("g", "n");
    let child = node.child_device("d");
    let elsewhere = Address::device("g", "n2", "d");
    birth(&store, uuid(1), &node, 1000).await;
    birth(&store, uuid(2), &child, 1000).await;
    birth(&store, uuid(3), &elsewhere, 1000).await;

    let closed = store.record_death(&node, at(5000)).await.unwrap();
    let mut devices: Vec<Uuid> = closed.iter().map(|c| c.device).collect();
    devices.sort();
    assert_eq!(devices, vec![uuid(1), uuid(2)]);

    let again = store.record_death(&node, at(6000)).await.unwrap();
    assert!(again.is_empty());

    let sessions = store.device_sessions(uuid(2)).await.unwrap();
    assert_eq!(sessions[0].finish, Some(at(5000)));
    assert!(store.device_sessions(uuid(3)).await.unwrap()[0].is_open());
}

#[tokio::test]
async fn device_death_leaves_node_open() {
    let store = MemoryStore::new();
    let node = Address::node("g", "n");
    birth(&store, uuid(1), &node, 1000).await;
    birth(&store, uuid(2), &node.child_device("d"), 1000).await;

    let closed = store
        .record_death(&node.child_device("d"), at(2000))
        .await
        .unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].device, uuid(2));
    assert!(store.device_sessions(uuid(1)).await.unwrap()[0].is_open());
}

#[tokio::test]
async fn links_go_stale_and_come_back() {
    let store = MemoryStore::new();
    let device = store.find_or_create(Table::Device, uuid(1)).await.unwrap();
    for n in [10, 11] {
        store
            .record_link(
                device,
                &LinkRecord {
                    uuid: uuid(n),
                    source: uuid(1),
                    relation: uuid(50),
                    target: uuid(60),
                },
            )
            .await
            .unwrap();
    }

    let marked = store.record_stale_links(device, &[uuid(10)]).await.unwrap();
    assert_eq!(marked, 1);
    let live = store.link_list(&LinkFilter::default()).await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].uuid, uuid(10));
    assert!(store.link_by_uuid(uuid(11)).await.unwrap().unwrap().stale);

    store
        .record_link(
            device,
            &LinkRecord {
                uuid: uuid(11),
                source: uuid(1),
                relation: uuid(50),
                target: uuid(60),
            },
        )
        .await
        .unwrap();
    assert!(!store.link_by_uuid(uuid(11)).await.unwrap().unwrap().stale);

    let filter = LinkFilter {
        target: Some(uuid(60)),
        ..Default::default()
    };
    assert_eq!(store.link_list(&filter).await.unwrap().len(), 2);
}

fn alert(active: bool, stamp: i64, links: Vec<Uuid>) -> AlertRecord {
    AlertRecord {
        uuid: uuid(100),
        alert_type: uuid(200),
        metric: "Alerts/Overheat/Active".into(),
        active,
        stamp: at(stamp),
        links,
    }
}

#[tokio::test]
async fn repeated_alert_writes_nothing() {
    let (store, mut rx) = MemoryStore::with_notifications();
    let device = store.find_or_create(Table::Device, uuid(1)).await.unwrap();

    store.record_alert(device, &alert(false, 1000, vec![])).await.unwrap();
    let first = drain(&mut rx);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].table, tables::ALERT);

    store.record_alert(device, &alert(false, 9000, vec![])).await.unwrap();
    assert!(drain(&mut rx).is_empty());
    let stored = store.alert_by_uuid(uuid(100)).await.unwrap().unwrap();
    assert_eq!(stored.last_change, at(1000));
}

#[tokio::test]
async fn alert_active_flip_moves_last_change() {
    let (store, mut rx) = MemoryStore::with_notifications();
    let device = store.find_or_create(Table::Device, uuid(1)).await.unwrap();
    store.record_alert(device, &alert(false, 1000, vec![])).await.unwrap();
    drain(&mut rx);

    assert!(!store.update_alert_active(uuid(100), false, at(2000)).await.unwrap());
    assert!(drain(&mut rx).is_empty());

    assert!(store.update_alert_active(uuid(100), true, at(3000)).await.unwrap());
    assert_eq!(drain(&mut rx).len(), 1);
    let stored = store.alert_by_uuid(uuid(100)).await.unwrap().unwrap();
    assert!(stored.active);
    assert_eq!(stored.last_change, at(3000));

    let active = AlertFilter {
        active_only: true,
        ..Default::default()
    };
    assert_eq!(store.alert_list(&active).await.unwrap().len(), 1);

    assert!(!store.update_alert_active(uuid(999), true, at(4000)).await.unwrap());
}

#[tokio::test]
async fn alert_links_follow_recorded_links() {
    let (store, mut rx) = MemoryStore::with_notifications();
    let device = store.find_or_create(Table::Device, uuid(1)).await.unwrap();
    store
        .record_link(
            device,
            &LinkRecord {
                uuid: uuid(10),
                source: uuid(100),
                relation: uuid(50),
                target: uuid(60),
            },
        )
        .await
        .unwrap();

    // uuid(11) was never recorded so it is not associated
    store
        .record_alert(device, &alert(false, 1000, vec![uuid(11), uuid(10)]))
        .await
        .unwrap();
    drain(&mut rx);
    let stored = store.alert_by_uuid(uuid(100)).await.unwrap().unwrap();
    assert_eq!(stored.links, vec![uuid(10)]);

    store
        .record_alert(device, &alert(false, 1000, vec![uuid(10), uuid(11)]))
        .await
        .unwrap();
    assert!(drain(&mut rx).is_empty());

    store.record_alert(device, &alert(false, 1000, vec![])).await.unwrap();
    assert_eq!(drain(&mut rx).len(), 1);
    let stored = store.alert_by_uuid(uuid(100)).await.unwrap().unwrap();
    assert!(stored.links.is_empty());
}

#[tokio::test]
async fn failed_transaction_leaves_no_trace() {
    let (store, mut rx) = MemoryStore::with_notifications();
    let address = Address::device("g", "n", "d");

    let result = store
        .transaction(txn(move |q| {
            async move {
                let device = q.find_or_create(Table::Device, uuid(1)).await?;
                let address = q.find_or_create_address(&address).await?;
                q.record_birth(&BirthRecord {
                    device,
                    address,
                    time: at(1000),
                    top_schema: None,
                })
                .await?;
                Err(Error::MissingRow("session"))
            }
            .boxed()
        }))
        .await;

    assert!(result.is_err());
    assert!(store.device_sessions(uuid(1)).await.unwrap().is_empty());
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn committed_transaction_notifies() {
    let (store, mut rx) = MemoryStore::with_notifications();
    let address = Address::device("g", "n", "d");

    store
        .transaction(txn(move |q| {
            async move {
                let device = q.find_or_create(Table::Device, uuid(1)).await?;
                let address = q.find_or_create_address(&address).await?;
                let session = q
                    .record_birth(&BirthRecord {
                        device,
                        address,
                        time: at(1000),
                        top_schema: Some(uuid(7)),
                    })
                    .await?;
                q.record_schema(session, uuid(7)).await?;
                q.record_schema(session, uuid(8)).await?;
                Ok(())
            }
            .boxed()
        }))
        .await
        .unwrap();

    let changes = drain(&mut rx);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].table, tables::SESSION);

    let session = store.device_sessions(uuid(1)).await.unwrap().remove(0);
    assert_eq!(session.top_schema, Some(uuid(7)));
    assert_eq!(
        store.session_schemas(session.id).await.unwrap(),
        vec![uuid(7), uuid(8)]
    );
    assert_eq!(store.schema_devices(uuid(8)).await.unwrap(), vec![uuid(1)]);
}

#[tokio::test]
async fn reads_inside_a_transaction_see_its_writes() {
    let (store, mut rx) = MemoryStore::with_notifications();
    let address = Address::device("g", "n", "d");
    birth(&store, uuid(1), &address, 1000).await;
    drain(&mut rx);

    let (tx, seen) = tokio::sync::oneshot::channel();
    store
        .transaction(txn(move |q| {
            async move {
                let device = q.find_or_create(Table::Device, uuid(1)).await?;
                let address = q.find_or_create_address(&address).await?;
                q.record_birth(&BirthRecord {
                    device,
                    address,
                    time: at(2000),
                    top_schema: None,
                })
                .await?;
                _ = tx.send(q.device_sessions(uuid(1)).await?.len());
                Ok(())
            }
            .boxed()
        }))
        .await
        .unwrap();

    assert_eq!(seen.await.unwrap(), 2);
    assert_eq!(store.device_sessions(uuid(1)).await.unwrap().len(), 2);

    // reads alone change nothing
    drain(&mut rx);
    store.device_sessions(uuid(1)).await.unwrap();
    store.alert_list(&AlertFilter::default()).await.unwrap();
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn missing_uuid_is_stable() {
    let store = MemoryStore::new();
    let address = store
        .find_or_create_address(&Address::node("g", "n"))
        .await
        .unwrap();
    let first = store.find_or_create_missing_uuid(address).await.unwrap();
    let second = store.find_or_create_missing_uuid(address).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn service_adverts_update_only_on_change() {
    let (store, mut rx) = MemoryStore::with_notifications();
    let advert = |url: &str| ServiceRecord {
        service: uuid(5),
        device: uuid(1),
        url: Some(url.to_string()),
    };

    assert!(store.record_service(&advert("http://a")).await.unwrap());
    assert!(!store.record_service(&advert("http://a")).await.unwrap());
    assert!(store.record_service(&advert("http://b")).await.unwrap());

    let changes = drain(&mut rx);
    assert_eq!(changes.len(), 2);
    assert_eq!(
        store.service_from_provider(changes[0].id).await.unwrap(),
        Some(uuid(5))
    );

    let providers = store.service_providers(uuid(5)).await.unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].url.as_deref(), Some("http://b"));
}
