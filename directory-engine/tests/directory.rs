use std::{sync::Arc, time::Duration};

use directory_client::{
    channel::{ChannelBroker, ChannelEventLoop, OutboundMessage},
    Event, Message,
};
use directory_engine::{
    datetime, Change, ChangeNotifier, Directory, DirectoryClient, DirectoryConfig, Identity,
};
use directory_store::{tables, AlertFilter, MemoryStore, Notification, Queries};
use directory_types::{
    constants::{uuids, BDSEQ, NODE_CONTROL_REBIRTH},
    payload::{metric::Value, DataType, Metric, Payload},
    topic::{Address, MessageType, Topic, TopicFilter},
};
use tokio::{
    sync::mpsc::UnboundedReceiver,
    task::JoinHandle,
    time::{advance, sleep},
};
use uuid::Uuid;

const DIRECTORY: Uuid = Uuid::from_u128(0xd1);
const OVEN: Uuid = Uuid::from_u128(0x100);
const PRESS: Uuid = Uuid::from_u128(0x200);
const OVERHEAT: Uuid = Uuid::from_u128(0x101);
const OVERHEAT_TYPE: Uuid = Uuid::from_u128(0x102);
const OVEN_SCHEMA: Uuid = Uuid::from_u128(0x103);

fn identity() -> Identity {
    Identity::new("Service-Core", "Directory", DIRECTORY)
}

fn publishing() -> DirectoryConfig {
    DirectoryConfig {
        identity: Some(identity()),
        ..Default::default()
    }
}

fn line() -> Address {
    Address::node("Site", "Line")
}

fn oven() -> Address {
    line().child_device("Oven")
}

fn cooperating(timestamp: u64, metrics: Vec<Metric>) -> Payload {
    let mut payload = Payload::new(timestamp, metrics);
    payload.uuid = Some(uuids::FACTORY_PLUS.to_string());
    payload
}

fn uuid_metric(name: &str, value: Uuid) -> Metric {
    Metric::with_value(name, DataType::Uuid, value)
}

fn oven_birth(device: Uuid, timestamp: u64) -> Payload {
    let mut active = Metric::with_value("Alerts/Overheat/Active", DataType::Boolean, false);
    active.set_alias(7);
    cooperating(
        timestamp,
        vec![
            uuid_metric("Schema_UUID", OVEN_SCHEMA),
            uuid_metric("Instance_UUID", device),
            uuid_metric("Alerts/Overheat/Schema_UUID", uuids::SCHEMA_ALERT),
            uuid_metric("Alerts/Overheat/Instance_UUID", OVERHEAT),
            uuid_metric("Alerts/Overheat/Type", OVERHEAT_TYPE),
            active,
            Metric::with_value("Temperature", DataType::Double, 180.0),
        ],
    )
}

fn overheat(active: bool, timestamp: u64) -> Payload {
    let mut metric = Metric::new();
    metric
        .set_alias(7)
        .set_datatype(DataType::Boolean)
        .set_value(active)
        .set_timestamp(timestamp);
    Payload::new(timestamp, vec![metric])
}

fn temperature() -> Payload {
    Payload::new(
        0,
        vec![Metric::with_value("Temperature", DataType::Double, 181.0)],
    )
}

/// Wait until every task has gone idle. Only meaningful with paused time.
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

struct Harness {
    store: Arc<MemoryStore>,
    broker: ChannelBroker,
    client: DirectoryClient,
    running: JoinHandle<()>,
}

impl Harness {
    fn start(config: DirectoryConfig) -> Self {
        Self::with_store(config, MemoryStore::new())
    }

    fn with_store(config: DirectoryConfig, store: MemoryStore) -> Self {
        let store = Arc::new(store);
        let (eventloop, client, broker) = ChannelEventLoop::new();
        let (directory, client) = Directory::new(config, store.clone(), eventloop, client);
        let running = tokio::spawn(directory.run());
        Self {
            store,
            broker,
            client,
            running,
        }
    }

    fn event(&self, event: Event) {
        self.broker.tx_event.send(event).unwrap();
    }

    fn send(&self, address: &Address, message_type: MessageType, payload: Payload) {
        self.event(Event::Message(Message {
            topic: address.topic(message_type),
            payload,
        }));
    }

    fn outbound(&mut self) -> Vec<OutboundMessage> {
        let mut all = Vec::new();
        while let Ok(message) = self.broker.rx_outbound.try_recv() {
            all.push(message);
        }
        all
    }

    fn published(&mut self) -> Vec<(Topic, Payload)> {
        self.outbound()
            .into_iter()
            .filter_map(|message| match message {
                OutboundMessage::Publish { topic, payload } => Some((topic, payload)),
                _ => None,
            })
            .collect()
    }
}

fn names(payload: &Payload) -> Vec<&str> {
    payload
        .metrics
        .iter()
        .filter_map(|m| m.name.as_deref())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn online_subscribes_and_births() {
    let mut h = Harness::start(publishing());
    let own = identity().address;

    let will = h.broker.last_will().unwrap();
    assert_eq!(will.topic, own.topic(MessageType::Death).to_string());

    h.event(Event::Online);
    settle().await;

    let outbound = h.outbound();
    assert_eq!(
        outbound[0],
        OutboundMessage::Subscribe(vec![TopicFilter::namespace()])
    );
    let OutboundMessage::Publish { topic, payload } = &outbound[1] else {
        panic!("expected a birth, got {:?}", outbound[1]);
    };
    assert_eq!(*topic, own.topic(MessageType::Birth));
    assert_eq!(payload.uuid.as_deref(), Some(uuids::FACTORY_PLUS.to_string().as_str()));
    assert_eq!(payload.seq, Some(0));
    let birth = names(payload);
    assert!(birth.contains(&BDSEQ));
    assert!(birth.contains(&NODE_CONTROL_REBIRTH));
    assert!(birth.contains(&"Instance_UUID"));
    assert!(birth.contains(&"Last_Changed/Device_Address"));

    // a reconnection births again with the next bdSeq
    h.event(Event::Offline);
    h.event(Event::Online);
    settle().await;
    let (_, rebirth) = h
        .published()
        .into_iter()
        .find(|(topic, _)| topic.message_type == MessageType::Birth)
        .unwrap();
    let bd_seq = rebirth
        .metrics
        .iter()
        .find(|m| m.name.as_deref() == Some(BDSEQ))
        .unwrap();
    assert_eq!(bd_seq.value, Some(Value::LongValue(1)));
}

#[tokio::test(start_paused = true)]
async fn silent_directory_publishes_nothing() {
    let mut h = Harness::start(DirectoryConfig {
        silent: true,
        ..publishing()
    });
    assert!(h.broker.last_will().is_none());

    h.event(Event::Online);
    h.send(&line().child_device("Ghost"), MessageType::Data, temperature());
    settle().await;
    advance(Duration::from_secs(11)).await;
    settle().await;

    assert!(h.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn alert_lifecycle() {
    let h = Harness::start(DirectoryConfig::default());

    h.send(&oven(), MessageType::Birth, oven_birth(OVEN, 1000));
    settle().await;

    let alert = h.store.alert_by_uuid(OVERHEAT).await.unwrap().unwrap();
    assert_eq!(alert.device, OVEN);
    assert_eq!(alert.alert_type, OVERHEAT_TYPE);
    assert!(!alert.active);
    assert!(!alert.stale);

    h.send(&oven(), MessageType::Data, overheat(true, 2000));
    settle().await;
    let alert = h.store.alert_by_uuid(OVERHEAT).await.unwrap().unwrap();
    assert!(alert.active);
    assert_eq!(alert.last_change, datetime(2000));

    // repeating the state does not move the change time
    h.send(&oven(), MessageType::Data, overheat(true, 3000));
    settle().await;
    let alert = h.store.alert_by_uuid(OVERHEAT).await.unwrap().unwrap();
    assert_eq!(alert.last_change, datetime(2000));

    h.send(&line(), MessageType::Death, Payload::new(4000, vec![]));
    settle().await;
    let sessions = h.store.device_sessions(OVEN).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].finish, Some(datetime(4000)));

    // the alert index went with the device
    h.send(&oven(), MessageType::Data, overheat(false, 5000));
    settle().await;
    let alert = h.store.alert_by_uuid(OVERHEAT).await.unwrap().unwrap();
    assert!(alert.active);

    let active = AlertFilter {
        active_only: true,
        ..Default::default()
    };
    let listed = h.store.alert_list(&active).await.unwrap();
    assert_eq!(listed.iter().map(|a| a.uuid).collect::<Vec<_>>(), vec![OVERHEAT]);

    // a rebirth that no longer declares the alert takes it out of the listings
    h.send(
        &oven(),
        MessageType::Birth,
        cooperating(6000, vec![uuid_metric("Instance_UUID", OVEN)]),
    );
    settle().await;
    let alert = h.store.alert_by_uuid(OVERHEAT).await.unwrap().unwrap();
    assert!(alert.stale);
    assert!(h.store.alert_list(&active).await.unwrap().is_empty());
    assert!(h
        .store
        .alert_list(&AlertFilter::default())
        .await
        .unwrap()
        .iter()
        .all(|a| a.uuid != OVERHEAT));
}

#[tokio::test(start_paused = true)]
async fn rebirth_drops_alerts_no_longer_declared() {
    let h = Harness::start(DirectoryConfig::default());

    h.send(&oven(), MessageType::Birth, oven_birth(OVEN, 1000));
    h.send(
        &oven(),
        MessageType::Birth,
        cooperating(2000, vec![uuid_metric("Instance_UUID", OVEN)]),
    );
    settle().await;

    let alert = h.store.alert_by_uuid(OVERHEAT).await.unwrap().unwrap();
    assert!(alert.stale);
    assert_eq!(h.store.device_sessions(OVEN).await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn device_moves_address() {
    let h = Harness::start(DirectoryConfig::default());
    let press = line().child_device("Press");

    h.send(&oven(), MessageType::Birth, oven_birth(OVEN, 1000));
    h.send(&press, MessageType::Birth, oven_birth(OVEN, 2000));
    h.send(&oven(), MessageType::Birth, oven_birth(PRESS, 3000));
    settle().await;

    let sessions = h.store.device_sessions(OVEN).await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].address, oven());
    assert_eq!(sessions[1].address, press);
    assert_eq!(sessions[0].next_for_device, Some(sessions[1].id));

    assert_eq!(h.store.address_device(&press).await.unwrap(), Some(OVEN));
    assert_eq!(h.store.address_device(&oven()).await.unwrap(), Some(PRESS));
}

#[tokio::test(start_paused = true)]
async fn messages_are_handled_in_order() {
    let h = Harness::start(DirectoryConfig::default());

    // BIRTH, DATA and DEATH queued together still apply in sequence
    h.send(&oven(), MessageType::Birth, oven_birth(OVEN, 1000));
    h.send(&oven(), MessageType::Data, overheat(true, 2000));
    h.send(&oven(), MessageType::Death, Payload::new(3000, vec![]));
    settle().await;

    let alert = h.store.alert_by_uuid(OVERHEAT).await.unwrap().unwrap();
    assert!(alert.active);
    let sessions = h.store.device_sessions(OVEN).await.unwrap();
    assert_eq!(sessions[0].finish, Some(datetime(3000)));
}

#[tokio::test(start_paused = true)]
async fn bad_birth_does_not_stop_the_queue() {
    let h = Harness::start(DirectoryConfig::default());
    let broken = line().child_device("Broken");

    h.send(
        &broken,
        MessageType::Birth,
        cooperating(
            1000,
            vec![Metric::with_value("Instance_UUID", DataType::Uuid, "garbage")],
        ),
    );
    h.send(&oven(), MessageType::Birth, oven_birth(OVEN, 2000));
    settle().await;

    assert_eq!(h.store.address_device(&broken).await.unwrap(), None);
    assert_eq!(h.store.address_device(&oven()).await.unwrap(), Some(OVEN));
}

#[tokio::test(start_paused = true)]
async fn unknown_data_requests_one_rebirth() {
    let mut h = Harness::start(publishing());
    let quiet = Address::node("Site", "Quiet");
    let own = identity().address;

    for _ in 0..3 {
        h.send(&quiet, MessageType::Data, temperature());
    }
    settle().await;
    assert!(h.published().is_empty());

    advance(Duration::from_secs(11)).await;
    settle().await;
    let published = h.published();
    assert_eq!(published.len(), 1);
    let (topic, payload) = &published[0];
    assert_eq!(*topic, own.topic(MessageType::Data));
    assert_eq!(names(payload), vec!["Execute_Remote_Command"]);

    // cooling down
    h.send(&quiet, MessageType::Data, temperature());
    settle().await;
    advance(Duration::from_secs(11)).await;
    settle().await;
    assert!(h.published().is_empty());

    advance(Duration::from_secs(300)).await;
    h.send(&quiet, MessageType::Data, temperature());
    settle().await;
    advance(Duration::from_secs(11)).await;
    settle().await;
    assert_eq!(h.published().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn online_address_gets_no_rebirth() {
    let mut h = Harness::start(publishing());

    h.send(&oven(), MessageType::Birth, oven_birth(OVEN, 1000));
    settle().await;
    for n in 0..5 {
        h.send(&oven(), MessageType::Data, temperature());
        h.send(&oven(), MessageType::Data, overheat(n % 2 == 0, 2000 + n));
    }
    settle().await;

    advance(Duration::from_secs(11)).await;
    settle().await;
    let published = h.published();
    assert!(
        published.iter().all(|(topic, payload)| {
            topic.message_type != MessageType::Cmd
                && !names(payload).contains(&"Execute_Remote_Command")
        }),
        "unexpected rebirth request: {published:?}"
    );
    assert!(published.is_empty());
}

#[tokio::test(start_paused = true)]
async fn birth_during_window_cancels_rebirth() {
    let mut h = Harness::start(publishing());

    h.send(&oven(), MessageType::Data, temperature());
    settle().await;
    h.send(&oven(), MessageType::Birth, oven_birth(OVEN, 1000));
    settle().await;

    advance(Duration::from_secs(11)).await;
    settle().await;
    assert!(h.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn monitor_only_writes_rebirth_to_node() {
    let mut h = Harness::start(DirectoryConfig::default());
    assert!(h.broker.last_will().is_none());

    h.send(&oven(), MessageType::Data, temperature());
    settle().await;
    advance(Duration::from_secs(11)).await;
    settle().await;

    let published = h.published();
    assert_eq!(published.len(), 1);
    let (topic, payload) = &published[0];
    assert_eq!(*topic, line().topic(MessageType::Cmd));
    assert_eq!(payload.metrics[0].name.as_deref(), Some(NODE_CONTROL_REBIRTH));
    assert_eq!(payload.metrics[0].as_bool(), Some(true));
}

#[tokio::test(start_paused = true)]
async fn rebirth_command_republishes_birth() {
    let mut h = Harness::start(publishing());
    let own = identity().address;
    h.event(Event::Online);
    settle().await;
    h.outbound();

    let rebirth = Payload::new(
        0,
        vec![Metric::with_value(
            NODE_CONTROL_REBIRTH,
            DataType::Boolean,
            true,
        )],
    );
    h.send(&line(), MessageType::Cmd, rebirth.clone());
    settle().await;
    assert!(h.published().is_empty());

    h.send(&own, MessageType::Cmd, rebirth);
    settle().await;
    let published = h.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, own.topic(MessageType::Birth));
}

#[tokio::test(start_paused = true)]
async fn cancel_sends_death_and_stops() {
    let mut h = Harness::start(publishing());
    h.event(Event::Online);
    settle().await;
    h.outbound();

    h.client.cancel().await;
    (&mut h.running).await.unwrap();

    let outbound = h.outbound();
    assert!(matches!(
        &outbound[0],
        OutboundMessage::Publish { topic, .. } if topic.message_type == MessageType::Death
    ));
    assert_eq!(outbound[1], OutboundMessage::Disconnect);
}

fn drain(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut all = Vec::new();
    while let Ok(n) = rx.try_recv() {
        all.push(n);
    }
    all
}

#[tokio::test(start_paused = true)]
async fn notifier_publishes_last_changed() {
    let (store, mut notifications) = MemoryStore::with_notifications();
    let mut h = Harness::with_store(publishing(), store);
    let own = identity().address;

    h.send(&oven(), MessageType::Birth, oven_birth(OVEN, 1000));
    settle().await;

    let notifier = ChangeNotifier::new(h.store.clone(), h.client.clone());
    let mut changes = Vec::new();
    for notification in drain(&mut notifications) {
        changes.extend(notifier.changes(&notification).await.unwrap());
        notifier.handle(&notification).await;
    }
    assert!(changes.contains(&Change::DeviceUuid(OVEN)));
    assert!(changes.contains(&Change::DeviceAddress(oven())));
    assert!(changes.contains(&Change::AlertType(OVERHEAT_TYPE)));
    assert!(changes.contains(&Change::SchemaUsage(uuids::SCHEMA_ALERT)));
    assert!(changes.contains(&Change::SchemaUsage(OVEN_SCHEMA)));

    let published = h.published();
    assert!(!published.is_empty());
    assert!(published
        .iter()
        .all(|(topic, _)| *topic == own.topic(MessageType::Data)));
    let metrics: Vec<&str> = published.iter().flat_map(|(_, p)| names(p)).collect();
    assert!(metrics.contains(&"Last_Changed/Device_UUID"));
    assert!(metrics.contains(&"Last_Changed/Alert_Type"));

    // a rebirth with the same schemas reports no schema usage change
    h.send(&oven(), MessageType::Birth, oven_birth(OVEN, 2000));
    settle().await;
    let current = h.store.device_sessions(OVEN).await.unwrap()[1].id;
    let changes = notifier
        .changes(&Notification::new(tables::SESSION, current))
        .await
        .unwrap();
    assert!(changes.contains(&Change::DeviceUuid(OVEN)));
    assert!(!changes
        .iter()
        .any(|change| matches!(change, Change::SchemaUsage(_))));
}

#[tokio::test]
async fn notifier_ignores_unknown_tables() {
    let (eventloop, client, _broker) = ChannelEventLoop::new();
    let store = Arc::new(MemoryStore::new());
    let (_directory, client) =
        Directory::new(DirectoryConfig::default(), store.clone(), eventloop, client);
    let notifier = ChangeNotifier::new(store, client);

    let changes = notifier
        .changes(&Notification::new("schema", 1))
        .await
        .unwrap();
    assert!(changes.is_empty());
    let changes = notifier
        .changes(&Notification::new("alert", 99))
        .await
        .unwrap();
    assert!(changes.is_empty());
}
