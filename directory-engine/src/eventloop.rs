use std::{
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use directory_client::{Client, DynClient, DynEventLoop, Event, EventLoop, LastWill, Message};
use directory_types::{
    constants::{metrics, uuids, BDSEQ, NODE_CONTROL_REBIRTH},
    payload::{DataType, Metric, Payload, Template},
    topic::{Address, MessageType, TopicFilter},
    utils::timestamp,
};
use log::{debug, info, warn};
use tokio::{
    select,
    sync::mpsc::{self, Receiver},
    task,
    time::timeout,
};
use uuid::Uuid;

use crate::config::Identity;

struct Shutdown;

const COMMAND_REQUEST_TEMPLATE: &str = "Command_Request_Template";
const COMMAND_RESPONSE_TEMPLATE: &str = "Command_Response_Template";
const EXECUTE_REMOTE_COMMAND: &str = "Execute_Remote_Command";
const REMOTE_COMMAND_RESPONSE: &str = "Remote_Command_Response";
const REMOTE_COMMAND_RESPONSE_JSON: &str = "Remote_Command_Response_JSON";

/// A change to the directory's contents, published as a `Last_Changed/*` metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Change {
    DeviceUuid(Uuid),
    DeviceAddress(Address),
    SchemaUsage(Uuid),
    Service(Uuid),
    AlertType(Uuid),
    LinkRelation(Uuid),
}

impl Change {
    const NAMES: [&'static str; 6] = [
        "Device_UUID",
        "Device_Address",
        "Schema_Usage",
        "Service",
        "Alert_Type",
        "Link_Relation",
    ];

    fn name(&self) -> &'static str {
        let index = match self {
            Change::DeviceUuid(_) => 0,
            Change::DeviceAddress(_) => 1,
            Change::SchemaUsage(_) => 2,
            Change::Service(_) => 3,
            Change::AlertType(_) => 4,
            Change::LinkRelation(_) => 5,
        };
        Self::NAMES[index]
    }

    fn metric(&self) -> Metric {
        let name = format!("{}/{}", metrics::LAST_CHANGED, self.name());
        match self {
            Change::DeviceAddress(address) => {
                Metric::with_value(name, DataType::String, address.to_string())
            }
            Change::DeviceUuid(uuid)
            | Change::SchemaUsage(uuid)
            | Change::Service(uuid)
            | Change::AlertType(uuid)
            | Change::LinkRelation(uuid) => Metric::with_value(name, DataType::Uuid, *uuid),
        }
    }
}

fn command_template(
    name: &str,
    template_ref: Option<&str>,
    last: &str,
    values: Option<[String; 5]>,
    stamp: u64,
) -> Metric {
    let names = [
        "Receivers_Group_ID",
        "Receivers_Edge_Node_ID",
        "Receivers_Device_ID",
        "Tag_Path",
        last,
    ];
    let with_values = values.is_some();
    let mut template_metrics: Vec<Metric> = match values {
        Some(values) => names
            .iter()
            .zip(values)
            .map(|(name, value)| Metric::with_value(*name, DataType::String, value))
            .collect(),
        None => names
            .iter()
            .map(|name| {
                let mut metric = Metric::new();
                metric
                    .set_name(name.to_string())
                    .set_datatype(DataType::String);
                metric
            })
            .collect(),
    };
    let mut command_timestamp = Metric::new();
    command_timestamp
        .set_name("Command_Timestamp".into())
        .set_datatype(DataType::DateTime);
    if with_values {
        command_timestamp.set_value(stamp);
    }
    template_metrics.push(command_timestamp);

    let template = Template {
        version: Some(String::new()),
        metrics: template_metrics,
        template_ref: template_ref.map(str::to_string),
        is_definition: Some(template_ref.is_none()),
    };
    Metric::with_value(name, DataType::Template, template)
}

/// The command escalation definitions every escalating node declares in its BIRTH
fn command_escalation_birth() -> Vec<Metric> {
    let mut json = Metric::new();
    json.set_name(REMOTE_COMMAND_RESPONSE_JSON.into())
        .set_datatype(DataType::String);
    vec![
        command_template(COMMAND_REQUEST_TEMPLATE, None, "Tag_Value", None, 0),
        command_template(COMMAND_RESPONSE_TEMPLATE, None, "Response", None, 0),
        command_template(
            EXECUTE_REMOTE_COMMAND,
            Some(COMMAND_REQUEST_TEMPLATE),
            "Tag_Value",
            None,
            0,
        ),
        command_template(
            REMOTE_COMMAND_RESPONSE,
            Some(COMMAND_RESPONSE_TEMPLATE),
            "Response",
            None,
            0,
        ),
        json,
    ]
}

/// An escalated request asking the command escalation service to write `value` to `tag` on `target`.
pub fn command_request(target: &Address, tag: &str, value: &str, stamp: u64) -> Metric {
    command_template(
        EXECUTE_REMOTE_COMMAND,
        Some(COMMAND_REQUEST_TEMPLATE),
        "Tag_Value",
        Some([
            target.group.clone(),
            target.node.clone(),
            target.device_id().to_string(),
            tag.to_string(),
            value.to_string(),
        ]),
        stamp,
    )
}

struct ClientState {
    identity: Option<Identity>,
    bd_seq: AtomicU64,
    seq: AtomicU8,
}

impl ClientState {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) as u64
    }

    fn death_payload(&self) -> Payload {
        Payload::new(
            timestamp(),
            vec![Metric::with_value(
                BDSEQ,
                DataType::UInt64,
                self.bd_seq.load(Ordering::SeqCst),
            )],
        )
    }
}

/// The client to interact with the [DirectoryEventLoop] and Sparkplug namespace from.
#[derive(Clone)]
pub struct DirectoryClient {
    client: Arc<DynClient>,
    sender: mpsc::Sender<Shutdown>,
    state: Arc<ClientState>,
}

impl DirectoryClient {
    /// The identity the directory publishes as, `None` when it only monitors.
    pub fn identity(&self) -> Option<&Identity> {
        self.state.identity.as_ref()
    }

    fn payload(&self, metrics: Vec<Metric>) -> Payload {
        let mut payload = Payload::new(timestamp(), metrics);
        payload.seq = Some(self.state.next_seq());
        payload
    }

    /// Stop all operations, sending a death certificate and disconnecting from the broker.
    ///
    /// This will produce a [DirectoryEvent::Cancelled] event on the [DirectoryEventLoop] after the directory has gracefully disconnected
    pub async fn cancel(&self) {
        info!("Directory stopping");
        if let Some(identity) = self.identity() {
            let topic = identity.address.topic(MessageType::Death);
            if self
                .client
                .try_publish(topic, self.state.death_payload())
                .await
                .is_err()
            {
                debug!("Unable to publish NDEATH on exit");
            }
        }
        _ = self.sender.send(Shutdown).await;
        _ = self.client.disconnect().await;
    }

    /// Publish the directory's NBIRTH. Does nothing when monitoring only.
    pub async fn publish_birth(&self) -> Result<(), ()> {
        let Some(identity) = self.identity() else {
            return Ok(());
        };

        self.state.seq.store(0, Ordering::SeqCst);
        let mut birth = vec![
            Metric::with_value(
                BDSEQ,
                DataType::UInt64,
                self.state.bd_seq.load(Ordering::SeqCst),
            ),
            Metric::with_value(NODE_CONTROL_REBIRTH, DataType::Boolean, false),
        ];
        birth.extend(command_escalation_birth());
        birth.extend([
            Metric::with_value(
                "Device_Information/Schema_UUID",
                DataType::Uuid,
                uuids::SCHEMA_DEVICE_INFORMATION,
            ),
            Metric::with_value(
                "Device_Information/Manufacturer",
                DataType::String,
                env!("CARGO_PKG_AUTHORS"),
            ),
            Metric::with_value(
                "Device_Information/Model",
                DataType::String,
                env!("CARGO_PKG_NAME"),
            ),
            Metric::with_value(
                "Device_Information/Serial",
                DataType::String,
                env!("CARGO_PKG_VERSION"),
            ),
            Metric::with_value(metrics::SCHEMA_UUID, DataType::Uuid, uuids::SCHEMA_SERVICE),
            Metric::with_value(metrics::INSTANCE_UUID, DataType::Uuid, identity.device),
            Metric::with_value(
                metrics::SERVICE_UUID,
                DataType::Uuid,
                uuids::SERVICE_DIRECTORY,
            ),
            Metric::with_value(
                metrics::SERVICE_URL,
                DataType::String,
                identity.service_url.clone().unwrap_or_default(),
            ),
        ]);
        for name in Change::NAMES {
            let datatype = if name == "Device_Address" {
                DataType::String
            } else {
                DataType::Uuid
            };
            birth.push(Metric::with_value(
                format!("{}/{name}", metrics::LAST_CHANGED),
                datatype,
                "",
            ));
        }

        let mut payload = self.payload(birth);
        payload.uuid = Some(uuids::FACTORY_PLUS.to_string());
        info!("Publishing birth certificate");
        self.client
            .publish(identity.address.topic(MessageType::Birth), payload)
            .await
    }

    /// Ask the Node that `target` belongs to for a rebirth.
    ///
    /// With an identity the request is escalated through the directory's own DATA topic,
    /// otherwise `Node Control/Rebirth` is written to the Node directly.
    pub async fn publish_rebirth_request(&self, target: &Address) -> Result<(), ()> {
        let node = target.parent_node();
        match self.identity() {
            Some(identity) => {
                info!("Sending escalated rebirth request to {node}");
                let request = command_request(&node, NODE_CONTROL_REBIRTH, "true", timestamp());
                let payload = self.payload(vec![request]);
                self.client
                    .publish(identity.address.topic(MessageType::Data), payload)
                    .await
            }
            None => {
                info!("Sending rebirth request to {node}");
                let rebirth = Metric::with_value(NODE_CONTROL_REBIRTH, DataType::Boolean, true);
                self.client
                    .publish(
                        node.topic(MessageType::Cmd),
                        Payload::new(timestamp(), vec![rebirth]),
                    )
                    .await
            }
        }
    }

    /// Publish `Last_Changed` metrics. Does nothing when monitoring only.
    pub async fn publish_changed(&self, changes: Vec<Change>) -> Result<(), ()> {
        let Some(identity) = self.identity() else {
            return Ok(());
        };
        if changes.is_empty() {
            return Ok(());
        }
        debug!("Publish changed: {changes:?}");
        let payload = self.payload(changes.iter().map(Change::metric).collect());
        self.client
            .publish(identity.address.topic(MessageType::Data), payload)
            .await
    }
}

/// An event produced by the [DirectoryEventLoop]
#[derive(Debug, PartialEq)]
pub enum DirectoryEvent {
    /// Connected to the broker
    Online,
    /// Disconnected from the broker
    Offline,
    Message(Message),
    Cancelled,
}

/// Drives the transport for the directory.
///
/// On top of [directory_client::EventLoop] functionality, it subscribes to the whole Sparkplug
/// namespace when online, publishes the directory's BIRTH and keeps its NDEATH will current.
pub struct DirectoryEventLoop {
    online: bool,
    client: DirectoryClient,
    eventloop: Box<DynEventLoop>,
    shutdown_rx: Receiver<Shutdown>,
}

impl DirectoryEventLoop {
    /// Creates a new instance along with an associated client.
    ///
    /// Passing no identity runs the directory in monitor only mode.
    pub fn new<E: EventLoop + Send + 'static, C: Client + Send + Sync + 'static>(
        identity: Option<Identity>,
        eventloop: E,
        client: C,
    ) -> (Self, DirectoryClient) {
        let (tx, rx) = mpsc::channel(1);
        let client = DirectoryClient {
            client: Arc::new(client),
            sender: tx,
            state: Arc::new(ClientState {
                identity,
                bd_seq: AtomicU64::new(0),
                seq: AtomicU8::new(0),
            }),
        };
        let mut directory = Self {
            online: false,
            client: client.clone(),
            eventloop: Box::new(eventloop),
            shutdown_rx: rx,
        };
        directory.update_last_will();
        (directory, client)
    }

    fn update_last_will(&mut self) {
        let state = &self.client.state;
        let Some(identity) = &state.identity else {
            return;
        };
        self.eventloop
            .set_last_will(LastWill::new_node(&identity.address, state.death_payload()));
    }

    fn handle_online(&mut self) -> Option<DirectoryEvent> {
        if self.online {
            return None;
        }
        info!("Directory online");
        self.online = true;
        let client = self.client.clone();
        task::spawn(async move {
            if client
                .client
                .subscribe(TopicFilter::namespace())
                .await
                .is_err()
            {
                warn!("Unable to subscribe to the Sparkplug namespace");
            }
            _ = client.publish_birth().await;
        });
        Some(DirectoryEvent::Online)
    }

    fn handle_offline(&mut self) -> Option<DirectoryEvent> {
        if !self.online {
            return None;
        }
        info!("Directory offline");
        self.online = false;
        // the old will has been delivered, the next session gets a new bdSeq
        self.client.state.bd_seq.fetch_add(1, Ordering::SeqCst);
        self.update_last_will();
        Some(DirectoryEvent::Offline)
    }

    fn handle_event(&mut self, event: Event) -> Option<DirectoryEvent> {
        match event {
            Event::Online => self.handle_online(),
            Event::Offline => self.handle_offline(),
            Event::Message(message) => Some(DirectoryEvent::Message(message)),
            Event::InvalidPublish { reason, topic, .. } => {
                warn!(
                    "Dropping publish on {}: {reason}",
                    String::from_utf8_lossy(&topic)
                );
                None
            }
        }
    }

    async fn poll_until_offline(&mut self) {
        while self.online {
            if Event::Offline == self.eventloop.poll().await {
                self.handle_offline();
            }
        }
    }

    async fn poll_until_offline_with_timeout(&mut self) {
        _ = timeout(Duration::from_secs(1), self.poll_until_offline()).await;
    }

    /// Progress the directory. Continuing to poll will reconnect if there is a disconnection.
    pub async fn poll(&mut self) -> DirectoryEvent {
        loop {
            select! {
                event = self.eventloop.poll() => {
                    if let Some(event) = self.handle_event(event) {
                        return event
                    }
                }
                Some(_) = self.shutdown_rx.recv() => {
                    self.poll_until_offline_with_timeout().await;
                    return DirectoryEvent::Cancelled
                },
            }
        }
    }
}
