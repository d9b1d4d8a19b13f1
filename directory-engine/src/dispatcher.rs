use std::collections::{HashMap, HashSet};

use directory_client::Message;
use directory_types::{
    constants::NODE_CONTROL_REBIRTH,
    payload::Payload,
    topic::{Address, MessageType},
    utils::payload_timestamp,
};
use log::{debug, error, info, trace, warn};
use tokio::{
    select,
    sync::mpsc,
    task,
    time::{sleep, Instant},
};

use crate::{
    config::{DirectoryConfig, SchemaConfig},
    error::{Error, Result},
    eventloop::DirectoryClient,
    extract::{datetime, AlertIndex, Birth},
    model::Model,
    rebirth::RebirthDebouncer,
};

/// Handles inbound messages one at a time, in arrival order.
///
/// Owns the per address state (online set, alert indexes, rebirth debouncing), which is only
/// ever touched from the dispatcher's own task. A rebirth window runs on a timer and reports
/// back through a channel, so waiting never holds up the queue.
pub struct Dispatcher {
    model: Model,
    client: DirectoryClient,
    schemas: SchemaConfig,
    sends_rebirths: bool,
    online: HashSet<Address>,
    alerts: HashMap<Address, AlertIndex>,
    rebirth: RebirthDebouncer,
    rebirth_tx: mpsc::UnboundedSender<Address>,
    rebirth_rx: mpsc::UnboundedReceiver<Address>,
}

impl Dispatcher {
    pub fn new(config: &DirectoryConfig, model: Model, client: DirectoryClient) -> Self {
        let (rebirth_tx, rebirth_rx) = mpsc::unbounded_channel();
        Self {
            model,
            client,
            schemas: config.schemas.clone(),
            sends_rebirths: config.sends_rebirths(),
            online: HashSet::new(),
            alerts: HashMap::new(),
            rebirth: RebirthDebouncer::new(config.rebirth.clone()),
            rebirth_tx,
            rebirth_rx,
        }
    }

    /// Process the queue until every sender has been dropped.
    pub async fn run(mut self, mut queue: mpsc::UnboundedReceiver<Message>) {
        loop {
            select! {
                message = queue.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => break,
                },
                Some(address) = self.rebirth_rx.recv() => self.rebirth_due(address).await,
            }
        }
        debug!("Dispatcher stopped");
    }

    /// Handle one message. Failures are logged and do not affect later messages.
    pub async fn handle(&mut self, message: Message) {
        let topic = message.topic.clone();
        trace!("Handling {topic}");
        if let Err(e) = self.dispatch(message).await {
            error!("Error handling {topic}: {e}");
        }
    }

    async fn dispatch(&mut self, message: Message) -> Result<()> {
        let Message { topic, payload } = message;
        match topic.message_type {
            MessageType::Birth => self.on_birth(topic.address, &payload).await,
            MessageType::Death => self.on_death(topic.address, &payload).await,
            MessageType::Data => self.on_data(topic.address, &payload).await,
            MessageType::Cmd => self.on_command(&topic.address, &payload).await,
            MessageType::Other(kind) => {
                warn!("Unknown Sparkplug message type {kind} from {}", topic.address);
                Ok(())
            }
        }
    }

    async fn on_birth(&mut self, address: Address, payload: &Payload) -> Result<()> {
        info!("Registering BIRTH for {address}");
        self.online.insert(address.clone());

        let birth = Birth::from_payload(address.clone(), payload, &self.schemas);
        self.alerts
            .insert(address.clone(), AlertIndex::new(&birth.alerts));

        if let Some((device, session)) = self.model.birth(birth).await? {
            debug!("Opened session {session} for {device} at {address}");
        }
        debug!("Finished BIRTH for {address}");
        Ok(())
    }

    async fn on_death(&mut self, address: Address, payload: &Payload) -> Result<()> {
        info!("Registering DEATH for {address}");
        let time = datetime(payload_timestamp(payload));

        self.online.remove(&address);
        self.alerts.remove(&address);
        if !address.is_device() {
            // the node's devices died with it
            self.online.retain(|a| !a.is_child_of(&address));
            self.alerts.retain(|a, _| !a.is_child_of(&address));
        }

        self.model.death(&address, time).await?;
        debug!("Finished DEATH for {address}");
        Ok(())
    }

    async fn on_data(&mut self, address: Address, payload: &Payload) -> Result<()> {
        self.consider_rebirth(&address);

        let Some(index) = self.alerts.get(&address) else {
            return Ok(());
        };
        let updates = index.updates(payload);
        if updates.is_empty() {
            return Ok(());
        }
        let changed = self.model.update_alerts(&updates).await?;
        debug!("{changed} of {} alert updates from {address} changed state", updates.len());
        Ok(())
    }

    async fn on_command(&mut self, address: &Address, payload: &Payload) -> Result<()> {
        let Some(identity) = self.client.identity() else {
            return Ok(());
        };
        if *address != identity.address {
            return Ok(());
        }

        for metric in &payload.metrics {
            match metric.name.as_deref() {
                Some(NODE_CONTROL_REBIRTH) => {
                    info!("Rebirth requested");
                    self.client
                        .publish_birth()
                        .await
                        .map_err(|_| Error::Publish("BIRTH"))?;
                }
                other => info!("Ignoring unknown CMD {other:?}"),
            }
        }
        Ok(())
    }

    /// DATA from an address that has not been seen to BIRTH probably means its BIRTH was
    /// missed. Give it a chance to BIRTH by itself before asking.
    fn consider_rebirth(&mut self, address: &Address) {
        if !self.sends_rebirths {
            return;
        }
        let online = self.online.contains(address);
        let Some(window) = self.rebirth.begin(address, online, Instant::now()) else {
            return;
        };

        let tx = self.rebirth_tx.clone();
        let address = address.clone();
        task::spawn(async move {
            sleep(window).await;
            _ = tx.send(address);
        });
    }

    async fn rebirth_due(&mut self, address: Address) {
        // online is read again, a BIRTH may have arrived during the window
        let online = self.online.contains(&address);
        if !self.rebirth.complete(&address, online, Instant::now()) {
            debug!("{address} came online, no rebirth needed");
            return;
        }
        if self.client.publish_rebirth_request(&address).await.is_err() {
            error!("Unable to publish rebirth request for {address}");
        }
    }
}
