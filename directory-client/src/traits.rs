use async_trait::async_trait;
use directory_types::{
    payload::Payload,
    topic::{Topic, TopicFilter},
};

use crate::{Event, LastWill};

#[async_trait]
pub trait Client {
    /// Disconnects the client.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the disconnection was successful
    /// - `Err(())` if the disconnection failed
    async fn disconnect(&self) -> Result<(), ()>;

    /// Publishes a Sparkplug payload on a topic.
    ///
    /// This method will yield to the async runtime until the message is accepted by the client.
    /// QoS and retain settings are taken from [Topic::publish_quality_retain].
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the message was successfully published
    /// - `Err(())` if the publication failed
    async fn publish(&self, topic: Topic, payload: Payload) -> Result<(), ()>;

    /// Attempts to publish a Sparkplug payload on a topic.
    ///
    /// Unlike `publish`, this method may return early if the client cannot process the message
    /// e.g the message queue is full.
    async fn try_publish(&self, topic: Topic, payload: Payload) -> Result<(), ()>;

    /// Subscribes to a single topic.
    ///
    /// This is a convenience method that calls `subscribe_many` with a single topic.
    async fn subscribe(&self, topic: TopicFilter) -> Result<(), ()> {
        self.subscribe_many(vec![topic]).await
    }

    /// Subscribes to multiple topics in a single operation.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if all subscriptions were successful
    /// - `Err(())` if any subscription failed
    async fn subscribe_many(&self, topics: Vec<TopicFilter>) -> Result<(), ()>;
}

pub type DynClient = dyn Client + Send + Sync;

#[async_trait]
pub trait EventLoop {
    /// Wait for the next event from the transport.
    async fn poll(&mut self) -> Event;

    /// Set the will to register with the broker on the next connection attempt.
    fn set_last_will(&mut self, will: LastWill);
}

pub type DynEventLoop = dyn EventLoop + Send;
