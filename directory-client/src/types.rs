use std::string::FromUtf8Error;

use directory_types::{
    payload::Payload,
    topic::{Address, MessageType, QoS, Topic},
};
use prost::DecodeError;
use thiserror::Error;

/// Error types for inbound message processing.
///
/// Produced when a publish could not be turned into a [Message]: the topic was not valid
/// Sparkplug or the payload was not a valid protobuf payload.
#[derive(Error, Debug, PartialEq)]
pub enum MessageError {
    #[error("There was an error decoding the payload: {0}")]
    DecodePayloadError(DecodeError),
    #[error("The topic was invalid")]
    InvalidSparkplugTopic,
    #[error("Topic utf8 decode error: {0}")]
    TopicUtf8Error(FromUtf8Error),
}

impl From<FromUtf8Error> for MessageError {
    fn from(e: FromUtf8Error) -> Self {
        MessageError::TopicUtf8Error(e)
    }
}

impl From<DecodeError> for MessageError {
    fn from(e: DecodeError) -> Self {
        MessageError::DecodePayloadError(e)
    }
}

/// A decoded Sparkplug message and the topic it was received on
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: Topic,
    pub payload: Payload,
}

/// An enum that represents the different types of events an [EventLoop](crate::EventLoop) implementation can produce.
#[derive(Debug, PartialEq)]
pub enum Event {
    Offline,
    Online,
    Message(Message),
    InvalidPublish {
        reason: MessageError,
        topic: Vec<u8>,
        payload: Vec<u8>,
    },
}

/// Structure representing the last will of a Node
#[derive(Debug, Clone, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub retain: bool,
    pub qos: QoS,
    pub payload: Vec<u8>,
}

impl LastWill {
    /// A will publishing `payload` on the node's NDEATH topic
    pub fn new_node(address: &Address, payload: Payload) -> Self {
        let topic = address.parent_node().topic(MessageType::Death);
        let (qos, retain) = topic.publish_quality_retain();
        Self {
            retain,
            qos,
            payload: payload.into(),
            topic: topic.to_string(),
        }
    }
}
