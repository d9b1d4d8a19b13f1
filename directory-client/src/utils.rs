use directory_types::{payload::Payload, topic::Topic};
use prost::Message as ProstMessage;

use crate::{Event, Message, MessageError};

fn decode(topic: &[u8], payload: &[u8]) -> Result<Message, MessageError> {
    let topic = String::from_utf8(topic.to_vec())?;
    let topic = Topic::parse(&topic).ok_or(MessageError::InvalidSparkplugTopic)?;
    let payload = Payload::decode(payload)?;
    Ok(Message { topic, payload })
}

/// Turn a raw publish into an [Event].
///
/// A publish that cannot be decoded becomes [Event::InvalidPublish] carrying the raw bytes.
pub fn topic_and_payload_to_event(topic: Vec<u8>, payload: Vec<u8>) -> Event {
    match decode(&topic, &payload) {
        Ok(message) => Event::Message(message),
        Err(reason) => Event::InvalidPublish {
            reason,
            topic,
            payload,
        },
    }
}

#[cfg(test)]
mod tests {
    use directory_types::{
        payload::{DataType, Metric},
        topic::{Address, MessageType},
    };

    use super::*;

    #[test]
    fn decodes_device_data() {
        let payload = Payload::new(5, vec![Metric::with_value("a", DataType::Boolean, true)]);
        let event = topic_and_payload_to_event(
            b"spBv1.0/G1/DDATA/N1/D1".to_vec(),
            payload.clone().into(),
        );
        assert_eq!(
            event,
            Event::Message(Message {
                topic: Topic::new(Address::device("G1", "N1", "D1"), MessageType::Data),
                payload,
            })
        );
    }

    #[test]
    fn bad_topic_is_invalid_publish() {
        let event = topic_and_payload_to_event(b"spBv1.0/G1/NDATA".to_vec(), vec![]);
        match event {
            Event::InvalidPublish { reason, .. } => {
                assert_eq!(reason, MessageError::InvalidSparkplugTopic)
            }
            event => panic!("got {event:?}"),
        }
    }

    #[test]
    fn bad_payload_is_invalid_publish() {
        let event = topic_and_payload_to_event(
            b"spBv1.0/G1/NBIRTH/N1".to_vec(),
            vec![0xff, 0xff, 0xff],
        );
        match event {
            Event::InvalidPublish { reason, .. } => {
                assert!(matches!(reason, MessageError::DecodePayloadError(_)))
            }
            event => panic!("got {event:?}"),
        }
    }
}
