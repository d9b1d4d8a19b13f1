use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::constants::{BIRTH, CMD, DATA, DEATH, SPBV01};

const WILDCARD: &str = "+";

#[derive(Error, Debug, PartialEq)]
pub enum AddressError {
    #[error("address must have 2 or 3 components, got {0}")]
    ComponentCount(usize),
    #[error("address component must not be empty")]
    EmptyComponent,
}

/// The `(group, node, device?)` triple identifying a Sparkplug publisher.
///
/// An absent device identifies a Node. Construction normalises an empty device
/// string to `None`, so `g/n` and `g/n/` name the same Node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub group: String,
    pub node: String,
    pub device: Option<String>,
}

impl Address {
    pub fn new<S1: Into<String>, S2: Into<String>>(
        group: S1,
        node: S2,
        device: Option<String>,
    ) -> Self {
        Self {
            group: group.into(),
            node: node.into(),
            device: device.filter(|d| !d.is_empty()),
        }
    }

    /// Create a Node level address
    pub fn node<S1: Into<String>, S2: Into<String>>(group: S1, node: S2) -> Self {
        Self::new(group, node, None)
    }

    /// Create a Device level address
    pub fn device<S1: Into<String>, S2: Into<String>, S3: Into<String>>(
        group: S1,
        node: S2,
        device: S3,
    ) -> Self {
        Self::new(group, node, Some(device.into()))
    }

    pub fn is_device(&self) -> bool {
        self.device.is_some()
    }

    /// The device component as stored: empty for a Node address.
    pub fn device_id(&self) -> &str {
        self.device.as_deref().unwrap_or("")
    }

    /// The topic kind letter, `N` or `D`.
    pub fn kind(&self) -> char {
        if self.is_device() {
            'D'
        } else {
            'N'
        }
    }

    pub fn parent_node(&self) -> Address {
        Address::node(self.group.clone(), self.node.clone())
    }

    pub fn child_device<S: Into<String>>(&self, device: S) -> Address {
        Address::device(self.group.clone(), self.node.clone(), device)
    }

    /// True if this is a Device address belonging to the given Node.
    pub fn is_child_of(&self, node: &Address) -> bool {
        self.is_device() && !node.is_device() && self.parent_node() == *node
    }

    /// Match against a literal address, treating `+` in `self` as a wildcard.
    ///
    /// A wildcard matches any present component but never an absent device.
    pub fn matches(&self, other: &Address) -> bool {
        fn wild(pattern: Option<&str>, value: Option<&str>) -> bool {
            match (pattern, value) {
                (Some(WILDCARD), Some(_)) => true,
                (p, v) => p == v,
            }
        }
        wild(Some(&self.group), Some(&other.group))
            && wild(Some(&self.node), Some(&other.node))
            && wild(self.device.as_deref(), other.device.as_deref())
    }

    pub fn topic(&self, message_type: MessageType) -> Topic {
        Topic::new(self.clone(), message_type)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.device {
            Some(device) => write!(f, "{}/{}/{}", self.group, self.node, device),
            None => write!(f, "{}/{}", self.group, self.node),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [group, node] | [group, node, ""] => {
                if group.is_empty() || node.is_empty() {
                    return Err(AddressError::EmptyComponent);
                }
                Ok(Address::node(*group, *node))
            }
            [group, node, device] => {
                if group.is_empty() || node.is_empty() {
                    return Err(AddressError::EmptyComponent);
                }
                Ok(Address::device(*group, *node, *device))
            }
            parts => Err(AddressError::ComponentCount(parts.len())),
        }
    }
}

/// The Sparkplug message type carried in the topic, without the `N`/`D` kind prefix.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    Birth,
    Death,
    Data,
    Cmd,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Birth => BIRTH,
            MessageType::Death => DEATH,
            MessageType::Data => DATA,
            MessageType::Cmd => CMD,
            MessageType::Other(other) => other,
        }
    }
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        match value {
            BIRTH => MessageType::Birth,
            DEATH => MessageType::Death,
            DATA => MessageType::Data,
            CMD => MessageType::Cmd,
            other => MessageType::Other(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

/// A parsed Sparkplug topic: `spBv1.0/<group>/<N|D><type>/<node>[/<device>]`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topic {
    pub address: Address,
    pub message_type: MessageType,
}

impl Topic {
    pub fn new(address: Address, message_type: MessageType) -> Self {
        Self {
            address,
            message_type,
        }
    }

    /// Parse a topic string.
    ///
    /// Returns `None` for the wrong number of segments, the wrong prefix, or a
    /// kind letter that disagrees with whether a device segment is present.
    pub fn parse(topic: &str) -> Option<Self> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() != 4 && parts.len() != 5 {
            return None;
        }
        if parts[0] != SPBV01 {
            return None;
        }
        if parts[1..].iter().any(|part| part.is_empty()) {
            return None;
        }

        let address = Address::new(parts[1], parts[3], parts.get(4).map(|d| d.to_string()));

        let mut chars = parts[2].chars();
        let kind = chars.next()?;
        if kind != address.kind() {
            return None;
        }
        let message_type = MessageType::from(chars.as_str());
        Some(Self::new(address, message_type))
    }

    /// Get the [QoS] and retain settings that a message on this topic should be published with
    pub fn publish_quality_retain(&self) -> (QoS, bool) {
        match self.message_type {
            MessageType::Death => (QoS::AtLeastOnce, false),
            _ => (QoS::AtMostOnce, false),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.address;
        write!(
            f,
            "{}/{}/{}{}/{}",
            SPBV01,
            a.group,
            a.kind(),
            self.message_type.as_str(),
            a.node
        )?;
        if let Some(device) = &a.device {
            write!(f, "/{device}")?;
        }
        Ok(())
    }
}

impl From<Topic> for String {
    fn from(value: Topic) -> Self {
        value.to_string()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TopicFilter {
    pub topic: String,
    pub qos: QoS,
}

impl TopicFilter {
    pub fn new<S: Into<String>>(topic: S) -> Self {
        Self::new_with_qos(topic, QoS::AtMostOnce)
    }

    pub fn new_with_qos<S: Into<String>>(topic: S, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            qos,
        }
    }

    /// The whole Sparkplug namespace, `spBv1.0/#`
    pub fn namespace() -> Self {
        Self::new(format!("{SPBV01}/#"))
    }
}
