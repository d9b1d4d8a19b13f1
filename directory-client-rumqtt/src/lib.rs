//! Part of the Sparkplug directory.
//!
//! A [directory_client::Client] and [directory_client::EventLoop] implementation using [rumqttc] over MQTT v5.

mod client;
mod options;

pub use client::{Client, EventLoop};
pub use options::{ConnectionProperties, MqttOptions, Transport};
