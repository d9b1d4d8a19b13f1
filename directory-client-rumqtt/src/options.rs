use std::time::Duration;

use rumqttc::v5::{mqttbytes::v5::ConnectProperties, MqttOptions as RuMqttOptions};

pub struct ConnectionProperties {
    pub receive_maximum: Option<u16>,
    pub max_packet_size: Option<u32>,
}

pub enum Transport {
    Tcp,
}

/// Broker connection settings
pub struct MqttOptions {
    pub broker_addr: String,
    pub port: u16,
    pub client_id: String,
    pub transport: Transport,
    pub keep_alive: Duration,
    pub credentials: Option<(String, String)>,
    pub connect_properties: Option<ConnectionProperties>,
}

impl MqttOptions {
    pub fn new<S: Into<String>, S1: Into<String>>(client_id: S, addr: S1, port: u16) -> Self {
        Self {
            broker_addr: addr.into(),
            port,
            client_id: client_id.into(),
            transport: Transport::Tcp,
            keep_alive: Duration::from_secs(30),
            credentials: None,
            connect_properties: None,
        }
    }

    pub fn set_credentials<S: Into<String>, S1: Into<String>>(
        &mut self,
        username: S,
        password: S1,
    ) -> &mut Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

impl From<MqttOptions> for RuMqttOptions {
    fn from(value: MqttOptions) -> Self {
        let mut options = RuMqttOptions::new(value.client_id, value.broker_addr, value.port);
        options.set_keep_alive(value.keep_alive);
        if let Some((username, password)) = value.credentials {
            options.set_credentials(username, password);
        }
        if let Some(props) = value.connect_properties {
            let mut connect_properties = ConnectProperties::new();
            connect_properties.receive_maximum = props.receive_maximum;
            connect_properties.max_packet_size = props.max_packet_size;
            options.set_connect_properties(connect_properties);
        }
        match value.transport {
            Transport::Tcp => (),
        }
        options
    }
}
