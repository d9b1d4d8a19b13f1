use std::{env, time::Duration};

use anyhow::{bail, Context, Result};
use directory_client_rumqtt::MqttOptions;
use directory_engine::{DirectoryConfig, Identity, RebirthConfig, SchemaConfig};
use directory_types::topic::Address;
use serde::Deserialize;
use uuid::Uuid;

const PREFIX: &str = "DIRECTORY_";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_pool_size: u32,
    pub mqtt: MqttConfig,
    pub directory: DirectoryConfig,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
}

impl MqttConfig {
    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username, password);
        }
        options
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    max_pool_size: u32,
    #[serde(default = "default_mqtt_host")]
    mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    mqtt_port: u16,
    #[serde(default = "default_client_id")]
    mqtt_client_id: String,
    #[serde(default)]
    mqtt_username: Option<String>,
    #[serde(default)]
    mqtt_password: Option<String>,
    #[serde(default)]
    device_uuid: Option<String>,
    #[serde(default)]
    sparkplug_address: Option<String>,
    #[serde(default)]
    service_url: Option<String>,
    #[serde(default)]
    silent: bool,
    #[serde(default)]
    link_schema: Option<String>,
    #[serde(default = "default_true")]
    rebirth_enabled: bool,
    #[serde(default)]
    rebirth_window_min_ms: Option<u64>,
    #[serde(default)]
    rebirth_window_max_ms: Option<u64>,
    #[serde(default)]
    rebirth_cooldown_secs: Option<u64>,
}

const fn default_pool_size() -> u32 {
    10
}

fn default_mqtt_host() -> String {
    "localhost".into()
}

const fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "sparkplug-directory".into()
}

const fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig = envy::prefixed(PREFIX)
            .from_env()
            .context("failed to parse DIRECTORY_* environment variables")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let database_url = raw
            .database_url
            .or_else(|| env::var("DATABASE_URL").ok())
            .context("DIRECTORY_DATABASE_URL or DATABASE_URL must be set")?;

        let credentials = match (raw.mqtt_username, raw.mqtt_password) {
            (Some(username), Some(password)) => Some((username, password)),
            (None, None) => None,
            _ => bail!("DIRECTORY_MQTT_USERNAME and DIRECTORY_MQTT_PASSWORD must be set together"),
        };

        let identity = match (raw.device_uuid, raw.sparkplug_address) {
            (Some(device), Some(address)) => {
                let device = Uuid::parse_str(&device).context("invalid DIRECTORY_DEVICE_UUID")?;
                let address: Address = address
                    .parse()
                    .context("invalid DIRECTORY_SPARKPLUG_ADDRESS")?;
                if address.is_device() {
                    bail!("DIRECTORY_SPARKPLUG_ADDRESS must be a Node address, got {address}");
                }
                Some(Identity {
                    address,
                    device,
                    service_url: raw.service_url,
                })
            }
            (None, None) => None,
            _ => bail!(
                "DIRECTORY_DEVICE_UUID and DIRECTORY_SPARKPLUG_ADDRESS must be set together"
            ),
        };

        let link = raw
            .link_schema
            .map(|schema| Uuid::parse_str(&schema))
            .transpose()
            .context("invalid DIRECTORY_LINK_SCHEMA")?;

        let defaults = RebirthConfig::default();
        let window_min = raw
            .rebirth_window_min_ms
            .map_or(defaults.window_min, Duration::from_millis);
        let window_max = raw
            .rebirth_window_max_ms
            .map_or(defaults.window_max, Duration::from_millis)
            .max(window_min);
        let rebirth = RebirthConfig {
            enabled: raw.rebirth_enabled,
            window_min,
            window_max,
            cooldown: raw
                .rebirth_cooldown_secs
                .map_or(defaults.cooldown, Duration::from_secs),
        };

        Ok(Self {
            database_url,
            max_pool_size: raw.max_pool_size.max(1),
            mqtt: MqttConfig {
                host: raw.mqtt_host,
                port: raw.mqtt_port,
                client_id: raw.mqtt_client_id,
                credentials,
            },
            directory: DirectoryConfig {
                identity,
                silent: raw.silent,
                schemas: SchemaConfig {
                    link,
                    ..Default::default()
                },
                rebirth,
            },
        })
    }
}
