use anyhow::{bail, Context};
use lazy_static::lazy_static;
use serde::{de::Error, Deserialize, Deserializer};
use std::{env, path::Path, str::FromStr};

lazy_static! {
    static ref TOPIC_REGEX: regex::Regex = regex::Regex::new(r"^[^#+\s]+$").unwrap();
}

const fn default_mqtt_port() -> u16 {
    1883
}
const fn default_modbus_port() -> u16 {
    8234
}
const fn default_polling_interval() -> u64 {
    5
}
const fn default_timeout() -> u64 {
    5
}
const fn default_slave_id() -> u8 {
    0x01
}
const fn default_max_power() -> u32 {
    3000
}
fn default_client_id() -> String {
    "sofar2mqtt".to_owned()
}
fn default_log_level() -> String {
    "info".to_owned()
}
fn default_mqtt_host() -> String {
    "sofar_mqtt".to_owned()
}
fn default_modbus_host() -> String {
    "localhost".to_owned()
}
fn default_state_topic() -> Topic {
    Topic("sofar2mqtt/state".to_owned())
}
fn default_cmd_topic() -> Topic {
    Topic("sofar2mqtt/cmd".to_owned())
}

/// A concrete MQTT topic, wildcards are not allowed.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Topic(pub String);

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if TOPIC_REGEX.is_match(s) {
            Ok(Topic(s.to_owned()))
        } else {
            Err(format!("invalid topic {s:?}, must be non-empty without '+', '#' or whitespace"))
        }
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D>(de: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(de)?.parse().map_err(Error::custom)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_client_id")]
    pub client_id: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub modbus: ModbusConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_state_topic")]
    pub topic: Topic,

    #[serde(default = "default_cmd_topic")]
    pub cmd_topic: Topic,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ModbusConfig {
    #[serde(default = "default_modbus_host")]
    pub host: String,

    #[serde(default = "default_modbus_port")]
    pub port: u16,

    /// Seconds slept between two poll cycles.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,

    #[serde(default)]
    pub modbus_debug: bool,

    #[serde(default = "default_slave_id")]
    pub sofar_slave_id: u8,

    /// Upper bound in watts for charge and discharge commands.
    #[serde(default = "default_max_power")]
    pub max_power: u32,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: String::new(),
            password: String::new(),
            topic: default_state_topic(),
            cmd_topic: default_cmd_topic(),
        }
    }
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            host: default_modbus_host(),
            port: default_modbus_port(),
            polling_interval: default_polling_interval(),
            modbus_debug: false,
            sofar_slave_id: default_slave_id(),
            max_power: default_max_power(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            log_level: default_log_level(),
            mqtt: MqttConfig::default(),
            modbus: ModbusConfig::default(),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let file = std::fs::File::open(path).with_context(|| format!("Failed to open config file {path:?}"))?;
            serde_yaml::from_reader(file).with_context(|| format!("Failed to parse config file {path:?}"))?
        } else {
            Self::from_env(|key| env::var(key).ok())?
        };

        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from environment variables, every variable
    /// is optional.
    pub fn from_env(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
        where
            T::Err: std::fmt::Display,
        {
            match var(key) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|e| anyhow::anyhow!("{e}"))
                    .with_context(|| format!("Invalid value {value:?} for {key}")),
                None => Ok(default),
            }
        }

        let defaults = Self::default();
        let string = |key: &str, default: String| var(key).unwrap_or(default);

        let modbus_debug = match var("MODBUS_DEBUG") {
            Some(value) => parse_bool(&value).with_context(|| format!("Invalid value {value:?} for MODBUS_DEBUG"))?,
            None => defaults.modbus.modbus_debug,
        };

        Ok(Self {
            client_id: defaults.client_id,
            log_level: string("SOFAR_LOG_LEVEL", defaults.log_level),
            mqtt: MqttConfig {
                host: string("MQTT_HOST", defaults.mqtt.host),
                port: parsed(&var, "MQTT_PORT", defaults.mqtt.port)?,
                username: string("MQTT_USERNAME", defaults.mqtt.username),
                password: string("MQTT_PASSWORD", defaults.mqtt.password),
                topic: parsed(&var, "MQTT_TOPIC", defaults.mqtt.topic)?,
                cmd_topic: parsed(&var, "MQTT_CMD_TOPIC", defaults.mqtt.cmd_topic)?,
            },
            modbus: ModbusConfig {
                host: string("MODBUS_HOST", defaults.modbus.host),
                port: parsed(&var, "MODBUS_PORT", defaults.modbus.port)?,
                polling_interval: parsed(&var, "MODBUS_POLLING_INTERVAL", defaults.modbus.polling_interval)?,
                modbus_debug,
                sofar_slave_id: parsed(&var, "SOFAR_SLAVE_ID", defaults.modbus.sofar_slave_id)?,
                max_power: parsed(&var, "MAX_POWER", defaults.modbus.max_power)?,
                timeout_secs: defaults.modbus.timeout_secs,
            },
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=u32::from(u16::MAX)).contains(&self.modbus.max_power) {
            bail!("max_power must be between 1 and 65535, got {}", self.modbus.max_power);
        }

        if self.mqtt.topic == self.mqtt.cmd_topic {
            bail!("state topic and command topic must differ");
        }

        if self.mqtt.topic.0.starts_with(&format!("{}/", self.mqtt.cmd_topic.0)) {
            bail!(
                "state topic {} must not be below the command topic {}",
                self.mqtt.topic.0,
                self.mqtt.cmd_topic.0
            );
        }

        Ok(())
    }
}
