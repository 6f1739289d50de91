mod config;
mod eventloop;
mod mqtt;
mod sofar;

use anyhow::{Context, Result};
use paho_mqtt::{AsyncClient, ConnectOptionsBuilder, CreateOptionsBuilder, PersistenceType, QOS_1};
use sofar::{client::SofarClient, command::CommandTranslator};
use std::{env, path::PathBuf, sync::Arc};
use tokio::{
    select,
    sync::{mpsc, Mutex},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

fn config_path() -> PathBuf {
    if let Some(path) = env::var_os("SOFAR2MQTT_CONFIG") {
        return path.into();
    }

    if cfg!(debug_assertions) {
        "./sofar2mqtt.yaml".into()
    } else {
        "/etc/sofar2mqtt.yaml".into()
    }
}

fn init_logging(config: &config::Config) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str()));

    if config.modbus.modbus_debug {
        builder
            .filter_module("tokio_modbus", log::LevelFilter::Trace)
            .filter_module("sofar2mqtt::sofar::client", log::LevelFilter::Trace);
    }

    builder.init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config_path = config_path();
    let config = config::Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration (config file {config_path:?})"))?;

    init_logging(&config);

    log::debug!(
        "Polling {:?}, publishing to {}:{} on {}",
        config.modbus,
        config.mqtt.host,
        config.mqtt.port,
        config.mqtt.topic.0
    );

    let translator = CommandTranslator::new(config.modbus.max_power);
    let session = Arc::new(Mutex::new(SofarClient::new(&config.modbus)));

    let mut mqtt_client = AsyncClient::new(
        CreateOptionsBuilder::new()
            .server_uri(format!(
                "tcp://{host}:{port}",
                host = config.mqtt.host,
                port = config.mqtt.port
            ))
            .client_id(&config.client_id)
            .persistence(PersistenceType::None)
            .finalize(),
    )
    .context("Failed to create MQTT client")?;

    let mqtt_stream = mqtt_client.get_stream(128);

    let subscription = mqtt::command_subscription(&config.mqtt.cmd_topic);
    let runtime = tokio::runtime::Handle::current();
    mqtt_client.set_connected_callback(move |client| {
        log::info!("Connected to MQTT broker, subscribing to {subscription}");
        let token = client.subscribe(&subscription, QOS_1);
        runtime.spawn(mqtt::confirm_subscription(token, subscription.clone()));
    });

    let mut connect_options = ConnectOptionsBuilder::new();
    connect_options
        .automatic_reconnect(Duration::from_secs(2u64.pow(3)), Duration::from_secs(2u64.pow(12)))
        .max_inflight(128)
        .will_message(mqtt::offline_message(&config.client_id));

    if !config.mqtt.username.is_empty() {
        connect_options
            .user_name(&config.mqtt.username)
            .password(&config.mqtt.password);
    }

    mqtt_client
        .connect(connect_options.finalize())
        .await
        .context("Failed to connect to MQTT broker")?;

    mqtt::announce_online(&config.client_id, &mqtt_client)
        .await
        .context("Failed to announce online status")?;

    let shutdown = CancellationToken::new();

    tokio::spawn(eventloop::poll_event_loop(
        config.mqtt.topic.clone(),
        Duration::from_secs(config.modbus.polling_interval),
        session.clone(),
        mqtt_client.clone(),
        shutdown.clone(),
    ));

    let (command_tx, command_fut) = eventloop::command_event_loop(session, shutdown.clone());
    tokio::spawn(command_fut);

    let (tx, mut rx) = mpsc::channel(1);
    tokio::spawn(eventloop::mqtt_message_event_loop(mqtt_stream, tx));

    loop {
        select! {
            _ = tokio::signal::ctrl_c() => {
                shutdown.cancel();
                let _ = mqtt::announce_offline(&config.client_id, &mqtt_client).await;
                break Ok(());
            },
            event = rx.recv() => match event {
                Some(eventloop::Message::MqttEvent(msg)) => {
                    let payload = match std::str::from_utf8(msg.payload()) {
                        Ok(payload) => payload,
                        Err(e) => {
                            log::warn!("MQTT payload error on '{}': {e}", msg.topic());
                            continue;
                        }
                    };

                    log::debug!("MQTT command incoming: topic '{}' payload '{}'", msg.topic(), payload);

                    let Some(name) = mqtt::command_name(&config.mqtt.cmd_topic, msg.topic()) else {
                        log::warn!("MQTT command error: unexpected topic {}", msg.topic());
                        continue;
                    };

                    let request = match translator.translate_message(name, payload) {
                        Ok(request) => request,
                        Err(e) => {
                            log::warn!("Rejected command '{name}': {e}");
                            continue;
                        },
                    };

                    log::debug!("Queueing work mode write {request} for command '{name}'");

                    if command_tx.send(request).await.is_err() {
                        log::error!("Command listener has stopped, dropping {request}");
                    }
                },
                None => {
                    shutdown.cancel();
                    break Err(anyhow::anyhow!("MQTT client stream closed"));
                },
            }
        }
    }
}
