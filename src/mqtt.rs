use paho_mqtt::{AsyncClient, Message, Token, QOS_1 as QOS_AT_LEAST_ONCE};
use serde::Serialize;

use crate::config::Topic;

fn mqtt_avail_topic(client_id: &str) -> String {
    format!("{client_id}/bridge/state")
}

pub async fn announce_online(client_id: &str, client: &AsyncClient) -> anyhow::Result<()> {
    client
        .publish(Message::new_retained(
            mqtt_avail_topic(client_id),
            b"online".to_owned(),
            QOS_AT_LEAST_ONCE,
        ))
        .await?;
    Ok(())
}

pub fn offline_message(client_id: &str) -> Message {
    Message::new_retained(mqtt_avail_topic(client_id), "offline".to_owned(), QOS_AT_LEAST_ONCE)
}

pub async fn announce_offline(client_id: &str, client: &AsyncClient) -> anyhow::Result<()> {
    client.publish(offline_message(client_id)).await?;
    Ok(())
}

pub async fn publish_state(client: &AsyncClient, topic: &Topic, payload: &impl Serialize) -> anyhow::Result<()> {
    let payload = serde_json::to_string(payload)?;

    log::debug!("MQTT publish topic: '{}' payload: '{}'", topic.0, payload);

    client
        .publish(Message::new(topic.0.as_str(), payload, QOS_AT_LEAST_ONCE))
        .await?;

    Ok(())
}

pub fn command_subscription(cmd_topic: &Topic) -> String {
    format!("{}/#", cmd_topic.0)
}

/// Waits for the broker to confirm a subscription and logs a failure.
pub async fn confirm_subscription(token: Token, subscription: String) -> bool {
    match token.await {
        Ok(_) => {
            log::info!("Subscribed to {subscription}");
            true
        },
        Err(e) => {
            log::warn!("Subscribing to {subscription} failed, commands will not be received: {e}");
            false
        },
    }
}

/// Returns the command name of a message received below `cmd_topic`.
pub fn command_name<'a>(cmd_topic: &Topic, topic: &'a str) -> Option<&'a str> {
    topic.strip_prefix(cmd_topic.0.as_str())?.strip_prefix('/')
}
