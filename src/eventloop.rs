use crate::{
    config::Topic,
    mqtt,
    sofar::{
        client::{Transport, WriteError},
        command::WriteRequest,
        decode, registers, RunningState, Snapshot, StateReading,
    },
};
use paho_mqtt::AsyncClient;
use std::{future::Future, sync::Arc};
use tokio::{
    select,
    sync::{mpsc, Mutex},
    time::{self, Duration},
};
use tokio_util::sync::CancellationToken;

pub enum Message {
    MqttEvent(paho_mqtt::Message),
}

/// Reads one snapshot from the device.
///
/// Returns `None` when no session could be opened, nothing is published for
/// such a cycle. An absent status register counts as an unknown state.
pub async fn poll_cycle<T: Transport>(transport: &mut T) -> Option<Snapshot> {
    if !transport.open().await {
        return None;
    }

    let reading = match transport.read_block(registers::RUNNING_STATE).await.as_deref() {
        Some([raw]) => RunningState::interpret(*raw),
        _ => StateReading::unknown(),
    };

    log::info!(
        "state valid: {} - running state: {:?} - running state code: {}",
        reading.valid,
        reading.state,
        reading.code
    );

    let (operational, battery) = if reading.valid {
        let operational = transport.read_block(registers::OPERATIONAL).await;
        log::debug!("operational block: {operational:?}");

        let battery = transport.read_block(registers::BATTERY_CONFIG).await;
        log::debug!("battery configuration block: {battery:?}");

        (operational, battery)
    } else {
        (None, None)
    };

    transport.close().await;

    Some(decode::decode_snapshot(reading, operational.as_deref(), battery.as_deref()))
}

/// Issues a single work mode write inside its own session.
pub async fn execute_write<T: Transport>(transport: &mut T, request: WriteRequest) -> Result<u16, WriteError> {
    if !transport.open().await {
        return Err(WriteError::NotConnected);
    }

    let result = transport.write_work_mode(request).await;
    transport.close().await;
    result
}

/// Runs one poll cycle while holding the session, so no command write can
/// interleave with the reads.
pub async fn locked_poll_cycle<T: Transport>(session: &Mutex<T>) -> Option<Snapshot> {
    let mut transport = session.lock().await;
    poll_cycle(&mut *transport).await
}

pub fn poll_event_loop<T: Transport>(
    topic: Topic,
    polling_interval: Duration,
    session: Arc<Mutex<T>>,
    mqtt_client: AsyncClient,
    shutdown: CancellationToken,
) -> impl Future<Output = ()> {
    async move {
        loop {
            let snapshot = locked_poll_cycle(&session).await;

            match snapshot {
                Some(snapshot) => {
                    if let Err(e) = mqtt::publish_state(&mqtt_client, &topic, &snapshot).await {
                        log::error!("Unable to publish state: {e:#}");
                    }
                },
                None => log::warn!("Skipping cycle, inverter not reachable"),
            }

            select! {
                _ = shutdown.cancelled() => break,
                _ = time::sleep(polling_interval) => {},
            }
        }

        log::info!("Shutting down poll loop for {}", topic.0);
    }
}

pub fn command_event_loop<T: Transport>(
    session: Arc<Mutex<T>>,
    shutdown: CancellationToken,
) -> (mpsc::Sender<WriteRequest>, impl Future<Output = ()>) {
    let (tx, mut rx) = mpsc::channel::<WriteRequest>(16);

    let fut = async move {
        loop {
            let request = select! {
                _ = shutdown.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let result = {
                let mut transport = session.lock().await;
                execute_write(&mut *transport, request).await
            };

            match result {
                Ok(echo) => log::info!("Work mode write {request} acknowledged with {echo:#06x}"),
                Err(e) => log::warn!("Work mode write {request} failed: {e}"),
            }
        }

        log::info!("Shutting down command listener");
    };

    (tx, fut)
}

pub fn mqtt_message_event_loop(
    mqtt_stream: paho_mqtt::AsyncReceiver<Option<paho_mqtt::Message>>,
    tx: mpsc::Sender<Message>,
) -> impl Future<Output = ()> {
    async move {
        loop {
            let Ok(event) = mqtt_stream.recv().await else {
                break;
            };

            match event {
                Some(event) => {
                    if tx.send(Message::MqttEvent(event)).await.is_err() {
                        break;
                    }
                },
                None => log::warn!("Lost connection to MQTT broker"),
            }
        }

        log::info!("Shutting down MQTT client");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sofar::{registers::RegisterBlock, BatteryType};
    use std::collections::HashMap;

    #[derive(Default)]
    struct MockTransport {
        reachable: bool,
        blocks: HashMap<u16, Vec<u16>>,
        write_response: Option<Vec<u8>>,
        log: Vec<String>,
        open: bool,
    }

    impl MockTransport {
        fn reachable() -> Self {
            Self { reachable: true, ..Default::default() }
        }

        fn with_block(mut self, block: RegisterBlock, words: Vec<u16>) -> Self {
            self.blocks.insert(block.start, words);
            self
        }
    }

    impl Transport for MockTransport {
        async fn open(&mut self) -> bool {
            self.log.push("open".to_owned());
            self.open = self.reachable;
            self.reachable
        }

        async fn close(&mut self) {
            self.log.push("close".to_owned());
            self.open = false;
        }

        async fn read_block(&mut self, block: RegisterBlock) -> Option<Vec<u16>> {
            assert!(self.open, "read outside of a session");
            self.log.push(format!("read {:#06x}", block.start));
            tokio::task::yield_now().await;
            self.blocks.get(&block.start).cloned()
        }

        async fn write_work_mode(&mut self, request: WriteRequest) -> Result<u16, WriteError> {
            assert!(self.open, "write outside of a session");
            self.log.push(format!("write {request}"));
            match &self.write_response {
                Some(data) => crate::sofar::client::decode_work_mode_response(data),
                None => Err(WriteError::NotConnected),
            }
        }
    }

    fn battery_block() -> Vec<u16> {
        let mut block = vec![0u16; 13];
        block[0] = 80;
        block
    }

    #[tokio::test]
    async fn unreachable_device_yields_nothing() {
        let mut transport = MockTransport::default();

        assert_eq!(poll_cycle(&mut transport).await, None);
        assert_eq!(transport.log, ["open"]);
    }

    #[tokio::test]
    async fn valid_state_reads_both_blocks() {
        let mut operational = vec![0u16; 52];
        operational[10] = 55;

        let mut transport = MockTransport::reachable()
            .with_block(registers::RUNNING_STATE, vec![2])
            .with_block(registers::OPERATIONAL, operational)
            .with_block(registers::BATTERY_CONFIG, battery_block());

        let snapshot = poll_cycle(&mut transport).await.unwrap();

        assert_eq!(snapshot.state, RunningState::Normal);
        assert_eq!(snapshot.running_state, 2);
        assert_eq!(snapshot.operational.unwrap().battery_soc, 55);
        assert_eq!(snapshot.battery.unwrap().battery_type, BatteryType::Tele);
        assert_eq!(transport.log, ["open", "read 0x0200", "read 0x0206", "read 0x10b0", "close"]);
    }

    #[tokio::test]
    async fn invalid_state_stops_after_status() {
        let mut transport = MockTransport::reachable().with_block(registers::RUNNING_STATE, vec![8]);

        let snapshot = poll_cycle(&mut transport).await.unwrap();

        assert_eq!(snapshot, Snapshot::from_state(StateReading::unknown()));
        assert_eq!(transport.log, ["open", "read 0x0200", "close"]);
    }

    #[tokio::test]
    async fn absent_status_is_unknown() {
        let mut transport = MockTransport::reachable();

        let snapshot = poll_cycle(&mut transport).await.unwrap();

        assert_eq!(snapshot.state, RunningState::Unknown);
        assert_eq!(snapshot.running_state, 9);
        assert_eq!(transport.log, ["open", "read 0x0200", "close"]);
    }

    #[tokio::test]
    async fn short_read_omits_block() {
        let mut transport = MockTransport::reachable()
            .with_block(registers::RUNNING_STATE, vec![4])
            .with_block(registers::OPERATIONAL, vec![0u16; 51])
            .with_block(registers::BATTERY_CONFIG, battery_block());

        let snapshot = poll_cycle(&mut transport).await.unwrap();

        assert_eq!(snapshot.state, RunningState::Discharging);
        assert_eq!(snapshot.operational, None);
        assert!(snapshot.battery.is_some());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("grid_voltage").is_none());
        assert_eq!(json["battery_type"], "Tele");
    }

    #[tokio::test]
    async fn write_runs_in_its_own_session() {
        let mut transport = MockTransport { write_response: Some(vec![2, 0x0B, 0xB8]), ..MockTransport::reachable() };

        let echo = execute_write(&mut transport, WriteRequest { address: 0x0102, value: 3000 }).await;

        assert_eq!(echo.unwrap(), 3000);
        assert_eq!(transport.log, ["open", "write 0x0102 <- 0x0bb8", "close"]);
    }

    #[tokio::test]
    async fn write_protocol_error_is_reported() {
        let mut transport = MockTransport { write_response: Some(vec![3, 0x0B, 0xB8]), ..MockTransport::reachable() };

        let result = execute_write(&mut transport, WriteRequest { address: 0x0103, value: 0x5555 }).await;

        assert!(matches!(result, Err(WriteError::ByteCountMismatch { announced: 3, received: 2 })));
        assert_eq!(transport.log.last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn write_to_unreachable_device() {
        let mut transport = MockTransport::default();

        let result = execute_write(&mut transport, WriteRequest { address: 0x0100, value: 0x5555 }).await;

        assert!(matches!(result, Err(WriteError::NotConnected)));
        assert_eq!(transport.log, ["open"]);
    }

    /// Splits a transport log into sessions, each running from `open` to `close`.
    fn sessions(log: &[String]) -> Vec<Vec<&str>> {
        let mut sessions = Vec::new();
        let mut current: Option<Vec<&str>> = None;

        for entry in log {
            match entry.as_str() {
                "open" => {
                    assert!(current.is_none(), "session opened twice: {log:?}");
                    current = Some(Vec::new());
                },
                "close" => sessions.push(current.take().expect("close without open")),
                other => current.as_mut().expect("request outside of a session").push(other),
            }
        }

        assert!(current.is_none(), "session left open: {log:?}");
        sessions
    }

    #[tokio::test]
    async fn command_write_waits_for_poll_cycle() {
        let transport = MockTransport { write_response: Some(vec![2, 0x0B, 0xB8]), ..MockTransport::reachable() }
            .with_block(registers::RUNNING_STATE, vec![2])
            .with_block(registers::OPERATIONAL, vec![0u16; 52])
            .with_block(registers::BATTERY_CONFIG, battery_block());
        let session = Arc::new(Mutex::new(transport));
        let shutdown = CancellationToken::new();

        let (tx, commands) = command_event_loop(session.clone(), shutdown.clone());
        let commands = tokio::spawn(commands);

        let poll = tokio::spawn({
            let session = session.clone();
            async move { locked_poll_cycle(&session).await }
        });

        // Let the poll cycle take the session and park inside its first read.
        tokio::task::yield_now().await;
        assert!(session.try_lock().is_err());

        tx.send(WriteRequest { address: 0x0102, value: 3000 }).await.unwrap();
        drop(tx);

        let snapshot = poll.await.unwrap().unwrap();
        commands.await.unwrap();

        assert_eq!(snapshot.state, RunningState::Normal);

        let transport = session.lock().await;
        let sessions = sessions(&transport.log);

        assert_eq!(
            sessions,
            [
                vec!["read 0x0200", "read 0x0206", "read 0x10b0"],
                vec!["write 0x0102 <- 0x0bb8"],
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_command_loop_stops() {
        let session = Arc::new(Mutex::new(MockTransport::reachable()));
        let shutdown = CancellationToken::new();

        let (_tx, commands) = command_event_loop(session.clone(), shutdown.clone());
        shutdown.cancel();

        time::timeout(Duration::from_secs(1), commands)
            .await
            .expect("command loop kept running after cancellation");

        assert!(session.lock().await.log.is_empty());
    }
}
