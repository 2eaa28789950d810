//! MQTT broker sink.
//!
//! Readings are published with QoS 1 to `{base_topic}/{device_id}`. A
//! background task drives the rumqttc event loop, which reconnects on its
//! own after transport failures. `publish` returns when the broker's PUBACK
//! arrives, or fails after `ack_timeout`; the pipeline never retries.
//!
//! Ack matching: rumqttc assigns packet ids while draining its request
//! queue in FIFO order, so each `try_publish` pushes a waiter onto a queue
//! under the same lock, and the `Outgoing::Publish(pkid)` event pops the
//! front waiter and files it under that pkid. Re-sent publishes after a
//! reconnect reuse their pkid and are recognised as already in flight.

use super::{encode, PublishError, Publisher};
use async_trait::async_trait;
use edgelink_common::{device_topic, BrokerConfig, Reading};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the client -> event loop request queue
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Publishes accepted but not yet written to the socket.
///
/// While the broker is unreachable rumqttc moves queued requests into its own
/// pending list on every failed reconnect, so nothing else bounds this; past
/// the limit `publish` fails fast instead of growing both queues.
const MAX_UNSENT: usize = 1024;

/// Pause between reconnect attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

type Waiter = oneshot::Sender<()>;

struct AckState {
    queued: VecDeque<Waiter>,
    inflight: HashMap<u16, Waiter>,
    closed: bool,
}

/// Matches broker acknowledgments back to the publish calls waiting on them.
struct AckTracker {
    state: Mutex<AckState>,
    max_unsent: usize,
}

impl Default for AckTracker {
    fn default() -> Self {
        Self::with_limit(MAX_UNSENT)
    }
}

impl AckTracker {
    fn with_limit(max_unsent: usize) -> Self {
        Self {
            state: Mutex::new(AckState {
                queued: VecDeque::new(),
                inflight: HashMap::new(),
                closed: false,
            }),
            max_unsent,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AckState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a publish via `send` and register a waiter for its ack.
    ///
    /// `send` runs under the tracker lock so queue order and waiter order
    /// stay identical across concurrent callers.
    fn submit<F, E>(&self, send: F) -> Result<oneshot::Receiver<()>, PublishError>
    where
        F: FnOnce() -> Result<(), E>,
        E: Display,
    {
        let mut state = self.lock();
        if state.closed {
            return Err(PublishError::Closed);
        }
        if state.queued.len() >= self.max_unsent {
            return Err(PublishError::Transport(format!(
                "{} publishes waiting for the broker",
                state.queued.len()
            )));
        }
        send().map_err(|e| PublishError::Transport(e.to_string()))?;
        let (tx, rx) = oneshot::channel();
        state.queued.push_back(tx);
        Ok(rx)
    }

    /// A publish with `pkid` was written to the socket.
    fn sent(&self, pkid: u16) {
        let mut state = self.lock();
        if state.inflight.contains_key(&pkid) {
            return;
        }
        if let Some(waiter) = state.queued.pop_front() {
            state.inflight.insert(pkid, waiter);
        }
    }

    /// The broker acknowledged `pkid`.
    fn acknowledged(&self, pkid: u16) {
        if let Some(waiter) = self.lock().inflight.remove(&pkid) {
            // The caller may have timed out already
            let _ = waiter.send(());
        }
    }

    /// Refuse new publishes and release every waiter as closed.
    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.queued.clear();
        state.inflight.clear();
    }

    #[cfg(test)]
    fn pending(&self) -> (usize, usize) {
        let state = self.lock();
        (state.queued.len(), state.inflight.len())
    }
}

pub struct MqttPublisher {
    client: AsyncClient,
    base_topic: String,
    ack_timeout: Duration,
    disconnect_timeout: Duration,
    acks: Arc<AckTracker>,
    connection: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl MqttPublisher {
    /// Create the client and spawn its connection task.
    ///
    /// Does not wait for the broker: the first connect happens in the
    /// background and publishes queue up until it succeeds.
    pub fn start(broker: &BrokerConfig) -> Result<Self, PublishError> {
        let (host, port) = broker
            .endpoint()
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let mut options = MqttOptions::new(broker.client_id.clone(), host.clone(), port);
        options.set_keep_alive(broker.keep_alive);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        let acks = Arc::new(AckTracker::default());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(drive_connection(
            eventloop,
            Arc::clone(&acks),
            shutdown.clone(),
        ));
        info!(host = %host, port, client_id = %broker.client_id, "MQTT publisher started");

        Ok(Self {
            client,
            base_topic: broker.base_topic.clone(),
            ack_timeout: broker.ack_timeout,
            disconnect_timeout: broker.disconnect_timeout,
            acks,
            connection: Mutex::new(Some(handle)),
            shutdown,
        })
    }

    pub fn topic_for(&self, device_id: &str) -> String {
        device_topic(&self.base_topic, device_id)
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, reading: &Reading) -> Result<(), PublishError> {
        let payload = encode(reading)?;
        let topic = self.topic_for(&reading.device_id);

        let ack = self.acks.submit(move || {
            self.client
                .try_publish(topic, QoS::AtLeastOnce, false, payload)
        })?;

        match tokio::time::timeout(self.ack_timeout, ack).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(PublishError::Closed),
            Err(_) => Err(PublishError::AckTimeout(self.ack_timeout)),
        }
    }

    async fn close(&self) -> Result<(), PublishError> {
        let handle = self
            .connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut handle) = handle else {
            return Ok(());
        };

        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "MQTT disconnect request not queued");
        }

        let result = match tokio::time::timeout(self.disconnect_timeout, &mut handle).await {
            Ok(_) => {
                info!("MQTT publisher disconnected");
                Ok(())
            }
            Err(_) => {
                handle.abort();
                Err(PublishError::Transport(format!(
                    "disconnect did not complete within {:?}",
                    self.disconnect_timeout
                )))
            }
        };

        self.shutdown.cancel();
        self.acks.close();
        result
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll the rumqttc event loop until shutdown or a completed disconnect.
async fn drive_connection(
    mut eventloop: EventLoop,
    acks: Arc<AckTracker>,
    shutdown: CancellationToken,
) {
    let mut connected = false;
    let mut failures: u64 = 0;

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected = true;
                failures = 0;
                info!("connected to MQTT broker");
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => acks.acknowledged(ack.pkid),
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => acks.sent(pkid),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                failures += 1;
                if connected || failures == 1 {
                    warn!(error = %e, "MQTT connection lost, reconnecting");
                } else {
                    debug!(error = %e, failures, "MQTT reconnect attempt failed");
                }
                connected = false;

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }

    acks.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_ack_matches_pkid_in_queue_order() {
        let tracker = AckTracker::default();
        let mut first = tracker.submit(|| Ok::<(), String>(())).unwrap();
        let mut second = tracker.submit(|| Ok::<(), String>(())).unwrap();

        tracker.sent(1);
        tracker.sent(2);
        assert_eq!(tracker.pending(), (0, 2));

        tracker.acknowledged(2);
        assert!(second.try_recv().is_ok());
        assert!(first.try_recv().is_err());

        tracker.acknowledged(1);
        assert!(first.try_recv().is_ok());
        assert_eq!(tracker.pending(), (0, 0));
    }

    #[test]
    fn test_resent_publish_does_not_consume_waiter() {
        let tracker = AckTracker::default();
        let _first = tracker.submit(|| Ok::<(), String>(())).unwrap();
        let _second = tracker.submit(|| Ok::<(), String>(())).unwrap();

        tracker.sent(7);
        tracker.sent(7);
        assert_eq!(tracker.pending(), (1, 1));
    }

    #[test]
    fn test_failed_enqueue_registers_nothing() {
        let tracker = AckTracker::default();
        let err = tracker.submit(|| Err("request queue full")).unwrap_err();
        assert!(matches!(err, PublishError::Transport(msg) if msg == "request queue full"));
        assert_eq!(tracker.pending(), (0, 0));
    }

    #[test]
    fn test_unsent_backlog_is_bounded() {
        let tracker = AckTracker::with_limit(2);
        let _a = tracker.submit(|| Ok::<(), String>(())).unwrap();
        let _b = tracker.submit(|| Ok::<(), String>(())).unwrap();

        let mut enqueued = false;
        let err = tracker
            .submit(|| {
                enqueued = true;
                Ok::<(), String>(())
            })
            .unwrap_err();
        assert!(matches!(err, PublishError::Transport(_)));
        assert!(!enqueued, "nothing may reach the client past the limit");
        assert_eq!(tracker.pending(), (2, 0));

        // Room again once one of them is on the wire
        tracker.sent(1);
        assert!(tracker.submit(|| Ok::<(), String>(())).is_ok());
        assert_eq!(tracker.pending(), (2, 1));
    }

    #[test]
    fn test_close_releases_waiters() {
        let tracker = AckTracker::default();
        let mut rx = tracker.submit(|| Ok::<(), String>(())).unwrap();
        tracker.close();
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(matches!(
            tracker.submit(|| Ok::<(), String>(())),
            Err(PublishError::Closed)
        ));
    }

    fn unreachable_broker() -> BrokerConfig {
        BrokerConfig {
            mqtt_url: "tcp://127.0.0.1:1".to_string(),
            base_topic: "plant".to_string(),
            ack_timeout: Duration::from_millis(200),
            disconnect_timeout: Duration::from_millis(100),
            ..BrokerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_publish_without_broker_times_out() {
        let publisher = MqttPublisher::start(&unreachable_broker()).unwrap();
        assert_eq!(publisher.topic_for("press-1"), "plant/press-1");

        let reading = Reading::new("press-1", BTreeMap::new());
        let started = std::time::Instant::now();
        let err = publisher.publish(&reading).await.unwrap_err();
        assert!(matches!(err, PublishError::AckTimeout(_)), "{err}");
        assert!(started.elapsed() < Duration::from_secs(2));

        let started = std::time::Instant::now();
        let _ = publisher.close().await;
        assert!(started.elapsed() < Duration::from_secs(1));

        let err = publisher.publish(&reading).await.unwrap_err();
        assert!(matches!(err, PublishError::Closed));
        assert!(publisher.close().await.is_ok());
    }
}
