//! MQTT subscriber with resubscribe-on-connect and backoff.
//!
//! rumqttc reconnects on the next `poll()` after an error, so this source only
//! paces those retries. The subscription is (re)issued on every ConnAck, which
//! covers both the first connect and every reconnect with a clean session.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode,
};
use tracing::{debug, info, warn};

use crate::config::defaults::{
    MQTT_RECONNECT_INITIAL_SECS, MQTT_RECONNECT_MAX_SECS, MQTT_REQUEST_CHANNEL_CAPACITY,
};
use crate::config::MqttConfig;
use crate::pipeline::source::{ReadingSource, SourceError, SourceEvent};

/// Map a numeric QoS level onto rumqttc's enum.
pub fn qos_from_level(level: u8) -> Result<QoS, SourceError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(SourceError::InvalidQos(other)),
    }
}

/// Operator-facing text for a broker refusal.
pub fn refusal_reason(code: ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "accepted",
        ConnectReturnCode::RefusedProtocolVersion => "incorrect protocol version",
        ConnectReturnCode::BadClientId => "invalid client identifier",
        ConnectReturnCode::ServiceUnavailable => "server unavailable",
        ConnectReturnCode::BadUserNamePassword => "bad username or password",
        ConnectReturnCode::NotAuthorized => "not authorised",
    }
}

/// Delay before the `attempt`-th consecutive retry (1-based).
fn backoff_delay(attempt: u32) -> Duration {
    let secs = MQTT_RECONNECT_INITIAL_SECS
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(MQTT_RECONNECT_MAX_SECS);
    Duration::from_secs(secs)
}

/// Subscribes to one topic and yields its publishes.
pub struct MqttSource {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
    qos: QoS,
    /// Consecutive failed polls (resets on ConnAck)
    failed_attempts: u32,
    connections: u64,
    messages: u64,
}

impl MqttSource {
    /// Build the client. No network I/O happens until the first poll.
    pub fn new(config: &MqttConfig, topic: impl Into<String>, client_id: &str) -> Result<Self, SourceError> {
        let qos = qos_from_level(config.qos)?;
        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, MQTT_REQUEST_CHANNEL_CAPACITY);
        let topic = topic.into();
        info!(
            host = %config.host,
            port = config.port,
            topic = %topic,
            client_id,
            "MQTT source configured"
        );

        Ok(Self {
            client,
            eventloop,
            topic,
            qos,
            failed_attempts: 0,
            connections: 0,
            messages: 0,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn messages_received(&self) -> u64 {
        self.messages
    }

    /// Returns whether the subscription was queued. A full request channel
    /// is not fatal; the next ConnAck tries again.
    fn on_connected(&mut self, code: ConnectReturnCode) -> bool {
        self.connections += 1;
        self.failed_attempts = 0;
        info!(
            result = refusal_reason(code),
            connections = self.connections,
            "Connected to MQTT broker"
        );
        match self.client.try_subscribe(self.topic.clone(), self.qos) {
            Ok(()) => {
                debug!(topic = %self.topic, qos = ?self.qos, "Subscription requested");
                true
            }
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Subscription request not queued");
                false
            }
        }
    }

    async fn back_off(&mut self, error: &ConnectionError) {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        let delay = backoff_delay(self.failed_attempts);
        match error {
            ConnectionError::ConnectionRefused(code) => warn!(
                reason = refusal_reason(*code),
                attempt = self.failed_attempts,
                delay_secs = delay.as_secs(),
                "Connection to MQTT broker refused"
            ),
            other => warn!(
                error = %other,
                attempt = self.failed_attempts,
                delay_secs = delay.as_secs(),
                "Lost connection with MQTT broker, reconnecting"
            ),
        }
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl ReadingSource for MqttSource {
    async fn next_event(&mut self) -> Result<SourceEvent, SourceError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    self.on_connected(ack.code);
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|c| matches!(c, SubscribeReasonCode::Failure))
                    {
                        warn!(topic = %self.topic, "Broker rejected subscription");
                    } else {
                        info!(topic = %self.topic, "Subscribed");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.messages += 1;
                    return Ok(SourceEvent::Message {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    info!("MQTT broker sent disconnect");
                }
                Ok(_) => {}
                Err(e) => self.back_off(&e).await,
            }
        }
    }

    fn source_name(&self) -> &str {
        "MQTT"
    }
}
