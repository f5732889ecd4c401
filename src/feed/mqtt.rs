//! MQTT transport for the sensor feed.
//!
//! A background task polls the rumqttc event loop, which reconnects on the
//! next poll after a connection error. Every `ConnAck` re-runs the adapter's
//! subscription, so the topic survives broker restarts. A subscribe request
//! that could not be queued is retried after each later event.

use crate::config::BrokerConfig;
use crate::feed::adapter::{FeedAdapter, FeedError, OutboundMessage, Publisher, Subscriber};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Pause between polls after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long shutdown waits for the disconnect packet to go out.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 64;

/// Client half of the MQTT connection.
#[derive(Clone)]
pub struct MqttClient {
    client: AsyncClient,
}

impl Subscriber for MqttClient {
    fn subscribe(&self, topic: &str) -> Result<(), FeedError> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| FeedError::Subscribe(e.to_string()))
    }
}

impl Publisher for MqttClient {
    fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), FeedError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, message.into_payload())
            .map_err(|e| FeedError::Publish(e.to_string()))
    }
}

/// A running MQTT feed delivering into a [`FeedAdapter`].
pub struct MqttFeed {
    client: MqttClient,
    topic: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MqttFeed {
    /// Connect to the broker and start delivering messages to `adapter`.
    ///
    /// Returns immediately; the connection is made by the background task.
    pub fn start(config: &BrokerConfig, adapter: FeedAdapter) -> Self {
        let client_id = format!("{}-{}", config.client_id_prefix, Uuid::new_v4());
        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let client = MqttClient { client };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tracing::info!(
            "Connecting to MQTT broker {}:{} as {}",
            config.host,
            config.port,
            client_id
        );

        let task = tokio::spawn(drive(eventloop, client.clone(), adapter, shutdown_rx));

        Self {
            client,
            topic: config.topic.clone(),
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    /// Publish to the feed topic.
    pub fn publish(&self, message: impl Into<OutboundMessage>) -> Result<(), FeedError> {
        self.client.publish(&self.topic, message.into())
    }

    /// Client handle for publishing to other topics.
    pub fn client(&self) -> &MqttClient {
        &self.client
    }

    /// Disconnect from the broker and stop the event loop task.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::error!("MQTT task failed: {}", e);
        }
        tracing::info!("MQTT feed stopped");
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: MqttClient,
    adapter: FeedAdapter,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                disconnect(&mut eventloop, &client).await;
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        tracing::info!("Connected to MQTT broker");
                        adapter.on_connect(&client);
                    } else {
                        tracing::error!("MQTT broker refused connection: {:?}", ack.code);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    adapter.on_message(&publish.topic, &publish.payload);
                    adapter.retry_subscription(&client);
                }
                Ok(_) => {
                    adapter.retry_subscription(&client);
                }
                Err(e) => {
                    tracing::error!("MQTT connection error: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

async fn disconnect(eventloop: &mut EventLoop, client: &MqttClient) {
    if let Err(e) = client.client.try_disconnect() {
        tracing::warn!("{}", FeedError::Disconnect(e.to_string()));
        return;
    }

    let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if flushed.is_err() {
        tracing::warn!("Timed out waiting for MQTT disconnect");
    }
}
