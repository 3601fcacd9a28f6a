//! Redis pub/sub transport adapter
//!
//! Publishes go out over a multiplexed connection; subscriptions are owned
//! by a background driver task holding the dedicated pub/sub connection.
//! When that connection drops, the driver rebuilds it and re-subscribes
//! every channel in the callback table, so owners never see the reconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::RpcConfig;
use crate::domain::RpcError;
use crate::port::{MessageCallback, PubSubTransport};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

enum SubCommand {
    Subscribe {
        channel: String,
        ack: oneshot::Sender<Result<(), RpcError>>,
    },
    Unsubscribe {
        channel: String,
        ack: oneshot::Sender<Result<(), RpcError>>,
    },
}

/// Transport adapter over Redis pub/sub
pub struct RedisPubSub {
    publish_conn: redis::aio::MultiplexedConnection,
    commands: mpsc::Sender<SubCommand>,
    callbacks: Arc<DashMap<String, MessageCallback>>,
    driver: JoinHandle<()>,
}

impl RedisPubSub {
    /// Connect to the endpoint named by the configuration
    pub async fn connect(config: &RpcConfig) -> Result<Self, RpcError> {
        let url = format!("redis://{}/{}", config.connection_string, config.database);
        let client = redis::Client::open(url).map_err(connection_error)?;
        let publish_conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connection_error)?;

        let callbacks: Arc<DashMap<String, MessageCallback>> = Arc::new(DashMap::new());
        let (commands, command_rx) = mpsc::channel(16);
        let driver = tokio::spawn(drive_subscriptions(client, command_rx, callbacks.clone()));

        Ok(Self {
            publish_conn,
            commands,
            callbacks,
            driver,
        })
    }

    async fn send_command(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<(), RpcError>>) -> SubCommand,
    ) -> Result<(), RpcError> {
        let (ack, ack_rx) = oneshot::channel();
        self.commands
            .send(build(ack))
            .await
            .map_err(|_| RpcError::Connection("Pub/sub driver has shut down".to_string()))?;
        ack_rx
            .await
            .map_err(|_| RpcError::Connection("Pub/sub driver has shut down".to_string()))?
    }
}

#[async_trait]
impl PubSubTransport for RedisPubSub {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), RpcError> {
        let mut conn = self.publish_conn.clone();
        let receivers: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(connection_error)?;
        trace!(channel, receivers, "Published message");
        Ok(())
    }

    async fn subscribe(&self, channel: &str, callback: MessageCallback) -> Result<(), RpcError> {
        self.callbacks.insert(channel.to_string(), callback);
        let channel_name = channel.to_string();
        let result = self
            .send_command(|ack| SubCommand::Subscribe {
                channel: channel_name,
                ack,
            })
            .await;
        if result.is_err() {
            self.callbacks.remove(channel);
        }
        result
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), RpcError> {
        self.callbacks.remove(channel);
        let channel_name = channel.to_string();
        self.send_command(|ack| SubCommand::Unsubscribe {
            channel: channel_name,
            ack,
        })
        .await
    }
}

impl Drop for RedisPubSub {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Background task owning the pub/sub connection
async fn drive_subscriptions(
    client: redis::Client,
    mut commands: mpsc::Receiver<SubCommand>,
    callbacks: Arc<DashMap<String, MessageCallback>>,
) {
    loop {
        let pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                warn!(error = %e, "Failed to open pub/sub connection, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        let (mut sink, mut stream) = pubsub.split();

        // Restore subscriptions that predate this connection.
        let existing: Vec<String> = callbacks.iter().map(|e| e.key().clone()).collect();
        let mut restored = true;
        for channel in &existing {
            if let Err(e) = sink.subscribe(channel).await {
                warn!(channel, error = %e, "Failed to restore subscription, reconnecting");
                restored = false;
                break;
            }
        }
        if !restored {
            tokio::time::sleep(RECONNECT_DELAY).await;
            continue;
        }
        if !existing.is_empty() {
            debug!(count = existing.len(), "Restored subscriptions");
        }

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SubCommand::Subscribe { channel, ack }) => {
                        let result = sink.subscribe(&channel).await.map_err(connection_error);
                        if result.is_ok() {
                            debug!(channel, "Subscribed");
                        }
                        let _ = ack.send(result);
                    }
                    Some(SubCommand::Unsubscribe { channel, ack }) => {
                        let result = sink.unsubscribe(&channel).await.map_err(connection_error);
                        if result.is_ok() {
                            debug!(channel, "Unsubscribed");
                        }
                        let _ = ack.send(result);
                    }
                    // Adapter dropped; nothing left to drive.
                    None => return,
                },
                message = stream.next() => match message {
                    Some(message) => {
                        let channel = message.get_channel_name().to_string();
                        let callback = callbacks.get(&channel).map(|e| e.value().clone());
                        match callback {
                            Some(callback) => callback(&channel, message.get_payload_bytes()),
                            None => trace!(channel, "Message on channel without a callback"),
                        }
                    }
                    None => {
                        warn!("Pub/sub connection lost, reconnecting");
                        break;
                    }
                },
            }
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

fn connection_error(e: redis::RedisError) -> RpcError {
    RpcError::Connection(e.to_string())
}
