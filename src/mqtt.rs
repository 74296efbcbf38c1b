//! `rumqttc`-backed [`MessagingClient`] (C9): the production transport a
//! deployed node publishes replies and outgoing remote calls over (see
//! DESIGN.md for why `rumqttc` was picked).

use std::time::Duration;

use log::{debug, warn};
use rumqttc::{Client, MqttOptions, QoS};

use crate::bridge::MessagingClient;
use crate::error::{Error, ErrorKind};

/// Wraps a synchronous `rumqttc::Client`. The paired `Connection` is
/// driven on its own background thread so `publish` here only ever
/// enqueues.
pub struct RumqttcClient {
    client: Client,
}

impl RumqttcClient {
    /// Connects to a broker at `host:port` under `client_id`, spawning the
    /// event-loop-polling thread that keeps the connection alive. Returns
    /// once the client handle exists; the network connection itself is
    /// established lazily by the polling thread.
    pub fn connect(client_id: &str, host: &str, port: u16) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut connection) = Client::new(options, 64);

        std::thread::spawn(move || {
            for notification in connection.iter() {
                match notification {
                    Ok(event) => debug!("mqtt event: {event:?}"),
                    Err(e) => {
                        warn!("mqtt connection error: {e}");
                        break;
                    }
                }
            }
        });

        Self { client }
    }
}

impl MessagingClient for RumqttcClient {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| Error::new(ErrorKind::Protocol, format!("mqtt publish failed: {e}")))
    }
}
