//! rumqttc binding for the publish session.
//!
//! Builds client options from the broker URL, performs the initial connect,
//! and spawns the event-loop driver that turns broker events into session
//! callbacks.

use crate::discovery::DiscoveryPayload;
use crate::session::{
    PublishSession, Result, SessionError, SessionPhase, SessionTopics, Transport, TransportError,
    STATUS_OFFLINE,
};
use reqwest::Url;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    QoS,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const PLAIN_PORT: u16 = 1883;
const TLS_PORT: u16 = 8883;
const REQUEST_CHANNEL_CAPACITY: usize = 64;
pub const RECONNECT_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub url: Url,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl From<rumqttc::ClientError> for TransportError {
    fn from(err: rumqttc::ClientError) -> Self {
        TransportError(err.to_string())
    }
}

impl Transport for AsyncClient {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> std::result::Result<(), TransportError> {
        AsyncClient::publish(self, topic, QoS::AtLeastOnce, retain, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> std::result::Result<(), TransportError> {
        AsyncClient::subscribe(self, topic, QoS::AtLeastOnce).await?;
        Ok(())
    }

    async fn disconnect(&self) -> std::result::Result<(), TransportError> {
        AsyncClient::disconnect(self).await?;
        Ok(())
    }
}

/// Whether the URL scheme selects TLS. `None` for unsupported schemes.
pub fn scheme_uses_tls(scheme: &str) -> Option<bool> {
    match scheme {
        "mqtt" | "tcp" => Some(false),
        "mqtts" | "ssl" => Some(true),
        _ => None,
    }
}

/// Client options with the last will registered on `status_topic`.
pub fn mqtt_options(settings: &MqttSettings, status_topic: &str) -> Result<MqttOptions> {
    let url = &settings.url;
    let tls = scheme_uses_tls(url.scheme())
        .ok_or_else(|| SessionError::Connect(format!("unsupported scheme '{}'", url.scheme())))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| SessionError::Connect(format!("no host in '{}'", url)))?;
    let port = url.port().unwrap_or(if tls { TLS_PORT } else { PLAIN_PORT });

    let mut options = MqttOptions::new(settings.client_id.clone(), host, port);
    options.set_keep_alive(settings.keep_alive);
    options.set_last_will(LastWill::new(
        status_topic,
        STATUS_OFFLINE.as_bytes().to_vec(),
        QoS::AtLeastOnce,
        true,
    ));

    let username = settings
        .username
        .clone()
        .or_else(|| (!url.username().is_empty()).then(|| url.username().to_string()));
    if let Some(username) = username {
        let password = settings
            .password
            .clone()
            .or_else(|| url.password().map(str::to_string))
            .unwrap_or_default();
        options.set_credentials(username, password);
    }

    if tls {
        options.set_transport(rumqttc::Transport::tls_with_default_config());
    }

    Ok(options)
}

/// Connect to the broker and start driving the event loop.
///
/// Fails if the broker does not accept the connection within the configured
/// timeout. Later connection drops are handled by the driver, which redials.
pub async fn connect(
    settings: &MqttSettings,
    topics: SessionTopics,
    discovery: DiscoveryPayload,
) -> Result<(Arc<PublishSession<AsyncClient>>, JoinHandle<()>)> {
    let options = mqtt_options(settings, &topics.status)?;
    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
    let session = Arc::new(PublishSession::new(client, topics, discovery));
    session.mark_connecting();

    log::info!("[Mqtt] connecting to {}", redacted(&settings.url));
    tokio::time::timeout(settings.connect_timeout, wait_for_connack(&mut eventloop))
        .await
        .map_err(|_| {
            SessionError::Connect(format!(
                "no answer from broker within {:?}",
                settings.connect_timeout
            ))
        })??;

    let driver = tokio::spawn(drive_event_loop(eventloop, session.clone(), RECONNECT_WAIT));
    session.on_connection_up().await;
    Ok((session, driver))
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(SessionError::Connect(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(SessionError::Connect(e.to_string())),
        }
    }
}

/// Poll until the client disconnects, redialing after `reconnect_wait` on
/// errors. Session callbacks that publish run on their own tasks so the
/// request queue keeps draining.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    session: Arc<PublishSession<AsyncClient>>,
    reconnect_wait: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    log::info!("[Mqtt] reconnected");
                    let session = session.clone();
                    tokio::spawn(async move { session.on_connection_up().await });
                } else {
                    log::warn!("[Mqtt] broker refused reconnect: {:?}", ack.code);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.on_message(&publish.topic, &publish.payload).await {
                        log::error!("[Mqtt] replay failed: {}", e);
                    }
                });
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                log::warn!("[Mqtt] broker sent disconnect");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                log::info!("[Mqtt] disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if matches!(
                    session.phase(),
                    SessionPhase::Disconnecting | SessionPhase::Disconnected
                ) {
                    log::debug!("[Mqtt] event loop closed during shutdown: {}", e);
                    break;
                }
                log::warn!(
                    "[Mqtt] connection error: {}, retrying in {:?}",
                    e,
                    reconnect_wait
                );
                session.on_connection_lost();
                tokio::time::sleep(reconnect_wait).await;
            }
        }
    }
}

/// URL without credentials, for logging.
fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.to_string()
}
