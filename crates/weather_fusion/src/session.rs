//! Publish session: connection lifecycle, retained state and replay.
//!
//! The session owns the only shared mutable state in the bridge, the phase
//! and the last published payload. Both the scheduler and the transport's
//! event driver go through it.
//!
//! State sits behind a plain mutex that is never held across an await, so
//! the driver can always read the phase while a publish is blocked on a full
//! request queue. Data publishes are serialized by a separate async gate so
//! a replay can never land after a newer payload.

use crate::consensus::ConsensusPayload;
use crate::discovery::DiscoveryPayload;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const STATUS_ONLINE: &str = "online";
pub const STATUS_OFFLINE: &str = "offline";

// ── Errors ──────────────────────────────────────────────────────────

/// Failure reported by a [`Transport`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Publish to '{topic}' failed: {source}")]
    Publish {
        topic: String,
        #[source]
        source: TransportError,
    },
    #[error("Subscribe to '{topic}' failed: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: TransportError,
    },
    #[error("Disconnect failed: {0}")]
    Disconnect(#[source] TransportError),
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Connect error: {0}")]
    Connect(String),
    #[error("Shutdown errors: {}", JoinedErrors(.0))]
    Shutdown(Vec<SessionError>),
}

struct JoinedErrors<'a>(&'a [SessionError]);

impl fmt::Display for JoinedErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

// ── Transport seam ──────────────────────────────────────────────────

/// The operations the session needs from a message bus client.
///
/// Implemented for `rumqttc::AsyncClient` in [`crate::mqtt`]; tests use an
/// in-memory recorder.
pub trait Transport: Send + Sync + 'static {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> impl std::future::Future<Output = std::result::Result<(), TransportError>> + Send;

    fn subscribe(
        &self,
        topic: &str,
    ) -> impl std::future::Future<Output = std::result::Result<(), TransportError>> + Send;

    fn disconnect(
        &self,
    ) -> impl std::future::Future<Output = std::result::Result<(), TransportError>> + Send;
}

// ── State ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::Disconnected => "disconnected",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Connected => "connected",
            SessionPhase::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct SessionState {
    phase: SessionPhase,
    last_payload: Option<ConsensusPayload>,
    closing: bool,
}

/// Topic layout for one bridge instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTopics {
    pub data: String,
    pub status: String,
    pub discovery: String,
    /// Automation hub birth topic; `None` disables replay on hub restart.
    pub hub_status: Option<String>,
}

impl SessionTopics {
    pub fn new(base_topic: &str, discovery_prefix: &str, hub_status: Option<String>) -> Self {
        Self {
            data: base_topic.to_string(),
            status: format!("{}/status", base_topic),
            discovery: crate::discovery::discovery_topic(discovery_prefix, base_topic),
            hub_status: hub_status.filter(|t| !t.is_empty()),
        }
    }
}

pub struct PublishSession<T: Transport> {
    transport: T,
    topics: SessionTopics,
    discovery: DiscoveryPayload,
    state: Mutex<SessionState>,
    publish_gate: tokio::sync::Mutex<()>,
}

impl<T: Transport> PublishSession<T> {
    pub fn new(transport: T, topics: SessionTopics, discovery: DiscoveryPayload) -> Self {
        Self {
            transport,
            topics,
            discovery,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Disconnected,
                last_payload: None,
                closing: false,
            }),
            publish_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn topics(&self) -> &SessionTopics {
        &self.topics
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn phase(&self) -> SessionPhase {
        self.state().phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == SessionPhase::Connected
    }

    pub fn last_payload(&self) -> Option<ConsensusPayload> {
        self.state().last_payload.clone()
    }

    /// The transport has started dialing.
    pub fn mark_connecting(&self) {
        let mut state = self.state();
        if !state.closing {
            state.phase = SessionPhase::Connecting;
        }
    }

    /// Fired on the first connect and on every automatic reconnect.
    ///
    /// Announces availability, republishes discovery and subscribes to the
    /// hub status topic. Each step is attempted even if an earlier one fails.
    pub async fn on_connection_up(&self) {
        {
            let mut state = self.state();
            if state.closing {
                log::debug!("[Session] connection up during shutdown, ignoring");
                return;
            }
            state.phase = SessionPhase::Connected;
        }
        log::info!("[Session] connected");

        if let Err(e) = self.publish_status(STATUS_ONLINE).await {
            log::error!("[Session] {}", e);
        }

        match self.discovery.to_json() {
            Ok(bytes) => {
                if let Err(e) = self.publish_retained(&self.topics.discovery, bytes).await {
                    log::error!("[Session] {}", e);
                } else {
                    log::info!("[Session] discovery published to {}", self.topics.discovery);
                }
            }
            Err(e) => log::error!("[Session] failed to encode discovery: {}", e),
        }

        if let Some(topic) = &self.topics.hub_status {
            if let Err(source) = self.transport.subscribe(topic).await {
                log::error!(
                    "[Session] {}",
                    SessionError::Subscribe {
                        topic: topic.clone(),
                        source,
                    }
                );
            }
        }
    }

    /// The transport lost its connection and will redial.
    pub fn on_connection_lost(&self) {
        let mut state = self.state();
        if state.phase == SessionPhase::Connected {
            log::warn!("[Session] connection lost, waiting for reconnect");
            state.phase = SessionPhase::Connecting;
        }
    }

    /// Route an incoming message. Returns `true` if it triggered a replay.
    pub async fn on_message(&self, topic: &str, payload: &[u8]) -> Result<bool> {
        let is_hub_status = self.topics.hub_status.as_deref() == Some(topic);
        if !is_hub_status || payload.trim_ascii() != STATUS_ONLINE.as_bytes() {
            return Ok(false);
        }
        log::info!("[Session] hub came online, replaying last payload");
        self.replay_last().await
    }

    /// Cache `payload` as last-known-good and publish it retained.
    pub async fn publish_payload(&self, payload: ConsensusPayload) -> Result<()> {
        let bytes = payload.to_json()?;
        let _gate = self.publish_gate.lock().await;
        {
            let mut state = self.state();
            state.last_payload = Some(payload);
            if state.phase != SessionPhase::Connected {
                log::debug!(
                    "[Session] publishing while {}, transport will queue",
                    state.phase
                );
            }
        }
        self.publish_retained(&self.topics.data, bytes).await
    }

    /// Republish the cached payload without fetching. Returns `false` when
    /// nothing has been published yet.
    pub async fn replay_last(&self) -> Result<bool> {
        let _gate = self.publish_gate.lock().await;
        let Some(payload) = self.last_payload() else {
            log::debug!("[Session] nothing to replay");
            return Ok(false);
        };
        let bytes = payload.to_json()?;
        self.publish_retained(&self.topics.data, bytes).await?;
        Ok(true)
    }

    /// Announce offline, clear retained data, then disconnect.
    ///
    /// Every step runs regardless of earlier failures; failures are
    /// returned together.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state();
            state.closing = true;
            state.phase = SessionPhase::Disconnecting;
        }
        log::info!("[Session] shutting down");

        let mut errors = Vec::new();
        if let Err(e) = self.publish_status(STATUS_OFFLINE).await {
            errors.push(e);
        }
        {
            let _gate = self.publish_gate.lock().await;
            if let Err(e) = self.publish_retained(&self.topics.data, Vec::new()).await {
                errors.push(e);
            }
        }
        if let Err(e) = self.transport.disconnect().await {
            errors.push(SessionError::Disconnect(e));
        }

        self.state().phase = SessionPhase::Disconnected;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SessionError::Shutdown(errors))
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn publish_status(&self, status: &str) -> Result<()> {
        self.publish_retained(&self.topics.status, status.as_bytes().to_vec())
            .await
    }

    async fn publish_retained(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.transport
            .publish(topic, payload, true)
            .await
            .map_err(|source| SessionError::Publish {
                topic: topic.to_string(),
                source,
            })
    }
}

// ── Mock transport (tests and `test-util`) ──────────────────────────

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Publish {
            topic: String,
            payload: Vec<u8>,
            retain: bool,
        },
        Subscribe(String),
        Disconnect,
    }

    #[derive(Default)]
    pub struct RecordingTransport {
        pub calls: Mutex<Vec<Call>>,
        pub failing_topics: HashSet<String>,
        pub fail_disconnect: bool,
    }

    impl RecordingTransport {
        pub fn calls(&self) -> Vec<Call> {
            self.log().clone()
        }

        pub fn published_to(&self, topic: &str) -> Vec<Vec<u8>> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Publish { topic: t, payload, .. } if t == topic => Some(payload),
                    _ => None,
                })
                .collect()
        }

        fn log(&self) -> MutexGuard<'_, Vec<Call>> {
            self.calls.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl Transport for RecordingTransport {
        async fn publish(
            &self,
            topic: &str,
            payload: Vec<u8>,
            retain: bool,
        ) -> std::result::Result<(), TransportError> {
            self.log().push(Call::Publish {
                topic: topic.to_string(),
                payload,
                retain,
            });
            if self.failing_topics.contains(topic) {
                return Err(TransportError(format!("mock: {} rejected", topic)));
            }
            Ok(())
        }

        async fn subscribe(&self, topic: &str) -> std::result::Result<(), TransportError> {
            self.log().push(Call::Subscribe(topic.to_string()));
            Ok(())
        }

        async fn disconnect(&self) -> std::result::Result<(), TransportError> {
            self.log().push(Call::Disconnect);
            if self.fail_disconnect {
                return Err(TransportError("mock: disconnect failed".to_string()));
            }
            Ok(())
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
