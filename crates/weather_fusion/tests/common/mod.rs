//! Test helpers for pipeline and upstream integration tests

#![allow(dead_code)]

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use weather_fusion::discovery::{DeviceIdentity, DiscoveryPayload};
use weather_fusion::ingest::{self, StationSource};
use weather_fusion::{PublishSession, SessionTopics, StationReport};

pub use weather_fusion::session::mock::{Call, RecordingTransport};

pub const NOW_MS: i64 = 1_700_000_000_000;
pub const MAX_AGE: Duration = Duration::from_secs(600);
pub const BASE_TOPIC: &str = "weather";
pub const HUB_STATUS: &str = "homeassistant/status";

// ── Station fixtures ────────────────────────────────────────────────

/// An outdoor station observed one minute before `NOW_MS`.
pub fn station(name: &str, tempf: f64) -> Value {
    json!({
        "info": {"name": name, "slug": name, "indoor": false},
        "lastData": {
            "created_at": NOW_MS - 60_000,
            "tempf": tempf,
            "humidity": 50,
            "windgustmph": 5.0
        }
    })
}

pub fn indoor_station(name: &str, tempf: f64) -> Value {
    let mut s = station(name, tempf);
    s["info"]["indoor"] = json!(true);
    s
}

pub fn response_body(stations: &[Value]) -> String {
    json!({ "data": stations }).to_string()
}

/// Decodes and sanitizes a canned response body on every fetch.
pub struct FixtureSource {
    body: String,
    now_ms: i64,
    pub fetches: AtomicUsize,
}

impl FixtureSource {
    pub fn new(stations: &[Value]) -> Self {
        Self {
            body: response_body(stations),
            now_ms: NOW_MS,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl StationSource for FixtureSource {
    async fn fetch_reports(&self) -> ingest::Result<Vec<StationReport>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let records = ingest::decode_stations(self.body.as_bytes())?;
        ingest::sanitize(records, self.now_ms, MAX_AGE)
    }
}

// ── Session ─────────────────────────────────────────────────────────

pub fn test_session() -> PublishSession<RecordingTransport> {
    let topics = SessionTopics::new(BASE_TOPIC, "homeassistant", Some(HUB_STATUS.to_string()));
    let discovery = DiscoveryPayload::new(&DeviceIdentity {
        base_topic: BASE_TOPIC.to_string(),
        device_name: "Test Weather".to_string(),
        status_topic: topics.status.clone(),
        version: "test".to_string(),
    });
    PublishSession::new(RecordingTransport::default(), topics, discovery)
}

// ── Fake upstream ───────────────────────────────────────────────────

/// Serve `app` on an ephemeral local port.
pub async fn serve(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
