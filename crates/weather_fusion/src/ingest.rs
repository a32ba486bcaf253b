//! Station fetch, response validation and per-record sanitization.
//!
//! The upstream API answers `{"data": [ ... ]}`. The envelope is walked with
//! a serde visitor so a silent change of the response shape surfaces as an
//! error naming what was found instead of an empty cycle. Each array element
//! is decoded on its own: a station with bad field types is skipped, and a
//! body that breaks off mid-array keeps the stations read before the break.

use crate::geo::BoundingBox;
use crate::station::{StationRecord, StationReport};
use reqwest::{StatusCode, Url};
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::value::RawValue;
use std::fmt;
use std::future::Future;
use std::time::Duration;

// ── Errors ──────────────────────────────────────────────────────────

/// Errors from a single fetch-and-sanitize pass.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned an error: {status} {reason}")]
    Upstream { status: u16, reason: String },

    #[error("invalid response: got {got}, expected {expected}")]
    InvalidResponse { got: String, expected: String },

    #[error("malformed response body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("failed to decode station record {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("no entries passed sanitization")]
    NoEntries,
}

pub type Result<T> = std::result::Result<T, IngestError>;

// ── Source seam ─────────────────────────────────────────────────────

/// Anything that can produce one cycle's sanitized station reports.
///
/// The scheduler depends on this trait rather than on `StationClient`
/// so the pipeline can be driven from fixtures in tests.
pub trait StationSource: Send + Sync + 'static {
    fn fetch_reports(&self) -> impl Future<Output = Result<Vec<StationReport>>> + Send;
}

// ── Response decoding ───────────────────────────────────────────────

/// What the envelope held where something else was required.
#[derive(Debug)]
struct Mismatch {
    got: String,
    expected: &'static str,
}

fn reject<E: de::Error>(
    slot: &mut Option<Mismatch>,
    got: String,
    expected: &'static str,
) -> std::result::Result<(), E> {
    let err = E::custom(format!("got {}, expected {}", got, expected));
    *slot = Some(Mismatch { got, expected });
    Err(err)
}

/// Scalar arms shared by both visitors; each records what it saw.
macro_rules! reject_scalars {
    () => {
        fn visit_unit<E: de::Error>(self) -> std::result::Result<(), E> {
            self.reject("null".to_string())
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<(), E> {
            self.reject(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<(), E> {
            self.reject(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<(), E> {
            self.reject(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<(), E> {
            self.reject(v.to_string())
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<(), E> {
            self.reject(format!("{:?}", v))
        }
    };
}

/// The top-level object. Only its `data` entry is read.
struct Envelope<'a> {
    records: &'a mut Vec<StationRecord>,
    mismatch: &'a mut Option<Mismatch>,
}

impl Envelope<'_> {
    fn reject<E: de::Error>(self, got: String) -> std::result::Result<(), E> {
        reject(self.mismatch, got, "{")
    }
}

impl<'de> DeserializeSeed<'de> for Envelope<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for Envelope<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object holding a \"data\" array")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<(), A::Error> {
        match map.next_key::<String>()? {
            Some(key) if key == "data" => {
                map.next_value_seed(StationArray {
                    records: self.records,
                    mismatch: self.mismatch,
                })?;
                while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
                Ok(())
            }
            Some(key) => reject(self.mismatch, format!("{:?}", key), "\"data\""),
            None => reject(self.mismatch, "}".to_string(), "\"data\""),
        }
    }

    fn visit_seq<A: SeqAccess<'de>>(self, _seq: A) -> std::result::Result<(), A::Error> {
        self.reject("[".to_string())
    }

    reject_scalars!();
}

/// The `data` array. Elements are decoded one at a time into `records`.
struct StationArray<'a> {
    records: &'a mut Vec<StationRecord>,
    mismatch: &'a mut Option<Mismatch>,
}

impl StationArray<'_> {
    fn reject<E: de::Error>(self, got: String) -> std::result::Result<(), E> {
        reject(self.mismatch, got, "[")
    }
}

impl<'de> DeserializeSeed<'de> for StationArray<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for StationArray<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of stations")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<(), A::Error> {
        let mut index = 0;
        while let Some(raw) = seq.next_element::<Box<RawValue>>()? {
            match serde_json::from_str::<StationRecord>(raw.get()) {
                Ok(record) => self.records.push(record),
                Err(source) => {
                    let err = IngestError::Decode { index, source };
                    log::debug!("Skipping station: {}", err);
                }
            }
            index += 1;
        }
        Ok(())
    }

    fn visit_map<A: MapAccess<'de>>(self, _map: A) -> std::result::Result<(), A::Error> {
        self.reject("{".to_string())
    }

    reject_scalars!();
}

/// Decode the station array. Elements that fail to decode are logged and
/// dropped; the rest are returned in response order.
///
/// A syntax error after at least one station was read keeps those
/// stations. Before that it is `Malformed`.
pub fn decode_stations(body: &[u8]) -> Result<Vec<StationRecord>> {
    if body.trim_ascii().is_empty() {
        return Err(IngestError::InvalidResponse {
            got: "end of input".to_string(),
            expected: "{".to_string(),
        });
    }

    let mut records = Vec::new();
    let mut mismatch = None;
    let mut de = serde_json::Deserializer::from_slice(body);
    let outcome = Envelope {
        records: &mut records,
        mismatch: &mut mismatch,
    }
    .deserialize(&mut de)
    .and_then(|()| de.end());

    if let Some(Mismatch { got, expected }) = mismatch {
        return Err(IngestError::InvalidResponse {
            got,
            expected: expected.to_string(),
        });
    }
    match outcome {
        Ok(()) => Ok(records),
        Err(e) if !records.is_empty() => {
            log::warn!("Response broke off after {} stations: {}", records.len(), e);
            Ok(records)
        }
        Err(e) => Err(IngestError::Malformed(e)),
    }
}

// ── Sanitization ────────────────────────────────────────────────────

/// Keep outdoor stations with a temperature and a recent observation time.
///
/// `now_ms` is wall-clock epoch milliseconds. Returns `NoEntries` when
/// nothing survives, which callers treat as a skipped cycle.
pub fn sanitize(
    records: Vec<StationRecord>,
    now_ms: i64,
    max_reading_age: Duration,
) -> Result<Vec<StationReport>> {
    let max_age_ms = i64::try_from(max_reading_age.as_millis()).unwrap_or(i64::MAX);

    let mut reports = Vec::with_capacity(records.len());
    for record in records {
        if record.info.indoor != Some(false) {
            log::debug!("Skipping station {:?}: indoor or unknown", record.info.name);
            continue;
        }
        if record.last_data.tempf.is_none() {
            log::debug!("Skipping station {:?}: no temperature", record.info.name);
            continue;
        }
        let Some(observed_at_ms) = record.last_data.observed_at_ms() else {
            log::debug!("Skipping station {:?}: no timestamp", record.info.name);
            continue;
        };
        if now_ms.saturating_sub(observed_at_ms) > max_age_ms {
            log::debug!("Skipping station {:?}: reading too old", record.info.name);
            continue;
        }
        reports.push(StationReport::from_record(record, observed_at_ms));
    }

    if reports.is_empty() {
        return Err(IngestError::NoEntries);
    }
    Ok(reports)
}

// ── Client ──────────────────────────────────────────────────────────

/// Everything the HTTP client needs, resolved from configuration.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub request_url: Url,
    pub bbox: BoundingBox,
    pub limit: u32,
    pub max_reading_age: Duration,
    pub timeout: Duration,
    pub user_agent: String,
}

/// HTTP client for the public station network.
#[derive(Debug)]
pub struct StationClient {
    http: reqwest::Client,
    settings: FetchSettings,
}

impl StationClient {
    pub fn new(settings: FetchSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()?;
        Ok(Self { http, settings })
    }

    /// Request URL with the bounding box corners and result cap appended.
    pub fn build_url(&self) -> Url {
        let bbox = &self.settings.bbox;
        let mut url = self.settings.request_url.clone();
        url.query_pairs_mut()
            .append_pair("$publicBox[0][0]", &bbox.min.longitude.to_string())
            .append_pair("$publicBox[0][1]", &bbox.min.latitude.to_string())
            .append_pair("$publicBox[1][0]", &bbox.max.longitude.to_string())
            .append_pair("$publicBox[1][1]", &bbox.max.latitude.to_string())
            .append_pair("$limit", &self.settings.limit.to_string());
        url
    }

    /// Fetch, validate and sanitize one batch of station reports.
    pub async fn fetch(&self) -> Result<Vec<StationReport>> {
        let url = self.build_url();
        log::debug!("Fetching stations from {}", url);

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(IngestError::Upstream {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let body = response.bytes().await?;
        let records = decode_stations(&body)?;
        log::debug!("Decoded {} station records", records.len());

        sanitize(
            records,
            chrono::Utc::now().timestamp_millis(),
            self.settings.max_reading_age,
        )
    }
}

impl StationSource for StationClient {
    async fn fetch_reports(&self) -> Result<Vec<StationReport>> {
        self.fetch().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::{LastData, StationInfo};

    const NOW_MS: i64 = 1_700_000_000_000;
    const TEN_MINUTES: Duration = Duration::from_secs(600);

    fn outdoor(name: &str, tempf: Option<f64>, created_at: Option<i64>) -> StationRecord {
        StationRecord {
            info: StationInfo {
                name: name.to_string(),
                slug: String::new(),
                indoor: Some(false),
            },
            last_data: LastData {
                tempf,
                created_at,
                ..Default::default()
            },
        }
    }

    #[test]
    fn decode_accepts_expected_prefix() {
        let body = br#" { "data" : [ {"info": {"indoor": false}, "lastData": {"tempf": 70.5}} ] } "#;
        let records = decode_stations(body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].last_data.tempf, Some(70.5));
    }

    #[test]
    fn decode_empty_array() {
        let records = decode_stations(br#"{"data": []}"#).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn decode_skips_malformed_elements() {
        let body = br#"{"data": [
            {"lastData": {"tempf": 60.0}},
            {"lastData": {"tempf": "warm"}},
            7,
            {"lastData": {"tempf": 62.0}}
        ]}"#;
        let records = decode_stations(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].last_data.tempf, Some(62.0));
    }

    #[test]
    fn decode_keeps_stations_before_syntax_error() {
        let body = br#"{"data": [
            {"lastData": {"tempf": 60.0}},
            {"lastData": {"tempf": 61.0}},
            {"lastData": {"tempf": 6x}},
            {"lastData": {"tempf": 62.0}}
        ]}"#;
        let records = decode_stations(body).unwrap();
        let temps: Vec<Option<f64>> = records.iter().map(|r| r.last_data.tempf).collect();
        assert_eq!(temps, vec![Some(60.0), Some(61.0)]);
    }

    #[test]
    fn decode_ignores_entries_after_data() {
        let body = br#"{"data": [{"lastData": {"tempf": 60.0}}], "count": 1, "meta": {"page": 0}}"#;
        assert_eq!(decode_stations(body).unwrap().len(), 1);
    }

    #[test]
    fn decode_rejects_top_level_array() {
        match decode_stations(br#"[{"data": []}]"#) {
            Err(IngestError::InvalidResponse { got, expected }) => {
                assert_eq!(got, "[");
                assert_eq!(expected, "{");
            }
            other => panic!("expected InvalidResponse, got {:?}", other),
        }
    }

    #[test]
    fn decode_rejects_wrong_key() {
        match decode_stations(br#"{"error": "rate limited"}"#) {
            Err(IngestError::InvalidResponse { got, expected }) => {
                assert_eq!(got, "\"error\"");
                assert_eq!(expected, "\"data\"");
            }
            other => panic!("expected InvalidResponse, got {:?}", other),
        }
    }

    #[test]
    fn decode_rejects_non_array_data() {
        match decode_stations(br#"{"data": {"stations": []}}"#) {
            Err(IngestError::InvalidResponse { got, .. }) => assert_eq!(got, "{"),
            other => panic!("expected InvalidResponse, got {:?}", other),
        }
        match decode_stations(br#"{"data": null}"#) {
            Err(IngestError::InvalidResponse { got, .. }) => assert_eq!(got, "null"),
            other => panic!("expected InvalidResponse, got {:?}", other),
        }
    }

    #[test]
    fn decode_rejects_empty_body() {
        match decode_stations(b"   ") {
            Err(IngestError::InvalidResponse { got, .. }) => assert_eq!(got, "end of input"),
            other => panic!("expected InvalidResponse, got {:?}", other),
        }
        match decode_stations(b"{}") {
            Err(IngestError::InvalidResponse { got, expected }) => {
                assert_eq!(got, "}");
                assert_eq!(expected, "\"data\"");
            }
            other => panic!("expected InvalidResponse, got {:?}", other),
        }
    }

    #[test]
    fn decode_truncated_array_is_malformed() {
        assert!(matches!(
            decode_stations(br#"{"data": [{"lastData": {"#),
            Err(IngestError::Malformed(_))
        ));
    }

    #[test]
    fn sanitize_drops_indoor_stations() {
        let mut indoor = outdoor("living room", Some(75.0), Some(NOW_MS));
        indoor.info.indoor = Some(true);
        let mut unknown = outdoor("mystery", Some(71.0), Some(NOW_MS));
        unknown.info.indoor = None;
        let kept = outdoor("yard", Some(68.0), Some(NOW_MS));

        let reports = sanitize(vec![indoor, unknown, kept], NOW_MS, TEN_MINUTES).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "yard");
    }

    #[test]
    fn sanitize_drops_missing_temperature() {
        let records = vec![
            outdoor("a", None, Some(NOW_MS)),
            outdoor("b", Some(0.0), Some(NOW_MS)),
        ];
        let reports = sanitize(records, NOW_MS, TEN_MINUTES).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].temperature_f, Some(0.0));
    }

    #[test]
    fn sanitize_drops_stale_and_untimestamped() {
        let fresh = outdoor("fresh", Some(60.0), Some(NOW_MS - 60_000));
        let stale = outdoor("stale", Some(60.0), Some(NOW_MS - 601_000));
        let untimed = outdoor("untimed", Some(60.0), None);
        let mut fallback = outdoor("fallback", Some(60.0), None);
        fallback.last_data.dateutc = Some(NOW_MS - 1_000);

        let reports = sanitize(vec![fresh, stale, untimed, fallback], NOW_MS, TEN_MINUTES).unwrap();
        let names: Vec<&str> = reports.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["fresh", "fallback"]);
        assert_eq!(reports[1].observed_at_ms, NOW_MS - 1_000);
    }

    #[test]
    fn sanitize_keeps_reading_exactly_at_max_age() {
        let edge = outdoor("edge", Some(60.0), Some(NOW_MS - 600_000));
        assert_eq!(sanitize(vec![edge], NOW_MS, TEN_MINUTES).unwrap().len(), 1);
    }

    #[test]
    fn sanitize_empty_is_no_entries() {
        let mut indoor = outdoor("inside", Some(70.0), Some(NOW_MS));
        indoor.info.indoor = Some(true);
        assert!(matches!(
            sanitize(vec![indoor], NOW_MS, TEN_MINUTES),
            Err(IngestError::NoEntries)
        ));
        assert!(matches!(
            sanitize(Vec::new(), NOW_MS, TEN_MINUTES),
            Err(IngestError::NoEntries)
        ));
    }

    #[test]
    fn build_url_encodes_box_and_limit() {
        use crate::geo::Point;

        let client = StationClient::new(FetchSettings {
            request_url: Url::parse("https://stations.example.com/devices").unwrap(),
            bbox: BoundingBox {
                min: Point::new(40.5, -74.25),
                max: Point::new(40.75, -73.5),
            },
            limit: 100,
            max_reading_age: TEN_MINUTES,
            timeout: Duration::from_secs(5),
            user_agent: "test".to_string(),
        })
        .unwrap();

        let url = client.build_url();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("$publicBox[0][0]".to_string(), "-74.25".to_string()),
                ("$publicBox[0][1]".to_string(), "40.5".to_string()),
                ("$publicBox[1][0]".to_string(), "-73.5".to_string()),
                ("$publicBox[1][1]".to_string(), "40.75".to_string()),
                ("$limit".to_string(), "100".to_string()),
            ]
        );
        assert_eq!(url.path(), "/devices");
    }
}
