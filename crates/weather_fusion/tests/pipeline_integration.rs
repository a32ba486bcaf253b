//! End-to-end pipeline tests: canned station data through to MQTT calls.

mod common;

use common::{Call, FixtureSource, BASE_TOPIC, HUB_STATUS, NOW_MS};
use serde_json::{json, Value};
use weather_fusion::scheduler::fusion_cycle;
use weather_fusion::SessionPhase;

fn published_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn indoor_station_does_not_influence_consensus() {
    let _ = env_logger::builder().is_test(true).try_init();

    let source = FixtureSource::new(&[
        common::station("north", 68.0),
        common::station("east", 70.0),
        common::station("south", 72.0),
        common::indoor_station("garage", 75.0),
    ]);
    let session = common::test_session();
    session.on_connection_up().await;

    let payload = fusion_cycle(&source, &session).await.unwrap();
    assert_eq!(payload.temperature, Some(70.0));
    assert_eq!(payload.humidity, Some(50));

    let data = session.transport().published_to(BASE_TOPIC);
    assert_eq!(data.len(), 1);
    let json = published_json(&data[0]);
    assert_eq!(json["temperature"], 70.0);
    // Derived per station before aggregation.
    assert!(json["dew_point"].is_number());
    assert!(json["feels_like"].is_number());
    // Nobody reported these.
    assert!(json.get("uv_index").is_none());
    assert!(json.get("last_rain").is_none());
}

#[tokio::test]
async fn stale_and_incomplete_stations_are_dropped() {
    let mut stale = common::station("stale", 10.0);
    stale["lastData"]["created_at"] = json!(NOW_MS - 3_600_000);
    let mut no_temp = common::station("no-temp", 20.0);
    no_temp["lastData"]["tempf"] = Value::Null;
    let mut no_time = common::station("no-time", 30.0);
    no_time["lastData"]
        .as_object_mut()
        .unwrap()
        .remove("created_at");
    let mut unknown_indoor = common::station("unknown", 40.0);
    unknown_indoor["info"]
        .as_object_mut()
        .unwrap()
        .remove("indoor");

    let source = FixtureSource::new(&[
        stale,
        no_temp,
        no_time,
        unknown_indoor,
        common::station("good", 61.0),
    ]);
    let session = common::test_session();

    let payload = fusion_cycle(&source, &session).await.unwrap();
    assert_eq!(payload.temperature, Some(61.0));
}

#[tokio::test]
async fn malformed_record_is_skipped() {
    let mut broken = common::station("broken", 99.0);
    broken["lastData"]["humidity"] = json!("very");

    let source = FixtureSource::new(&[broken, common::station("a", 50.0), common::station("b", 52.0)]);
    let session = common::test_session();

    let payload = fusion_cycle(&source, &session).await.unwrap();
    assert_eq!(payload.temperature, Some(51.0));
}

#[tokio::test]
async fn station_supplied_values_mix_with_derived_ones() {
    let mut supplied = common::station("supplied", 70.0);
    supplied["lastData"]["dewPoint"] = json!(10.0);

    let source = FixtureSource::new(&[
        supplied,
        common::station("a", 70.0),
        common::station("b", 70.0),
    ]);
    let session = common::test_session();

    let payload = fusion_cycle(&source, &session).await.unwrap();
    // Two derived values (~50.49) outvote the supplied 10.
    let dew_point = payload.dew_point.unwrap();
    assert!((dew_point - 50.49408304731333).abs() < 1e-6);
}

#[tokio::test]
async fn no_usable_stations_publishes_nothing() {
    let source = FixtureSource::new(&[common::indoor_station("garage", 75.0)]);
    let session = common::test_session();

    let err = fusion_cycle(&source, &session).await.unwrap_err();
    assert!(err.is_no_entries());
    assert!(session.transport().published_to(BASE_TOPIC).is_empty());
}

#[tokio::test]
async fn hub_restart_replays_without_fetching() {
    let source = FixtureSource::new(&[common::station("a", 68.0), common::station("b", 72.0)]);
    let session = common::test_session();
    session.on_connection_up().await;

    fusion_cycle(&source, &session).await.unwrap();
    assert_eq!(source.fetch_count(), 1);

    assert!(session.on_message(HUB_STATUS, b"online").await.unwrap());
    assert_eq!(source.fetch_count(), 1);

    let data = session.transport().published_to(BASE_TOPIC);
    assert_eq!(data.len(), 2);
    assert_eq!(data[0], data[1]);
    assert_eq!(published_json(&data[1])["temperature"], 70.0);
}

#[tokio::test]
async fn reconnect_announces_again_and_keeps_cache() {
    let source = FixtureSource::new(&[common::station("a", 65.0)]);
    let session = common::test_session();
    session.mark_connecting();
    session.on_connection_up().await;
    fusion_cycle(&source, &session).await.unwrap();

    session.on_connection_lost();
    assert_eq!(session.phase(), SessionPhase::Connecting);
    session.on_connection_up().await;
    assert!(session.is_connected());

    let status = session.transport().published_to("weather/status");
    assert_eq!(status, vec![b"online".to_vec(), b"online".to_vec()]);
    let subscribes = session
        .transport()
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Subscribe(t) if t == HUB_STATUS))
        .count();
    assert_eq!(subscribes, 2);
    assert_eq!(session.last_payload().unwrap().temperature, Some(65.0));
}

#[tokio::test]
async fn shutdown_goes_offline_and_clears_data() {
    let source = FixtureSource::new(&[common::station("a", 65.0)]);
    let session = common::test_session();
    session.on_connection_up().await;
    fusion_cycle(&source, &session).await.unwrap();

    session.shutdown().await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Disconnected);

    let calls = session.transport().calls();
    let n = calls.len();
    assert_eq!(
        &calls[n - 3..],
        &[
            Call::Publish {
                topic: "weather/status".to_string(),
                payload: b"offline".to_vec(),
                retain: true,
            },
            Call::Publish {
                topic: BASE_TOPIC.to_string(),
                payload: Vec::new(),
                retain: true,
            },
            Call::Disconnect,
        ]
    );
}
