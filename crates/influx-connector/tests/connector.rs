// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end tests over the in-process bus and the in-memory store.

use influx_connector::bus::{Message, Subscriber};
use influx_connector::line_protocol::FieldValue;
use influx_connector::{
    Connector, ConnectorConfig, ConnectorHandle, InfluxConfig, LocalBus, MemoryStore, Series,
    TopicConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn msg(value: Value) -> Message {
    value.as_object().cloned().unwrap()
}

fn dev_config() -> ConnectorConfig {
    let mut config = ConnectorConfig::new(InfluxConfig::new("http://localhost:8086", "datain"));
    config.connector.dev_mode = true;
    config.connector.pub_workers = 2;
    config.connector.sub_workers = 2;
    config.ingest.host = "127.0.0.1".to_string();
    config.ingest.port = 0;
    config.rules.tag_keys = vec!["sensor".into()];
    config.rules.ignore_keys = vec!["roi".into()];
    config.rules.blacklist_query = vec!["drop".into(), "delete".into()];
    config
}

async fn start(config: ConnectorConfig, bus: &LocalBus, store: Arc<MemoryStore>) -> ConnectorHandle {
    Connector::with_store(config, Arc::new(bus.clone()), store)
        .unwrap()
        .start()
        .await
        .unwrap()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_bus_message_written_as_point() {
    let bus = LocalBus::new();
    let store = Arc::new(MemoryStore::new());
    let mut config = dev_config();
    config.add_subscriber(TopicConfig::new("Camera/camera1", json!({})));
    let handle = start(config, &bus, store.clone()).await;

    bus.publish(
        "camera1",
        msg(json!({
            "sensor": "s1",
            "temp": 21.5,
            "pos": {"x": 1, "y": 2},
            "roi": {"w": 3},
            "nothing": null
        })),
    );

    eventually(|| store.points().len() == 1).await;
    handle.shutdown().await.unwrap();

    let points = store.points();
    let point = &points[0];
    assert_eq!(point.measurement, "camera1");
    assert_eq!(point.tags.get("sensor").map(String::as_str), Some("s1"));
    assert_eq!(point.fields.get("temp"), Some(&FieldValue::Float(21.5)));
    assert!(point.fields.contains_key("pos.x"));
    assert!(point.fields.contains_key("pos.y"));
    assert_eq!(
        point.fields.get("roi"),
        Some(&FieldValue::String(r#"{"w":3}"#.to_string()))
    );
    assert!(!point.fields.contains_key("nothing"));
}

#[tokio::test]
async fn test_fieldless_message_does_not_stop_topic() {
    let bus = LocalBus::new();
    let store = Arc::new(MemoryStore::new());
    let mut config = dev_config();
    config.connector.sub_workers = 1;
    config.add_subscriber(TopicConfig::new("Camera/camera1", json!({})));
    let handle = start(config, &bus, store.clone()).await;

    // tag only, no field to write
    bus.publish("camera1", msg(json!({"sensor": "s1"})));
    bus.publish("camera1", msg(json!({"v": 1})));

    eventually(|| store.points().len() == 1).await;
    let stats = handle.inbound_stats();
    handle.shutdown().await.unwrap();

    assert_eq!(stats[0].topic, "camera1");
    assert_eq!(stats[0].messages_routed, 1);
}

#[tokio::test]
async fn test_push_republished_on_measurement_topic() {
    let bus = LocalBus::new();
    let store = Arc::new(MemoryStore::new());
    let mut config = dev_config();
    config.add_publisher(TopicConfig::new("cpu", json!({})));
    config.add_publisher(TopicConfig::new("mem", json!({})));
    let handle = start(config, &bus, store).await;

    let cpu = bus.subscribe("cpu");
    let mem = bus.subscribe("mem");

    let addr = handle.ingest_addr().unwrap();
    let resp = reqwest::Client::new()
        .post(format!("http://{}/", addr))
        .body("cpu,host=a usage=0.5 1000\nmem,host=a used=10i 1000\ndisk,host=a free=1i 1000\n")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "Received a POST request\n");

    let got = tokio::time::timeout(Duration::from_secs(2), cpu.receive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.data["data"], "cpu,host=a usage=0.5 1000");

    let got = tokio::time::timeout(Duration::from_secs(2), mem.receive())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.data["data"], "mem,host=a used=10i 1000");

    eventually(|| handle.ingest_stats().is_some_and(|s| s.delivered == 3)).await;
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_query_round_trip() {
    let bus = LocalBus::new();
    let store = Arc::new(MemoryStore::new());
    store.set_response(
        "SELECT * FROM cpu",
        vec![Series {
            name: "cpu".into(),
            columns: vec!["time".into(), "usage".into()],
            values: vec![vec![json!(1), json!(0.5)]],
            ..Default::default()
        }],
    );
    let handle = start(dev_config(), &bus, store.clone()).await;

    let reply = bus
        .request("InfluxDBConnector", msg(json!({"command": "SELECT * FROM cpu"})))
        .await
        .unwrap();
    let series: Series = serde_json::from_str(reply["Data"].as_str().unwrap()).unwrap();
    assert_eq!(series.name, "cpu");

    let reply = bus
        .request("InfluxDBConnector", msg(json!({"command": "DROP DATABASE datain"})))
        .await
        .unwrap();
    assert_eq!(reply["Data"], "");
    assert_eq!(store.queries(), vec!["SELECT * FROM cpu".to_string()]);

    handle.shutdown().await.unwrap();
}
