use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bridge_normalize::{NormalizeError, Normalized, Normalizer};
use bridge_protocol::{LegacyPacket, SeriesRecord, encode};
use domain::{DeviceRegistry, RawMessage, Statistic};

const RECEIVED_AT: i64 = 1_732_240_000;

fn registry() -> Arc<DeviceRegistry> {
    let mut names = HashMap::new();
    names.insert("110020FF0001".to_string(), "Rodos".to_string());
    let mut deny = HashSet::new();
    deny.insert("BADDEV000001".to_string());
    Arc::new(DeviceRegistry::new(names, deny))
}

fn normalizer() -> Normalizer {
    Normalizer::new("sensors/home", "legacy/report", "legacy/packet", registry())
}

fn message(topic: &str, payload: &[u8]) -> RawMessage {
    RawMessage {
        broker_id: "broker.lan:1883".to_string(),
        topic: topic.to_string(),
        payload: payload.to_vec(),
        received_at: RECEIVED_AT,
    }
}

fn expect_samples(result: Result<Normalized, NormalizeError>) -> Vec<domain::CanonicalSample> {
    match result.expect("normalize") {
        Normalized::Samples(samples) => samples,
        other => panic!("expected samples, got {:?}", other),
    }
}

#[test]
fn current_report_expands_to_three_samples_per_series() {
    let payload = br#"{
        "Temperature": {"min": 12.9, "max": 44.1, "avg": 22.9,
                        "min_ts": 1732233000, "max_ts": 1732233200},
        "Humidity": {"min": 45.0, "max": 75.0, "avg": 60.5,
                     "min_ts": 1732233010, "max_ts": 1732233110, "ts": 1732233400}
    }"#;
    let samples = expect_samples(
        normalizer().normalize(&message("sensors/home/BEDROOM_001/data", payload)),
    );
    assert_eq!(samples.len(), 6);
    assert!(samples.iter().all(|sample| sample.device_id == "BEDROOM_001"));
    assert!(samples.iter().all(|sample| sample.device_name.is_none()));

    let temperature: Vec<_> = samples
        .iter()
        .filter(|sample| sample.series == "Temperature")
        .collect();
    assert_eq!(temperature.len(), 3);
    assert_eq!(temperature[0].statistic, Statistic::Min);
    assert_eq!(temperature[0].value, 12.9);
    assert_eq!(temperature[0].timestamp, 1_732_233_000);
    assert_eq!(temperature[1].statistic, Statistic::Max);
    assert_eq!(temperature[1].timestamp, 1_732_233_200);
    // avg 无独立时间戳字段：未给 ts 时回落到接收时间
    assert_eq!(temperature[2].statistic, Statistic::Avg);
    assert_eq!(temperature[2].timestamp, RECEIVED_AT);

    let humidity_avg = samples
        .iter()
        .find(|sample| sample.series == "Humidity" && sample.statistic == Statistic::Avg)
        .expect("humidity avg");
    assert_eq!(humidity_avg.timestamp, 1_732_233_400);
}

#[test]
fn missing_min_ts_is_a_validation_error() {
    let payload = br#"{
        "Temperature": {"min": 12.9, "max": 44.1, "avg": 22.9, "max_ts": 1732233200}
    }"#;
    let err = normalizer()
        .normalize(&message("sensors/home/BEDROOM_001/data", payload))
        .expect_err("missing min_ts");
    assert_eq!(err.to_string(), "series Temperature: missing min_ts");
}

#[test]
fn negative_timestamp_is_rejected() {
    let payload = br#"{
        "Temperature": {"min": 1.0, "max": 2.0, "avg": 1.5,
                        "min_ts": -5, "max_ts": 1732233200}
    }"#;
    let err = normalizer()
        .normalize(&message("sensors/home/BEDROOM_001/data", payload))
        .expect_err("negative min_ts");
    assert!(err.to_string().contains("negative min_ts"));
}

#[test]
fn denied_device_produces_no_samples() {
    let payload = br#"{
        "Temperature": {"min": 1.0, "max": 2.0, "avg": 1.5,
                        "min_ts": 1, "max_ts": 2}
    }"#;
    let result = normalizer()
        .normalize(&message("sensors/home/BADDEV000001/data", payload))
        .expect("denied is not an error");
    assert!(matches!(
        result,
        Normalized::Denied { device_id } if device_id == "BADDEV000001"
    ));
}

#[test]
fn registry_name_wins_over_payload_name() {
    let payload = br#"{
        "sensor_name": "Garden Shed",
        "Temperature": {"min": 1.0, "max": 2.0, "avg": 1.5,
                        "min_ts": 1, "max_ts": 2}
    }"#;
    let samples = expect_samples(
        normalizer().normalize(&message("sensors/home/110020FF0001/data", payload)),
    );
    assert!(samples
        .iter()
        .all(|sample| sample.device_name.as_deref() == Some("RODOS")));
}

#[test]
fn payload_sensor_name_is_sanitized() {
    let payload = br#"{
        "sensor_name": "Bedroom Sensor",
        "Temperature": {"min": 1.0, "max": 2.0, "avg": 1.5,
                        "min_ts": 1, "max_ts": 2}
    }"#;
    let samples = expect_samples(
        normalizer().normalize(&message("sensors/home/BEDROOM_001/data", payload)),
    );
    assert!(samples
        .iter()
        .all(|sample| sample.device_name.as_deref() == Some("BEDROOM_SENSOR")));
}

#[test]
fn unit_field_is_ignored() {
    let payload = br#"{
        "Temperature": {"min": 1.0, "max": 2.0, "avg": 1.5,
                        "min_ts": 1, "max_ts": 2, "unit": "C"}
    }"#;
    let samples = expect_samples(
        normalizer().normalize(&message("sensors/home/BEDROOM_001/data", payload)),
    );
    assert_eq!(samples.len(), 3);
}

#[test]
fn malformed_json_is_invalid() {
    let err = normalizer()
        .normalize(&message("sensors/home/BEDROOM_001/data", b"{not json"))
        .expect_err("malformed json");
    assert!(matches!(err, NormalizeError::Json(_)));
}

#[test]
fn report_without_series_is_invalid() {
    let err = normalizer()
        .normalize(&message("sensors/home/BEDROOM_001/data", b"{}"))
        .expect_err("empty report");
    assert!(matches!(err, NormalizeError::EmptyReport));
}

#[test]
fn unknown_topic_is_unmatched() {
    let result = normalizer()
        .normalize(&message("sensors/home/BEDROOM_001/status", b"{}"))
        .expect("unmatched is not an error");
    assert!(matches!(result, Normalized::Unmatched));
}

#[test]
fn legacy_report_normalizes_single_series() {
    let payload = br#"{
        "uid": "48E729C88B0C", "serie": "Humidity",
        "f_min": 45.0, "i_min_ts": 1732233050,
        "f_max": 75.5, "i_max_ts": 1732233150,
        "f_avg": 60.25
    }"#;
    let samples = expect_samples(normalizer().normalize(&message("legacy/report", payload)));
    assert_eq!(samples.len(), 3);
    assert!(samples.iter().all(|sample| sample.device_id == "48E729C88B0C"));
    assert!(samples.iter().all(|sample| sample.series == "Humidity"));
    assert_eq!(samples[0].value, 45.0);
    assert_eq!(samples[0].timestamp, 1_732_233_050);
    assert_eq!(samples[1].value, 75.5);
    assert_eq!(samples[1].timestamp, 1_732_233_150);
    // 旧版负载未带 i_ts：avg 回落到接收时间
    assert_eq!(samples[2].value, 60.25);
    assert_eq!(samples[2].timestamp, RECEIVED_AT);
}

#[test]
fn legacy_report_missing_field_is_invalid() {
    let payload = br#"{"uid": "48E729C88B0C", "serie": "Humidity", "f_min": 45.0}"#;
    let err = normalizer()
        .normalize(&message("legacy/report", payload))
        .expect_err("missing fields");
    assert!(matches!(err, NormalizeError::Json(_)));
}

#[test]
fn legacy_packet_normalizes_both_series() {
    let packet = LegacyPacket {
        device_id: "110020FF0001".to_string(),
        temperature: SeriesRecord {
            min: -3.5,
            max: 12.25,
            avg: 4.75,
            min_ts: 1_732_233_000,
            max_ts: 1_732_233_200,
        },
        humidity: SeriesRecord {
            min: 45.0,
            max: 75.5,
            avg: 60.25,
            min_ts: 1_732_233_050,
            max_ts: 1_732_233_150,
        },
    };
    let samples =
        expect_samples(normalizer().normalize(&message("legacy/packet", &encode(&packet))));
    assert_eq!(samples.len(), 6);
    assert_eq!(samples[0].series, "Temperature");
    assert_eq!(samples[0].statistic, Statistic::Min);
    assert!((samples[0].value - (-3.5)).abs() < 1e-6);
    assert_eq!(samples[0].timestamp, 1_732_233_000);
    assert_eq!(samples[3].series, "Humidity");
    // 注册表显示名挂到两个序列的全部样本
    assert!(samples
        .iter()
        .all(|sample| sample.device_name.as_deref() == Some("RODOS")));
    // 报文不带 avg 时间戳
    assert_eq!(samples[2].statistic, Statistic::Avg);
    assert_eq!(samples[2].timestamp, RECEIVED_AT);
}

#[test]
fn truncated_packet_is_invalid() {
    let packet = LegacyPacket {
        device_id: "110020FF0001".to_string(),
        temperature: SeriesRecord {
            min: 0.0,
            max: 0.0,
            avg: 0.0,
            min_ts: 0,
            max_ts: 0,
        },
        humidity: SeriesRecord {
            min: 0.0,
            max: 0.0,
            avg: 0.0,
            min_ts: 0,
            max_ts: 0,
        },
    };
    let bytes = encode(&packet);
    let err = normalizer()
        .normalize(&message("legacy/packet", &bytes[..bytes.len() - 4]))
        .expect_err("truncated packet");
    assert!(matches!(err, NormalizeError::Packet(_)));
}

#[test]
fn denied_device_in_packet_is_dropped() {
    let packet = LegacyPacket {
        device_id: "BADDEV000001".to_string(),
        temperature: SeriesRecord {
            min: 1.0,
            max: 2.0,
            avg: 1.5,
            min_ts: 1,
            max_ts: 2,
        },
        humidity: SeriesRecord {
            min: 1.0,
            max: 2.0,
            avg: 1.5,
            min_ts: 1,
            max_ts: 2,
        },
    };
    let result = normalizer()
        .normalize(&message("legacy/packet", &encode(&packet)))
        .expect("denied is not an error");
    assert!(matches!(result, Normalized::Denied { .. }));
}
