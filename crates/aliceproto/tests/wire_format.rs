//! Exact JSON shapes exchanged with displays and sensor daemons.

use aliceproto::{decode, encode, ProtoError, SensorMessage, ServerMessage, UiMessage};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn as_json<T: serde::Serialize>(msg: &T) -> Value {
    serde_json::from_str(&encode(msg).unwrap()).unwrap()
}

#[test]
fn ui_register_decodes_with_connectors() {
    let frame = json!({
        "method": "register",
        "data": {
            "name": "hall mirror",
            "id": "mirror-1",
            "settings": {"location": {"city": "Ottawa", "units": "metric"}, "dimafter": 45},
            "sources": [{"type": "weather", "filter": "geo"}],
            "sensors": [{"type": "motion", "id": "pir-1"}]
        }
    })
    .to_string();

    let UiMessage::Register(reg) = decode::<UiMessage>(&frame).unwrap() else {
        panic!("expected register");
    };
    assert_eq!(reg.name, "hall mirror");
    assert_eq!(reg.missing_identity(), None);

    let data = reg.data_connectors();
    assert_eq!(data[0].as_ref().unwrap().source_type, "weather");
    let sensors = reg.sensor_connectors();
    assert_eq!(sensors[0].as_ref().unwrap().id, "pir-1");
}

#[test]
fn ui_bare_methods_decode() {
    assert_eq!(decode::<UiMessage>(r#"{"method":"catchup"}"#).unwrap(), UiMessage::Catchup);
    assert_eq!(decode::<UiMessage>(r#"{"method":"sleepme"}"#).unwrap(), UiMessage::SleepMe);
    assert_eq!(
        decode::<UiMessage>(r#"{"method":"wakeme","data":null}"#).unwrap(),
        UiMessage::WakeMe
    );
}

#[test]
fn unknown_method_is_decode_error() {
    let err = decode::<UiMessage>(r#"{"method":"dance","data":{}}"#).unwrap_err();
    assert!(matches!(err, ProtoError::Decode(_)));

    let err = decode::<UiMessage>("not json").unwrap_err();
    assert!(matches!(err, ProtoError::Decode(_)));
}

#[test]
fn sensor_messages_decode() {
    let reg = decode::<SensorMessage>(
        r#"{"method":"register","data":{"type":"motion","id":"pir-1","settings":{}}}"#,
    )
    .unwrap();
    let SensorMessage::Register(reg) = reg else {
        panic!("expected register");
    };
    assert_eq!(reg.sensor_type, "motion");
    assert_eq!(reg.missing_identity(), None);

    let reading =
        decode::<SensorMessage>(r#"{"method":"data","data":{"data":{"motion":true}}}"#).unwrap();
    let SensorMessage::Data(reading) = reading else {
        panic!("expected data");
    };
    assert_eq!(reading.data, json!({"motion": true}));
    assert!(!reading.wake);
}

#[test]
fn server_messages_encode() {
    assert_eq!(as_json(&ServerMessage::Registered), json!({"method": "registered"}));
    assert_eq!(as_json(&ServerMessage::Sleep), json!({"method": "sleep"}));
    assert_eq!(
        as_json(&ServerMessage::error("missing config 'city'")),
        json!({"method": "error", "data": {"reason": "missing config 'city'", "fatal": false}})
    );
    assert_eq!(
        as_json(&ServerMessage::Update {
            source: "weather".to_string(),
            filter: "geo".to_string(),
            data: json!({"temperature": 4}),
            wake: false,
        }),
        json!({
            "method": "update",
            "data": {"source": "weather", "filter": "geo", "data": {"temperature": 4}, "wake": false}
        })
    );
    assert!(ServerMessage::fatal("bye").is_fatal());
}
