use serde_json::json;
use sidechain_protocol::{Frame, FrameError, FrameKind, ParameterConfig, ParametersConfig};

#[test]
fn encodes_frames_as_flat_json_arrays() {
    let call = Frame::call("updateParameter", vec![json!(3), json!(0.5)]);
    assert_eq!(call.encode(), r#"["call","updateParameter",3,0.5]"#);

    let ready = Frame::call("handleBridgeReady", vec![]);
    assert_eq!(ready.encode(), r#"["call","handleBridgeReady"]"#);

    let reject = Frame::reject("getState", "boom");
    assert_eq!(reject.encode(), r#"["reject","getState","boom"]"#);
}

#[test]
fn parses_payload_after_method() {
    let frame = Frame::parse(r#"["resolve","getState",{"x":1},2]"#).expect("valid frame");
    assert_eq!(frame.kind, FrameKind::Resolve);
    assert_eq!(frame.method, "getState");
    assert_eq!(frame.payload, vec![json!({"x": 1}), json!(2)]);
}

#[test]
fn rejects_malformed_frames() {
    assert!(matches!(Frame::parse(r#"["call"]"#), Err(FrameError::TooShort(1))));
    assert!(matches!(Frame::parse("[]"), Err(FrameError::TooShort(0))));
    assert!(matches!(Frame::parse(r#"{"a":1}"#), Err(FrameError::NotAnArray)));
    assert!(matches!(Frame::parse("not json"), Err(FrameError::Json(_))));
    assert!(matches!(
        Frame::parse(r#"["notify","x"]"#),
        Err(FrameError::UnknownKind(_))
    ));
    assert!(matches!(
        Frame::parse(r#"["call",7]"#),
        Err(FrameError::InvalidMethod(_))
    ));
}

#[test]
fn reject_message_falls_back_to_json_text() {
    let frame = Frame::parse(r#"["reject","x",{"code":3}]"#).unwrap();
    assert_eq!(frame.reject_message(), r#"{"code":3}"#);

    let frame = Frame::parse(r#"["reject","x"]"#).unwrap();
    assert_eq!(frame.reject_message(), "");
}

#[test]
fn parameters_config_keeps_declaration_order() {
    let text = r#"{
        "mix": { "title": "Mix", "defaultValue": 1.0 },
        "gain": { "title": "Gain", "shortTitle": "Gn", "unit": "dB", "stepCount": 0, "canAutomate": true, "unitID": 2 },
        "bypass": { "title": "Bypass", "stepCount": 1 }
    }"#;
    let config = ParametersConfig::from_json_str(text).expect("valid config");

    let names: Vec<&str> = config.iter().map(|(n, _)| n).collect();
    assert_eq!(names, ["mix", "gain", "bypass"]);

    let gain = config.get("gain").unwrap();
    assert_eq!(gain.short_title, "Gn");
    assert_eq!(gain.unit_id, 2);
    assert!(gain.can_automate);
    assert_eq!(gain.initial_value(), 0.0);
    assert_eq!(config.get("mix").unwrap().initial_value(), 1.0);
}

#[test]
fn redeclared_parameter_keeps_its_position() {
    let config: ParametersConfig = [
        ("a", ParameterConfig::default()),
        ("b", ParameterConfig::default()),
        (
            "a",
            ParameterConfig {
                title: "A".to_string(),
                ..Default::default()
            },
        ),
    ]
    .into_iter()
    .collect();

    let names: Vec<&str> = config.iter().map(|(n, _)| n).collect();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(config.get("a").unwrap().title, "A");
}

#[test]
fn frame_kinds_use_lowercase_wire_names() {
    assert_eq!(serde_json::to_value(FrameKind::Resolve).unwrap(), json!("resolve"));
    assert_eq!(
        serde_json::from_value::<FrameKind>(json!("reject")).unwrap(),
        FrameKind::Reject
    );
    assert!(matches!(
        Frame::parse(r#"["Call","x"]"#),
        Err(FrameError::UnknownKind(k)) if k == json!("Call")
    ));
    assert!(matches!(
        Frame::parse(r#"[1,"x"]"#),
        Err(FrameError::UnknownKind(_))
    ));
}
