mod common;

use common::RecordingHost;
use serde_json::{json, Value};
use sidechain_bridge::protocol::{Frame, FrameKind};
use sidechain_bridge::{
    BridgeError, Controller, ControllerConfig, ControllerError, ControllerEvent, EmbeddedHost,
    FrameSink, HostChannel, ParameterConfig, ParameterTable, ParametersConfig,
};
use std::sync::{Arc, Mutex};

fn parameters() -> ParametersConfig {
    ParametersConfig::new()
        .with(
            "gain",
            ParameterConfig {
                title: "Gain".into(),
                default_value: Some(0.25),
                ..Default::default()
            },
        )
        .with("mix", ParameterConfig::default())
        .with(
            "drive",
            ParameterConfig {
                title: "Drive".into(),
                default_value: Some(0.8),
                can_automate: true,
                ..Default::default()
            },
        )
}

fn record_events(controller: &Controller) -> Arc<Mutex<Vec<ControllerEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    controller.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    events
}

/// Initializes against a recording host that answers the initial pulls.
async fn initialized(config: ControllerConfig) -> (Controller, Arc<RecordingHost>) {
    let host = RecordingHost::new();
    let controller = Controller::with_host_probe(config, host.probe());
    let (init, _, _) = tokio::join!(
        controller.initialize(),
        host.answer("getState", json!({"x": 0, "y": 2})),
        host.answer("getInitialProcessorState", json!({"meter": -12.0})),
    );
    init.expect("initialize");
    host.take_sent();
    (controller, host)
}

#[test]
fn tags_follow_declaration_order() {
    let table = ParameterTable::from_config(&parameters());

    assert_eq!(table.len(), 3);
    for (expected, name) in ["gain", "mix", "drive"].iter().enumerate() {
        let tag = table.tag_of(name).unwrap();
        assert_eq!(tag as usize, expected);
        assert_eq!(table.name_of(tag), Some(*name));
    }
    assert_eq!(table.name_of(3), None);
    assert!(!table.is_empty());
    assert_eq!(
        table.values(),
        vec![
            ("gain".to_string(), 0.25),
            ("mix".to_string(), 0.0),
            ("drive".to_string(), 0.8)
        ]
    );

    let mut table = table;
    assert_eq!(table.set("mix", 0.4), Some(1));
    assert_eq!(table.value("mix"), Some(0.4));
    assert_eq!(table.set("volume", 1.0), None);
}

#[tokio::test]
async fn initialize_registers_opens_and_pulls_state() {
    let host = RecordingHost::new();
    let controller = Controller::with_host_probe(
        ControllerConfig::default().with_parameters(parameters()),
        host.probe(),
    );
    let events = record_events(&controller);

    let (init, _, _) = tokio::join!(
        controller.initialize(),
        host.answer("getState", json!({"x": 0})),
        host.answer("getInitialProcessorState", json!({"meter": 1})),
    );
    init.unwrap();

    let calls: Vec<String> = host.sent().into_iter().map(|f| f.method).collect();
    assert_eq!(calls, ["handleBridgeReady", "getState", "getInitialProcessorState"]);
    assert_eq!(controller.state(), json!({"x": 0}));
    assert_eq!(controller.processor_state(), json!({"meter": 1}));
    assert_eq!(controller.parameter("gain"), Some(0.25));
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            ControllerEvent::StateChanged(json!({"x": 0})),
            ControllerEvent::ProcessorStateChanged(json!({"meter": 1})),
        ]
    );
}

#[tokio::test]
async fn initialize_fails_when_state_pull_is_rejected() {
    let host = RecordingHost::new();
    let controller = Controller::with_host_probe(ControllerConfig::default(), host.probe());

    let reject = async {
        while !host.has_call("getState") {
            tokio::task::yield_now().await;
        }
        host.deliver(r#"["reject","getState","no state yet"]"#);
        host.deliver(r#"["resolve","getInitialProcessorState",{}]"#);
    };
    let (init, _) = tokio::join!(controller.initialize(), reject);

    assert!(matches!(init, Err(ControllerError::Call(_))));
}

#[tokio::test]
async fn unmanaged_state_skips_state_handlers_and_pulls() {
    let config = ControllerConfig {
        managed_state: false,
        ..Default::default()
    }
    .with_parameters(parameters());
    let host = RecordingHost::new();
    let controller = Controller::with_host_probe(config, host.probe());

    controller.initialize().await.unwrap();
    assert_eq!(host.take_sent().len(), 1);

    host.deliver(r#"["call","setState",{"x":9}]"#);
    assert_eq!(controller.state(), Value::Null);
    assert!(host.sent().is_empty());
}

#[tokio::test]
async fn processor_state_pull_can_be_disabled() {
    let config = ControllerConfig {
        fetch_processor_state: false,
        ..Default::default()
    };
    let host = RecordingHost::new();
    let controller = Controller::with_host_probe(config, host.probe());

    let (init, _) = tokio::join!(controller.initialize(), host.answer("getState", json!({})));
    init.unwrap();

    assert!(!host.has_call("getInitialProcessorState"));
    assert_eq!(controller.processor_state(), Value::Null);
}

#[tokio::test]
async fn update_parameter_is_optimistic_and_forwarded() {
    let (controller, host) =
        initialized(ControllerConfig::default().with_parameters(parameters())).await;
    let events = record_events(&controller);

    controller.update_parameter("gain", 0.5).unwrap();

    assert_eq!(controller.parameter("gain"), Some(0.5));
    assert_eq!(host.sent_text(), [r#"["call","updateParameter",0,0.5]"#]);
    assert_eq!(
        *events.lock().unwrap(),
        vec![ControllerEvent::ParameterChanged {
            name: "gain".into(),
            value: 0.5
        }]
    );
}

#[tokio::test]
async fn update_parameter_with_reads_local_cache() {
    let (controller, host) =
        initialized(ControllerConfig::default().with_parameters(parameters())).await;

    controller.update_parameter_with("drive", |v| v / 2.0).unwrap();
    controller.update_parameter_with("drive", |v| v / 2.0).unwrap();

    assert_eq!(controller.parameter("drive"), Some(0.2));
    let last = host.sent().pop().unwrap();
    assert_eq!(last, Frame::call("updateParameter", vec![json!(2), json!(0.2)]));
}

#[tokio::test]
async fn unknown_parameter_is_an_error() {
    let (controller, host) =
        initialized(ControllerConfig::default().with_parameters(parameters())).await;

    let err = controller.update_parameter("volume", 1.0).unwrap_err();
    assert!(matches!(err, ControllerError::UnknownParameter(name) if name == "volume"));
    assert!(host.sent().is_empty());
}

#[tokio::test]
async fn host_parameter_push_updates_cache() {
    let (controller, host) =
        initialized(ControllerConfig::default().with_parameters(parameters())).await;
    let events = record_events(&controller);

    host.deliver(r#"["call","updateParameter",1,0.75]"#);

    assert_eq!(controller.parameter("mix"), Some(0.75));
    assert!(host.sent().is_empty());
    assert_eq!(
        *events.lock().unwrap(),
        vec![ControllerEvent::ParameterChanged {
            name: "mix".into(),
            value: 0.75
        }]
    );
}

#[tokio::test]
async fn host_push_for_unknown_tag_is_rejected() {
    let (controller, host) =
        initialized(ControllerConfig::default().with_parameters(parameters())).await;

    host.deliver(r#"["call","updateParameter",7,0.1]"#);

    let frames = host.sent();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].kind, FrameKind::Reject);
    assert_eq!(frames[0].reject_message(), "unknown parameter tag: 7");
    assert_eq!(controller.parameters().len(), 3);
}

#[tokio::test]
async fn without_parameter_config_updates_are_not_handled() {
    let (controller, host) = initialized(ControllerConfig::default()).await;

    host.deliver(r#"["call","updateParameter",0,0.5]"#);
    assert!(host.sent().is_empty());
    assert!(controller.parameters().is_empty());
    assert!(matches!(
        controller.update_parameter("gain", 0.5),
        Err(ControllerError::UnknownParameter(_))
    ));
}

#[tokio::test]
async fn update_state_merges_and_pushes() {
    let (controller, host) = initialized(ControllerConfig::default()).await;
    let events = record_events(&controller);

    controller.update_state(json!({"x": 1})).unwrap();

    assert_eq!(controller.state(), json!({"x": 1, "y": 2}));
    let frames = host.sent();
    assert_eq!(frames, vec![Frame::call("setState", vec![json!({"x": 1, "y": 2})])]);
    assert_eq!(
        *events.lock().unwrap(),
        vec![ControllerEvent::StateChanged(json!({"x": 1, "y": 2}))]
    );
}

#[tokio::test]
async fn update_state_with_sees_current_state() {
    let (controller, _host) = initialized(ControllerConfig::default()).await;

    controller
        .update_state_with(|state| json!({"x": state["y"].as_i64().unwrap() + 1}))
        .unwrap();

    assert_eq!(controller.state(), json!({"x": 3, "y": 2}));
}

#[tokio::test]
async fn update_state_requires_an_object() {
    let (controller, host) = initialized(ControllerConfig::default()).await;

    assert!(matches!(
        controller.update_state(json!([1, 2])),
        Err(ControllerError::StateNotAnObject(_))
    ));
    assert!(host.sent().is_empty());
    assert_eq!(controller.state(), json!({"x": 0, "y": 2}));
}

#[tokio::test]
async fn host_state_push_replaces_mirror() {
    let (controller, host) = initialized(ControllerConfig::default()).await;
    let events = record_events(&controller);

    host.deliver(r#"["call","setState",{"x":9}]"#);

    assert_eq!(controller.state(), json!({"x": 9}));
    assert!(host.sent().is_empty());
    assert_eq!(
        *events.lock().unwrap(),
        vec![ControllerEvent::StateChanged(json!({"x": 9}))]
    );
}

#[tokio::test]
async fn host_processor_state_push_replaces_mirror() {
    let (controller, host) = initialized(ControllerConfig::default()).await;
    let mut changes = controller.subscribe_channel();

    host.deliver(r#"["call","setStateFromProcessorState",{"meter":-3.5}]"#);

    assert_eq!(controller.processor_state(), json!({"meter": -3.5}));
    assert_eq!(
        changes.recv().await,
        Some(ControllerEvent::ProcessorStateChanged(json!({"meter": -3.5})))
    );
}

#[tokio::test]
async fn observers_can_read_the_controller_during_delivery() {
    let (controller, host) =
        initialized(ControllerConfig::default().with_parameters(parameters())).await;
    let controller = Arc::new(controller);
    let seen = Arc::new(Mutex::new(None));

    let reader = Arc::downgrade(&controller);
    let slot = Arc::clone(&seen);
    controller.subscribe(move |_| {
        if let Some(controller) = reader.upgrade() {
            *slot.lock().unwrap() = controller.parameter("mix");
        }
    });

    host.deliver(r#"["call","updateParameter",1,0.3]"#);

    assert_eq!(*seen.lock().unwrap(), Some(0.3));
}

#[tokio::test]
async fn unsubscribed_observers_stop_receiving() {
    let (controller, host) = initialized(ControllerConfig::default()).await;
    let events = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&events);
    let id = controller.subscribe(move |_| *counter.lock().unwrap() += 1);

    host.deliver(r#"["call","setState",{"x":1}]"#);
    assert!(controller.unsubscribe(id));
    host.deliver(r#"["call","setState",{"x":2}]"#);

    assert_eq!(*events.lock().unwrap(), 1);
    assert!(!controller.unsubscribe(id));
}

#[tokio::test]
async fn local_state_edits_before_initialize_change_nothing() {
    let host = RecordingHost::new();
    let controller = Controller::with_host_probe(ControllerConfig::default(), host.probe());
    let events = record_events(&controller);

    let err = controller.update_state(json!({"x": 1})).unwrap_err();

    assert!(matches!(err, ControllerError::Bridge(BridgeError::NotOpen)));
    assert_eq!(controller.state(), Value::Null);
    assert!(events.lock().unwrap().is_empty());
    assert!(host.sent().is_empty());
}

/// Answers `getState` and bounces every `setState` with its own value, both
/// synchronously from inside `post_message`.
struct EchoHost {
    sink: Mutex<Option<FrameSink>>,
    seen: Arc<Mutex<Vec<ControllerEvent>>>,
    announced_before_post: Mutex<Vec<bool>>,
}

impl HostChannel for EchoHost {
    fn post_message(&self, text: String) {
        let frame = Frame::parse(&text).unwrap();
        let reply = match frame.method.as_str() {
            "getState" => Frame::resolve("getState", vec![json!({"x": 0, "y": 2})]),
            "setState" => {
                let expected = ControllerEvent::StateChanged(frame.payload[0].clone());
                let announced = self.seen.lock().unwrap().last() == Some(&expected);
                self.announced_before_post.lock().unwrap().push(announced);
                Frame::call("setState", vec![json!({"host": true})])
            }
            _ => return,
        };
        let sink = self.sink.lock().unwrap().clone().unwrap();
        sink(reply.encode());
    }

    fn set_on_message(&self, sink: FrameSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }
}

#[tokio::test]
async fn state_change_is_announced_before_it_is_posted() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let host = Arc::new(EchoHost {
        sink: Mutex::new(None),
        seen: Arc::clone(&seen),
        announced_before_post: Mutex::new(Vec::new()),
    });
    let config = ControllerConfig {
        fetch_processor_state: false,
        ..Default::default()
    };
    let controller =
        Controller::with_host_probe(config, EmbeddedHost(host.clone() as Arc<dyn HostChannel>));
    let sink = Arc::clone(&seen);
    controller.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    controller.initialize().await.unwrap();

    controller.update_state(json!({"z": 3})).unwrap();

    assert_eq!(*host.announced_before_post.lock().unwrap(), [true]);
    assert_eq!(controller.state(), json!({"host": true}));
    assert_eq!(
        seen.lock().unwrap().last(),
        Some(&ControllerEvent::StateChanged(json!({"host": true})))
    );
}
