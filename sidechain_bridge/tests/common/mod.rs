#![allow(dead_code)]

use serde_json::Value;
use sidechain_bridge::protocol::{Frame, FrameKind};
use sidechain_bridge::{EmbeddedHost, FrameSink, HostChannel};
use std::sync::{Arc, Mutex};

/// In-memory host channel: records what the UI posts and lets the test
/// deliver frames as the host would.
#[derive(Default)]
pub struct RecordingHost {
    sent: Mutex<Vec<String>>,
    sink: Mutex<Option<FrameSink>>,
}

impl HostChannel for RecordingHost {
    fn post_message(&self, frame: String) {
        self.sent.lock().unwrap().push(frame);
    }

    fn set_on_message(&self, sink: FrameSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn probe(self: &Arc<Self>) -> EmbeddedHost {
        EmbeddedHost(Arc::clone(self) as Arc<dyn HostChannel>)
    }

    pub fn deliver(&self, frame: &str) {
        let sink = self.sink.lock().unwrap().clone().expect("bridge not open");
        sink(frame.to_string());
    }

    pub fn sent_text(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.sent_text()
            .iter()
            .map(|text| Frame::parse(text).expect("bridge sent a valid frame"))
            .collect()
    }

    pub fn take_sent(&self) -> Vec<Frame> {
        let frames = self.sent();
        self.sent.lock().unwrap().clear();
        frames
    }

    pub fn has_call(&self, method: &str) -> bool {
        self.sent()
            .iter()
            .any(|f| f.kind == FrameKind::Call && f.method == method)
    }

    /// Waits for the UI to call `method`, then resolves it with `value`.
    pub async fn answer(&self, method: &str, value: Value) {
        while !self.has_call(method) {
            tokio::task::yield_now().await;
        }
        self.deliver(&Frame::resolve(method, vec![value]).encode());
    }
}
