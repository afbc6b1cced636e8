use crate::config::BridgeConfig;
use crate::error::{BridgeError, CallError, HandlerError};
use crate::lock;
use crate::transport::{FrameSink, HostProbe, Transport};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sidechain_protocol::{Frame, FrameError, FrameKind, HANDLE_BRIDGE_READY};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

/// `Ok(None)` sends no reply, `Ok(Some(v))` resolves with `v`, `Err` rejects.
pub type HandlerResult = Result<Option<Value>, HandlerError>;

type Handler = Arc<dyn Fn(Vec<Value>) -> HandlerResult + Send + Sync>;
type Reply = Result<Vec<Value>, CallError>;

/// Frame-level RPC engine between the UI and the host.
///
/// Outstanding calls are keyed by method name: at most one call per method
/// may be pending, and issuing another displaces the first with
/// [`CallError::Dangling`].
pub struct Bridge {
    inner: Arc<Inner>,
}

struct Inner {
    config: BridgeConfig,
    probe: Box<dyn HostProbe>,
    transport: Mutex<Option<Arc<Transport>>>,
    handlers: Mutex<HashMap<String, Handler>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
}

impl Bridge {
    pub fn new(config: BridgeConfig, probe: impl HostProbe + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                probe: Box::new(probe),
                transport: Mutex::new(None),
                handlers: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Selects and opens a transport, then tells the host the UI is ready.
    ///
    /// On failure the bridge is left unopened and `open` may be retried.
    pub async fn open(&self) -> Result<(), BridgeError> {
        let transport = {
            let mut slot = lock(&self.inner.transport);
            if slot.is_some() {
                return Err(BridgeError::AlreadyOpen);
            }
            let transport = Arc::new(Transport::select(self.inner.probe.as_ref(), &self.inner.config));
            *slot = Some(Arc::clone(&transport));
            transport
        };

        let weak = Arc::downgrade(&self.inner);
        let sink: FrameSink = Arc::new(move |text: String| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(&text);
            }
        });

        if let Err(e) = transport.open(sink).await {
            lock(&self.inner.transport).take();
            return Err(e.into());
        }

        info!(transport = transport.kind(), "bridge open");
        self.call(HANDLE_BRIDGE_READY, Vec::new())
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner.transport).is_some()
    }

    /// Installs `handler` for host calls to `method`. The last registration wins.
    pub fn register<F>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>) -> HandlerResult + Send + Sync + 'static,
    {
        let method = method.into();
        if lock(&self.inner.handlers)
            .insert(method.clone(), Arc::new(handler))
            .is_some()
        {
            debug!(%method, "handler replaced");
        }
    }

    /// Like [`register`](Self::register), with the positional arguments decoded
    /// into `A` (a tuple matching the call's arity) and the result encoded.
    /// A result that encodes to `null`, such as `()`, sends no reply.
    pub fn register_typed<A, R, F>(&self, method: impl Into<String>, handler: F)
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> Result<R, HandlerError> + Send + Sync + 'static,
    {
        self.register(method, move |args| {
            let args: A = serde_json::from_value(Value::Array(args))?;
            let result = serde_json::to_value(handler(args)?)?;
            Ok((!result.is_null()).then_some(result))
        });
    }

    /// Fire-and-forget call to the host.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<(), BridgeError> {
        self.inner.send(&Frame::call(method, args))
    }

    /// Calls the host and returns a future settled by the matching
    /// `resolve`/`reject` frame. The call frame is sent before this returns.
    pub fn call_with_result(&self, method: &str, args: Vec<Value>) -> PendingReply {
        let (tx, rx) = oneshot::channel();

        let displaced = lock(&self.inner.pending).insert(method.to_string(), tx);
        if let Some(displaced) = displaced {
            debug!(method, "displacing outstanding call");
            let _ = displaced.send(Err(CallError::Dangling {
                method: method.to_string(),
            }));
        }

        if let Err(e) = self.call(method, args) {
            lock(&self.inner.pending).remove(method);
            return PendingReply {
                method: method.to_string(),
                state: ReplyState::Failed(Some(e.into())),
            };
        }

        PendingReply {
            method: method.to_string(),
            state: ReplyState::Waiting(rx),
        }
    }

    /// [`call_with_result`](Self::call_with_result) decoding the first result value.
    pub fn request<T>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<T, CallError>> + Send + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        let reply = self.call_with_result(method, args);
        let method = method.to_string();
        async move {
            let first = reply.await?.into_iter().next().unwrap_or(Value::Null);
            serde_json::from_value(first).map_err(|source| CallError::Decode { method, source })
        }
    }

    pub fn has_pending(&self, method: &str) -> bool {
        lock(&self.inner.pending).contains_key(method)
    }

    /// Handles one raw inbound frame. Transports call this through their sink.
    pub fn dispatch(&self, text: &str) {
        self.inner.dispatch(text);
    }
}

impl Inner {
    fn send(&self, frame: &Frame) -> Result<(), BridgeError> {
        let transport = lock(&self.transport).clone().ok_or(BridgeError::NotOpen)?;
        let text = frame.encode();
        trace!("-> {text}");
        transport.send(text);
        Ok(())
    }

    fn dispatch(&self, text: &str) {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(FrameError::TooShort(_) | FrameError::UnknownKind(_)) => {
                trace!("ignoring frame: {text}");
                return;
            }
            Err(e) => {
                warn!("dropping malformed frame: {e}");
                return;
            }
        };
        trace!("<- {text}");

        match frame.kind {
            FrameKind::Call => self.handle_call(frame.method, frame.payload),
            FrameKind::Resolve => self.settle(&frame.method, Ok(frame.payload)),
            FrameKind::Reject => {
                let message = frame.reject_message();
                self.settle(
                    &frame.method,
                    Err(CallError::Rejected {
                        method: frame.method.clone(),
                        message,
                    }),
                );
            }
        }
    }

    fn handle_call(&self, method: String, args: Vec<Value>) {
        let handler = lock(&self.handlers).get(&method).cloned();
        let Some(handler) = handler else {
            trace!(%method, "no handler registered, dropping call");
            return;
        };

        let reply = match panic::catch_unwind(AssertUnwindSafe(|| handler(args))) {
            Ok(Ok(None)) => return,
            Ok(Ok(Some(result))) => Frame::resolve(method, vec![result]),
            Ok(Err(e)) => Frame::reject(method, e.to_string()),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(%method, "handler panicked: {message}");
                Frame::reject(method, message)
            }
        };

        if let Err(e) = self.send(&reply) {
            warn!(method = %reply.method, "could not reply: {e}");
        }
    }

    // Unmatched replies are dropped; the host gets no signal.
    fn settle(&self, method: &str, outcome: Reply) {
        let Some(reply) = lock(&self.pending).remove(method) else {
            warn!(method, "no pending call, dropping reply");
            return;
        };
        if reply.send(outcome).is_err() {
            debug!(method, "caller stopped waiting");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Result of [`Bridge::call_with_result`].
///
/// Resolves to the payload of the host's `resolve` frame. Never times out.
pub struct PendingReply {
    method: String,
    state: ReplyState,
}

enum ReplyState {
    Waiting(oneshot::Receiver<Reply>),
    Failed(Option<CallError>),
}

impl PendingReply {
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl Future for PendingReply {
    type Output = Reply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match &mut this.state {
            ReplyState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
                Poll::Ready(Err(_)) => Poll::Ready(Err(CallError::Closed {
                    method: this.method.clone(),
                })),
                Poll::Pending => Poll::Pending,
            },
            ReplyState::Failed(err) => Poll::Ready(Err(err.take().unwrap_or_else(|| {
                CallError::Closed {
                    method: this.method.clone(),
                }
            }))),
        }
    }
}
