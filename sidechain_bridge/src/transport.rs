use crate::config::BridgeConfig;
use crate::error::TransportError;
use crate::lock;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

/// Receives one raw frame per invocation.
pub type FrameSink = Arc<dyn Fn(String) + Send + Sync>;

/// The message channel a native host injects into the UI process.
pub trait HostChannel: Send + Sync {
    fn post_message(&self, frame: String);
    fn set_on_message(&self, sink: FrameSink);
}

/// Answers whether the embedding environment provides a host channel.
pub trait HostProbe: Send + Sync {
    fn probe(&self) -> Option<Arc<dyn HostChannel>>;
}

/// Standalone UI: always falls back to the loopback transport.
pub struct NoHost;

impl HostProbe for NoHost {
    fn probe(&self) -> Option<Arc<dyn HostChannel>> {
        None
    }
}

pub struct EmbeddedHost(pub Arc<dyn HostChannel>);

impl HostProbe for EmbeddedHost {
    fn probe(&self) -> Option<Arc<dyn HostChannel>> {
        Some(Arc::clone(&self.0))
    }
}

impl<F> HostProbe for F
where
    F: Fn() -> Option<Arc<dyn HostChannel>> + Send + Sync,
{
    fn probe(&self) -> Option<Arc<dyn HostChannel>> {
        self()
    }
}

pub enum Transport {
    Embedded(EmbeddedTransport),
    Loopback(LoopbackTransport),
}

impl Transport {
    pub fn select(probe: &dyn HostProbe, config: &BridgeConfig) -> Self {
        match probe.probe() {
            Some(channel) => {
                debug!("host channel present, using embedded transport");
                Transport::Embedded(EmbeddedTransport::new(channel))
            }
            None => {
                debug!(url = %config.loopback_url, "no host channel, using loopback transport");
                Transport::Loopback(LoopbackTransport::new(config.loopback_url.clone()))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Transport::Embedded(_) => "embedded",
            Transport::Loopback(_) => "loopback",
        }
    }

    pub async fn open(&self, sink: FrameSink) -> Result<(), TransportError> {
        match self {
            Transport::Embedded(t) => t.open(sink),
            Transport::Loopback(t) => t.open(sink).await,
        }
    }

    pub fn send(&self, frame: String) {
        match self {
            Transport::Embedded(t) => t.send(frame),
            Transport::Loopback(t) => t.send(frame),
        }
    }
}

pub struct EmbeddedTransport {
    channel: Arc<dyn HostChannel>,
    opened: AtomicBool,
}

impl EmbeddedTransport {
    pub fn new(channel: Arc<dyn HostChannel>) -> Self {
        Self {
            channel,
            opened: AtomicBool::new(false),
        }
    }

    fn open(&self, sink: FrameSink) -> Result<(), TransportError> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyOpen);
        }
        self.channel.set_on_message(sink);
        Ok(())
    }

    fn send(&self, frame: String) {
        self.channel.post_message(frame);
    }
}

/// Websocket client to a host listening on the loopback interface.
///
/// Frames sent before the socket is up are queued and flushed once the writer
/// task starts.
pub struct LoopbackTransport {
    url: Url,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LoopbackTransport {
    pub fn new(url: Url) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            url,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    async fn open(&self, sink: FrameSink) -> Result<(), TransportError> {
        let Some(mut outbound_rx) = lock(&self.outbound_rx).take() else {
            return Err(TransportError::AlreadyOpen);
        };

        let socket = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(source) => {
                *lock(&self.outbound_rx) = Some(outbound_rx);
                return Err(TransportError::Connect {
                    address: self.url.to_string(),
                    source,
                });
            }
        };
        debug!(url = %self.url, "loopback connected");

        let (mut write, mut read) = socket.split();

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write.send(Message::Text(frame.into())).await {
                    warn!("loopback send failed: {e}");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(incoming) = read.next().await {
                match incoming {
                    Ok(Message::Text(text)) => sink(text.to_string()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("loopback read failed: {e}");
                        break;
                    }
                }
            }
            debug!("loopback connection closed");
        });

        lock(&self.tasks).extend([writer, reader]);
        Ok(())
    }

    fn send(&self, frame: String) {
        if self.outbound_tx.send(frame).is_err() {
            warn!("loopback writer stopped, dropping frame");
        }
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}
