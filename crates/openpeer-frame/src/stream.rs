use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use openpeer_transport::{Fanout, Inbox, Transport, TransportError};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use crate::codec::{EnvelopeCodec, FrameConfig};

/// [`Transport`] over a framed byte stream (Unix socket, pipe, TCP...).
///
/// A reader task decodes frames and fans each JSON value out to subscribers;
/// a writer task drains the outbound queue so [`Transport::send`] never
/// blocks. Frames that are not JSON are dropped; a framing error or EOF
/// closes the transport.
pub struct StreamTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    inbound: Arc<Fanout>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl StreamTransport {
    /// Wrap a stream with default framing. Must be called inside a tokio runtime.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_config(stream, FrameConfig::default())
    }

    /// Wrap a stream with explicit framing configuration.
    pub fn with_config<S>(stream: S, config: FrameConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let inbound = Arc::new(Fanout::new());
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(
            FramedWrite::new(write_half, EnvelopeCodec::new(&config)),
            rx,
            Arc::clone(&closed),
        ));
        let reader = tokio::spawn(read_loop(
            FramedRead::new(read_half, EnvelopeCodec::new(&config)),
            Arc::clone(&inbound),
            Arc::clone(&closed),
        ));

        Self {
            outbound: Mutex::new(Some(tx)),
            inbound,
            closed,
            reader,
        }
    }

    fn lock_outbound(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<Bytes>>> {
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for StreamTransport {
    fn send(&self, message: Value) -> openpeer_transport::Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let payload = serde_json::to_vec(&message)
            .map_err(|err| TransportError::Io(std::io::Error::other(err)))?;
        match self.lock_outbound().as_ref() {
            Some(tx) => tx
                .send(Bytes::from(payload))
                .map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn subscribe(&self) -> openpeer_transport::Result<Inbox> {
        self.inbound.subscribe()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender lets the writer flush what is queued, then exit.
        self.lock_outbound().take();
        self.reader.abort();
        self.inbound.close();
        debug!("stream transport closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("closed", &self.is_closed())
            .field("inbound", &self.inbound)
            .finish()
    }
}

async fn read_loop<R>(
    mut frames: FramedRead<ReadHalf<R>, EnvelopeCodec>,
    inbound: Arc<Fanout>,
    closed: Arc<AtomicBool>,
) where
    R: AsyncRead + AsyncWrite,
{
    while let Some(frame) = frames.next().await {
        let payload = match frame {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "stream framing failed; closing transport");
                break;
            }
        };
        match serde_json::from_slice::<Value>(&payload) {
            Ok(value) => {
                inbound.deliver(&value);
            }
            Err(err) => trace!(error = %err, size = payload.len(), "dropping non-JSON frame"),
        }
    }
    closed.store(true, Ordering::SeqCst);
    inbound.close();
    debug!("stream reader finished");
}

async fn write_loop<W>(
    mut frames: FramedWrite<WriteHalf<W>, EnvelopeCodec>,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    closed: Arc<AtomicBool>,
) where
    W: AsyncRead + AsyncWrite,
{
    while let Some(payload) = outbound.recv().await {
        if let Err(err) = frames.send(payload).await {
            warn!(error = %err, "stream write failed; closing transport");
            closed.store(true, Ordering::SeqCst);
            return;
        }
    }
    let _ = frames.close().await;
}
