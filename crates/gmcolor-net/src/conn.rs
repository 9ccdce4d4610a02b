//! Peer connections, the per-connection reader loop and message dispatch.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    BufWriter,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::message::{encode_frame, Frame, FrameLen, MessageType, NodeIndex, DELIM_EOF};

type BoxedWriter = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// Size of the raw chunks a `SUBGRAPH` payload is split into.
const SUBGRAPH_CHUNK: usize = 64 * 1024;

/// Write half of a connection to one peer.
///
/// The read half lives in the reader task spawned by [`attach`].
pub struct NodeConn {
    label: String,
    index: OnceLock<NodeIndex>,
    writer: Mutex<BoxedWriter>,
    open: AtomicBool,
}

impl fmt::Debug for NodeConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConn")
            .field("label", &self.label)
            .field("index", &self.index.get())
            .field("open", &self.is_open())
            .finish()
    }
}

impl NodeConn {
    /// Wrap a write half. `label` is used in logs and errors.
    pub fn new<W>(label: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            label: label.into(),
            index: OnceLock::new(),
            writer: Mutex::new(BufWriter::new(Box::new(writer))),
            open: AtomicBool::new(true),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Peer node index, once the handshake announced it.
    pub fn index(&self) -> Option<NodeIndex> {
        self.index.get().copied()
    }

    /// Record the peer's node index. A second, different index is a
    /// handshake inconsistency.
    pub fn set_index(&self, index: NodeIndex) -> Result<()> {
        let stored = *self.index.get_or_init(|| index);
        if stored != index {
            return Err(Error::Handshake(format!(
                "peer {} announced index {index} after {stored}",
                self.label
            )));
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn fail(&self, source: std::io::Error) -> Error {
        self.open.store(false, Ordering::Release);
        Error::PeerWrite {
            peer: self.label.clone(),
            source,
        }
    }

    /// Write one frame. Unless `buffered`, the writer is flushed afterwards.
    ///
    /// Any write error closes the connection for good.
    pub async fn write_frame(&self, kind: MessageType, payload: &[u8], buffered: bool) -> Result<()> {
        let mut frame = Vec::with_capacity(payload.len() + 2);
        encode_frame(kind, payload, &mut frame)?;
        self.write_raw(&frame, buffered).await
    }

    /// Write pre-encoded bytes, such as a batch of frames.
    pub async fn write_raw(&self, bytes: &[u8], buffered: bool) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed(self.label.clone()));
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await.map_err(|e| self.fail(e))?;
        if !buffered {
            writer.flush().await.map_err(|e| self.fail(e))?;
        }
        trace!(peer = %self.label, bytes = bytes.len(), buffered, "wrote");
        Ok(())
    }

    pub async fn flush(&self) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed(self.label.clone()));
        }
        let mut writer = self.writer.lock().await;
        writer.flush().await.map_err(|e| self.fail(e))
    }

    /// Stream a text subgraph: the tag, the text in continuation chunks,
    /// then the delimiter. The writer stays locked for the whole frame.
    pub async fn send_subgraph(&self, text: &str) -> Result<()> {
        MessageType::Subgraph.validate(text.as_bytes())?;
        if !self.is_open() {
            return Err(Error::Closed(self.label.clone()));
        }
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&[MessageType::Subgraph.tag()])
            .await
            .map_err(|e| self.fail(e))?;
        for chunk in text.as_bytes().chunks(SUBGRAPH_CHUNK) {
            writer.write_all(chunk).await.map_err(|e| self.fail(e))?;
        }
        writer.write_all(&[DELIM_EOF]).await.map_err(|e| self.fail(e))?;
        writer.flush().await.map_err(|e| self.fail(e))?;
        trace!(peer = %self.label, bytes = text.len(), "wrote subgraph");
        Ok(())
    }

    /// Flush and shut down the write half. Idempotent.
    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(peer = %self.label, error = %e, "shutdown failed");
        }
    }
}

/// Read one frame. `Ok(None)` is a clean end of stream at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut tag = [0u8; 1];
    if reader.read(&mut tag).await? == 0 {
        return Ok(None);
    }
    let kind = MessageType::from_tag(tag[0]).ok_or(Error::UnknownTag(tag[0]))?;

    let payload = match kind.frame_len() {
        None => return Err(Error::UnknownTag(tag[0])),
        Some(FrameLen::Fixed(len)) => {
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => Error::Truncated {
                    context: kind.name(),
                },
                _ => Error::Io(e),
            })?;
            buf
        }
        Some(FrameLen::Delimited) => {
            let mut buf = Vec::new();
            reader.read_until(DELIM_EOF, &mut buf).await?;
            if buf.pop() != Some(DELIM_EOF) {
                return Err(Error::Truncated {
                    context: kind.name(),
                });
            }
            buf
        }
    };

    Ok(Some(Frame { kind, payload }))
}

/// Handler invoked for every received frame of one message type.
pub type Handler = Arc<dyn Fn(&[u8], &Arc<NodeConn>) -> Result<()> + Send + Sync>;

/// Message type → handler table shared by every connection of a node.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<MessageType, Handler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn on<F>(mut self, kind: MessageType, handler: F) -> Self
    where
        F: Fn(&[u8], &Arc<NodeConn>) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    pub fn handles(&self, kind: MessageType) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn dispatch(&self, frame: &Frame, conn: &Arc<NodeConn>) -> Result<()> {
        let handler = self
            .handlers
            .get(&frame.kind)
            .ok_or(Error::Unhandled(frame.kind.name()))?;
        handler(&frame.payload, conn)
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.handlers.keys().map(|k| k.name()))
            .finish()
    }
}

/// How a reader loop ended.
#[derive(Debug)]
pub enum ConnEvent {
    /// The peer closed the stream at a frame boundary.
    Closed {
        label: String,
        index: Option<NodeIndex>,
    },
    /// Framing, I/O or handler error; the connection is dead.
    Failed {
        label: String,
        index: Option<NodeIndex>,
        error: Error,
    },
}

impl ConnEvent {
    pub fn index(&self) -> Option<NodeIndex> {
        match self {
            Self::Closed { index, .. } | Self::Failed { index, .. } => *index,
        }
    }
}

/// Sender half of the channel reader loops report to.
pub type EventSender = mpsc::UnboundedSender<ConnEvent>;

async fn reader_loop<R>(
    conn: Arc<NodeConn>,
    mut reader: BufReader<R>,
    table: Arc<DispatchTable>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = read_frame(&mut reader).await? {
        trace!(peer = %conn.label, kind = %frame.kind, len = frame.payload.len(), "frame");
        table.dispatch(&frame, &conn)?;
    }
    Ok(())
}

/// Build a connection from split halves and spawn its reader loop.
///
/// Frames are dispatched strictly in arrival order. When the loop ends the
/// outcome is sent on `events`.
pub fn attach<R, W>(
    label: impl Into<String>,
    reader: R,
    writer: W,
    table: Arc<DispatchTable>,
    events: EventSender,
) -> (Arc<NodeConn>, JoinHandle<()>)
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let conn = Arc::new(NodeConn::new(label, writer));
    let task_conn = Arc::clone(&conn);
    let handle = tokio::spawn(async move {
        let outcome = reader_loop(Arc::clone(&task_conn), BufReader::new(reader), table).await;
        let label = task_conn.label.clone();
        let index = task_conn.index();
        let event = match outcome {
            Ok(()) => {
                debug!(peer = %label, ?index, "peer closed connection");
                ConnEvent::Closed { label, index }
            }
            Err(error) => {
                warn!(peer = %label, ?index, %error, "connection failed");
                task_conn.open.store(false, Ordering::Release);
                ConnEvent::Failed {
                    label,
                    index,
                    error,
                }
            }
        };
        // The owner may already be gone during shutdown.
        let _ = events.send(event);
    });
    (conn, handle)
}

/// [`attach`] a TCP stream, labelled with the peer address.
pub fn attach_tcp(
    stream: TcpStream,
    table: Arc<DispatchTable>,
    events: EventSender,
) -> Result<(Arc<NodeConn>, JoinHandle<()>)> {
    stream.set_nodelay(true)?;
    let label = stream.peer_addr()?.to_string();
    let (reader, writer) = stream.into_split();
    Ok(attach(label, reader, writer, table, events))
}
