//! GM Color networking - framing, dispatch and the node connection pool
//!
//! Every node (the server and each worker) talks to every other node over
//! one TCP connection. This crate provides:
//! - The message catalog and a tag-prefixed binary frame codec
//! - [`NodeConn`], a buffered writer plus a single reader task per
//!   connection that dispatches frames in arrival order
//! - [`NodeConnPool`], which turns connections that arrived in any order
//!   into slots addressed by node index
//!
//! # Example
//!
//! ```rust,ignore
//! use gmcolor_net::{attach_tcp, DispatchTable, MessageType, NodeConnPool};
//!
//! let table = Arc::new(DispatchTable::new().on(MessageType::NodeFinished, |payload, _conn| {
//!     println!("node {} finished", payload[0]);
//!     Ok(())
//! }));
//! let (events, _rx) = tokio::sync::mpsc::unbounded_channel();
//! let pool = NodeConnPool::new();
//! let (conn, _reader) = attach_tcp(stream, table, events)?;
//! conn.set_index(2)?;
//! pool.add_unregistered(conn);
//! let me = pool.register()?;
//! pool.broadcast_workers(MessageType::NodeFinished, &[me]).await?;
//! ```

pub mod conn;
pub mod error;
pub mod message;
pub mod pool;

pub use conn::{
    attach, attach_tcp, read_frame, ConnEvent, DispatchTable, EventSender, Handler, NodeConn,
};
pub use error::{Error, Result};
pub use message::{
    decode_index, encode_frame, Frame, FrameLen, IndexCount, MessageType, NodeIndex, PeerAddress,
    VertexInfo, DELIM_EOF,
};
pub use pool::{NodeConnPool, Slot};
