//! Message catalog and payload codecs.
//!
//! Every frame is a one-byte tag followed by a payload whose length is fixed
//! per message type, except [`MessageType::Subgraph`] whose payload runs
//! until [`DELIM_EOF`]. [`MessageType::Cont`] is never written as a tag: a
//! write of type `Cont` appends raw bytes to the stream, so a large or
//! pre-encoded payload can be split across several writes.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::{Error, Result};

/// One-byte node index (0 is the server).
pub type NodeIndex = u8;

/// Terminates a variable-length payload.
pub const DELIM_EOF: u8 = 0;

/// Message tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Worker tells the server it finished the handshake.
    Ack = 0,
    /// A boundary vertex owned by the sender changed color.
    VertexInfo = 1,
    /// Sender has no more vertices to recolor.
    NodeFinished = 2,
    /// Sender completed its local coloring pass for the current round.
    NodeRoundFinished = 3,
    /// Server assigns a worker its index and the node count.
    NodeIndexCount = 4,
    /// Address of a higher-indexed worker to dial.
    NodeAddress = 5,
    /// A dialing worker announces its index.
    DialerIndex = 6,
    /// Text-format subgraph, delimiter-terminated.
    Subgraph = 7,
    /// Server starts the coloring rounds.
    BeginColoring = 8,
    /// Continuation of the previous write; no tag on the wire.
    Cont = 255,
}

/// How many payload bytes follow a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLen {
    Fixed(usize),
    Delimited,
}

impl MessageType {
    /// Decode a tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Ack,
            1 => Self::VertexInfo,
            2 => Self::NodeFinished,
            3 => Self::NodeRoundFinished,
            4 => Self::NodeIndexCount,
            5 => Self::NodeAddress,
            6 => Self::DialerIndex,
            7 => Self::Subgraph,
            8 => Self::BeginColoring,
            255 => Self::Cont,
            _ => return None,
        })
    }

    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Payload length table. `Cont` has no entry: it never starts a frame.
    pub const fn frame_len(self) -> Option<FrameLen> {
        match self {
            Self::Ack => Some(FrameLen::Fixed(1)),
            Self::VertexInfo => Some(FrameLen::Fixed(VertexInfo::LEN)),
            Self::NodeFinished => Some(FrameLen::Fixed(1)),
            Self::NodeRoundFinished => Some(FrameLen::Fixed(1)),
            Self::NodeIndexCount => Some(FrameLen::Fixed(IndexCount::LEN)),
            Self::NodeAddress => Some(FrameLen::Fixed(PeerAddress::LEN)),
            Self::DialerIndex => Some(FrameLen::Fixed(1)),
            Self::Subgraph => Some(FrameLen::Delimited),
            Self::BeginColoring => Some(FrameLen::Fixed(0)),
            Self::Cont => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Ack => "ACK",
            Self::VertexInfo => "VERTEX_INFO",
            Self::NodeFinished => "NODE_FINISHED",
            Self::NodeRoundFinished => "NODE_ROUND_FINISHED",
            Self::NodeIndexCount => "NODE_INDEX_COUNT",
            Self::NodeAddress => "NODE_ADDRESS",
            Self::DialerIndex => "DIALER_INDEX",
            Self::Subgraph => "SUBGRAPH",
            Self::BeginColoring => "BEGIN_COLORING",
            Self::Cont => "CONT",
        }
    }

    /// Check a payload against the framing table before it is written.
    pub fn validate(self, payload: &[u8]) -> Result<()> {
        match self.frame_len() {
            Some(FrameLen::Fixed(expected)) if payload.len() != expected => {
                Err(Error::PayloadLength {
                    message: self.name(),
                    expected,
                    actual: payload.len(),
                })
            }
            Some(FrameLen::Delimited) if payload.contains(&DELIM_EOF) => {
                Err(Error::EmbeddedDelimiter(self.name()))
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageType,
    pub payload: Vec<u8>,
}

/// Append a complete tagged frame to `out` (delimiter included for
/// variable-length types).
pub fn encode_frame(kind: MessageType, payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
    kind.validate(payload)?;
    if kind != MessageType::Cont {
        out.push(kind.tag());
    }
    out.extend_from_slice(payload);
    if kind.frame_len() == Some(FrameLen::Delimited) {
        out.push(DELIM_EOF);
    }
    Ok(())
}

fn check_len(payload: &[u8], expected: usize, message: &'static str) -> Result<()> {
    if payload.len() < expected {
        return Err(Error::Truncated { context: message });
    }
    Ok(())
}

/// `VERTEX_INFO`: 4-byte LE color, 4-byte LE global vertex index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexInfo {
    pub color: u32,
    pub vertex: u32,
}

impl VertexInfo {
    pub const LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[..4].copy_from_slice(&self.color.to_le_bytes());
        buf[4..].copy_from_slice(&self.vertex.to_le_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(payload, Self::LEN, "VERTEX_INFO payload")?;
        Ok(Self {
            color: u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            vertex: u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
        })
    }

    /// Append this update as a tagged frame.
    pub fn append_frame(&self, out: &mut Vec<u8>) {
        out.push(MessageType::VertexInfo.tag());
        out.extend_from_slice(&self.encode());
    }
}

/// `NODE_INDEX_COUNT`: assigned index, total node count including the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexCount {
    pub index: NodeIndex,
    pub count: u8,
}

impl IndexCount {
    pub const LEN: usize = 2;

    pub fn encode(&self) -> [u8; Self::LEN] {
        [self.index, self.count]
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(payload, Self::LEN, "NODE_INDEX_COUNT payload")?;
        Ok(Self {
            index: payload[0],
            count: payload[1],
        })
    }
}

/// `NODE_ADDRESS`: peer index, IPv4 address, LE port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddress {
    pub index: NodeIndex,
    pub addr: SocketAddrV4,
}

impl PeerAddress {
    pub const LEN: usize = 7;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0] = self.index;
        buf[1..5].copy_from_slice(&self.addr.ip().octets());
        buf[5..].copy_from_slice(&self.addr.port().to_le_bytes());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        check_len(payload, Self::LEN, "NODE_ADDRESS payload")?;
        let ip = Ipv4Addr::new(payload[1], payload[2], payload[3], payload[4]);
        let port = u16::from_le_bytes([payload[5], payload[6]]);
        Ok(Self {
            index: payload[0],
            addr: SocketAddrV4::new(ip, port),
        })
    }
}

/// Decode a single-byte node index payload.
pub fn decode_index(payload: &[u8]) -> Result<NodeIndex> {
    payload.first().copied().ok_or(Error::Truncated {
        context: "node index payload",
    })
}
