//! The flush envelope and channel lifecycle phase.
//!
//! One envelope is sent per flush. It carries the packed node-creation
//! descriptors, the cumulative string table snapshot, and one buffer per
//! recorded mutation, in record order.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::NodeHandle;
use crate::error::{Result, TreewireError};

/// Global lifecycle stage of the channel. Transitions are one-directional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// No mutation transfer occurs yet.
    Initializing,
    /// Hydration finished; the next flush is the hydration envelope.
    Hydrating,
    /// Steady state.
    Mutating,
}

impl Phase {
    /// Advance to the next stage. Advancing past `Mutating` is a no-op.
    pub fn advance(self) -> Phase {
        match self {
            Phase::Initializing => Phase::Hydrating,
            Phase::Hydrating | Phase::Mutating => Phase::Mutating,
        }
    }
}

/// Which kind of flush an envelope represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// First flush after hydration completed.
    Hydrate,
    /// Every subsequent flush.
    Mutate,
}

/// Byte size of one packed node descriptor.
pub const NODE_DESCRIPTOR_SIZE: usize = 12;

/// Fixed-width descriptor for a newly created mirrored node.
///
/// `name`, `namespace` and `text` are string-table indices; the packed form
/// is 12 bytes Big Endian: handle u32, kind u16, name u16, namespace u16,
/// text u16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub handle: NodeHandle,
    pub kind: u16,
    pub name: u16,
    pub namespace: u16,
    pub text: u16,
}

impl NodeDescriptor {
    /// Pack a batch of descriptors into one contiguous buffer.
    pub fn pack(descriptors: &[NodeDescriptor]) -> Bytes {
        let mut buf = BytesMut::with_capacity(descriptors.len() * NODE_DESCRIPTOR_SIZE);
        for d in descriptors {
            buf.put_u32(d.handle.0);
            buf.put_u16(d.kind);
            buf.put_u16(d.name);
            buf.put_u16(d.namespace);
            buf.put_u16(d.text);
        }
        buf.freeze()
    }

    /// Unpack a contiguous descriptor buffer.
    pub fn unpack(buf: &[u8]) -> Result<Vec<NodeDescriptor>> {
        if buf.len() % NODE_DESCRIPTOR_SIZE != 0 {
            return Err(TreewireError::Decode(format!(
                "node descriptor buffer length {} is not a multiple of {}",
                buf.len(),
                NODE_DESCRIPTOR_SIZE
            )));
        }
        Ok(buf
            .chunks_exact(NODE_DESCRIPTOR_SIZE)
            .map(|c| NodeDescriptor {
                handle: NodeHandle(u32::from_be_bytes([c[0], c[1], c[2], c[3]])),
                kind: u16::from_be_bytes([c[4], c[5]]),
                name: u16::from_be_bytes([c[6], c[7]]),
                namespace: u16::from_be_bytes([c[8], c[9]]),
                text: u16::from_be_bytes([c[10], c[11]]),
            })
            .collect())
    }
}

/// The unit transferred over the channel, one per flush.
///
/// Buffer ownership moves with the envelope; nothing is copied on send.
#[derive(Debug)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    /// Packed fixed-width node descriptors created since the last flush.
    pub node_creations: Bytes,
    /// Full cumulative string table snapshot.
    pub strings: Vec<String>,
    /// One encoded buffer per recorded mutation, in record order.
    pub mutations: Vec<Bytes>,
}
