//! Cross-context tree mutation replication.
//!
//! One side (the producer) owns application logic and a mirrored view of a
//! tree it cannot touch directly; the other side (the executor) owns the
//! real tree and applies batched mutation envelopes against it. The two
//! sides talk over a binary wire codec with a cumulative string table,
//! reference handles issued optimistically by the producer, and a
//! correlator for bidirectional function calls.
//!
//! # Layout
//!
//! - [`codec`]: tagged binary value codec, string interning, decode guard
//! - [`protocol`]: opcodes, typed mutation records, the flush envelope
//! - [`channel`]: in-process envelope transport
//! - [`registry`]: handle issuance and the executor's object store
//! - [`batch`]: per-turn mutation batching and flush scheduling
//! - [`rpc`]: call correlation, exports, timeouts
//! - [`executor`]: live state and command application
//! - [`producer`]: the recording side's public surface
//!
//! # Example
//!
//! ```no_run
//! use treewire::{BatcherConfig, ExecutorContext, ProducerContext};
//!
//! # async fn demo() -> treewire::Result<()> {
//! let (producer_end, executor_end) = treewire::duplex();
//! let executor = ExecutorContext::new(executor_end.tx);
//! tokio::spawn(executor.run(executor_end.rx));
//!
//! let mut producer = ProducerContext::new(producer_end.tx, BatcherConfig::default());
//! producer.begin_hydration();
//! let body = producer.create_node(1, "body", None, None)?;
//! producer.set_attribute(body, "class", None, Some("app"))?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod channel;
pub mod codec;
pub mod error;
pub mod executor;
pub mod producer;
pub mod protocol;
pub mod registry;
pub mod rpc;

pub use batch::{BatcherConfig, MutationBatcher, NO_STRING_INDEX};
pub use channel::{channel, duplex, ChannelReceiver, ChannelSender, Endpoint};
pub use codec::{
    decode, encode, estimate_size, AsWireReference, DecodeConfig, NodeHandle, ObjectHandle,
    StringCache, StringTable, WireValue,
};
pub use error::{Result, TreewireError};
pub use executor::{ExecutionState, ExecutorContext};
pub use producer::ProducerContext;
pub use protocol::{Envelope, EnvelopeKind, Mutation, Opcode, Phase};
pub use registry::{HandleIssuer, ObjectStore, RemoteTarget};
pub use rpc::{CallCorrelator, RemoteCallResult};
