//! Protocol layer: opcodes, typed mutation records, the flush envelope and
//! the channel lifecycle phase.

mod envelope;
mod opcode;
mod records;

pub use envelope::{Envelope, EnvelopeKind, NodeDescriptor, Phase, NODE_DESCRIPTOR_SIZE};
pub use opcode::Opcode;
pub use records::{
    Attribute, CallStatus, CharacterData, ChildList, EventSubscription, FunctionCall,
    FunctionResult, Mutation, ObjectCall, ObjectCreate, ObjectDelete, Property, Storage,
    StorageLocation, StorageOp,
};
