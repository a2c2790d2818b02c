//! Mutation opcodes.
//!
//! The opcode is the first value of every mutation record and selects the
//! record's positional schema. Codes are stable across versions; an unknown
//! code is a fatal decode error, never a silent skip.

use crate::error::{Result, TreewireError};

/// Small-integer opcode identifying a mutation record's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Structural change: splice child handles under a target.
    ChildList = 0,
    /// Attribute set/removal with optional namespace.
    Attribute = 1,
    /// Text/data replacement on a node.
    CharacterData = 2,
    /// Property set on a node.
    Property = 3,
    /// Event listener subscription change.
    EventSubscription = 4,
    /// Optimistic remote-object creation.
    ObjectCreate = 5,
    /// Method invocation on a stored remote object (fire-and-forget).
    ObjectCall = 6,
    /// Explicit retirement of a remote handle.
    ObjectDelete = 7,
    /// Key/value storage operation.
    Storage = 8,
    /// Correlated cross-context function call.
    FunctionCall = 9,
    /// Correlated call result (resolve or reject).
    FunctionResult = 10,
}

impl TryFrom<u8> for Opcode {
    type Error = TreewireError;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Opcode::ChildList,
            1 => Opcode::Attribute,
            2 => Opcode::CharacterData,
            3 => Opcode::Property,
            4 => Opcode::EventSubscription,
            5 => Opcode::ObjectCreate,
            6 => Opcode::ObjectCall,
            7 => Opcode::ObjectDelete,
            8 => Opcode::Storage,
            9 => Opcode::FunctionCall,
            10 => Opcode::FunctionResult,
            unknown => {
                return Err(TreewireError::Decode(format!("unknown opcode {}", unknown)))
            }
        })
    }
}
