//! Typed mutation records and their positional value layouts.
//!
//! Each opcode defines a fixed or variable positional layout. Within one
//! record positions are opcode-specific and never reinterpreted;
//! `from_values` rejects any layout violation as a decode error.

use crate::codec::{NodeHandle, ObjectHandle, WireValue};
use crate::error::{Result, TreewireError};

use super::opcode::Opcode;

/// Structural change: splice children under `target`.
///
/// Added handles are inserted before `next_sibling` (appended when absent);
/// removed handles are detached from the target.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildList {
    pub target: NodeHandle,
    pub next_sibling: Option<NodeHandle>,
    pub previous_sibling: Option<NodeHandle>,
    pub added: Vec<NodeHandle>,
    pub removed: Vec<NodeHandle>,
}

/// Attribute change. `value: None` removes the attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub target: NodeHandle,
    pub name: String,
    /// `None` means the default namespace.
    pub namespace: Option<String>,
    pub value: Option<String>,
}

/// Text/data replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterData {
    pub target: NodeHandle,
    pub value: String,
}

/// Property set.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub target: NodeHandle,
    pub name: String,
    pub value: WireValue,
}

/// Event listener subscription change.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSubscription {
    pub target: NodeHandle,
    pub event_type: String,
    pub listener_index: u32,
    /// true = add, false = remove.
    pub subscribe: bool,
    pub capture: bool,
    pub once: bool,
    pub passive: bool,
    pub custom_prevent_default: bool,
}

/// Optimistic remote-object creation: the handle is already in use on the
/// producer side before this record is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectCreate {
    pub constructor: String,
    pub handle: ObjectHandle,
    pub args: Vec<WireValue>,
}

/// Fire-and-forget method invocation on a stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectCall {
    /// A remote reference, node reference or execution-context sentinel.
    pub target: WireValue,
    pub method: String,
    pub args: Vec<WireValue>,
}

/// Explicit retirement of a remote handle.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDelete {
    pub handle: ObjectHandle,
}

/// Storage operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Get = 0,
    Set = 1,
    Delete = 2,
}

/// Storage area selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageLocation {
    Local = 0,
    Session = 1,
}

/// Key/value storage mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Storage {
    pub op: StorageOp,
    pub location: StorageLocation,
    pub key: String,
    pub value: Option<String>,
}

/// Correlated cross-context function call.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub target: WireValue,
    pub name: String,
    pub correlation: u32,
    pub is_async: bool,
    /// When present, the executor stores the call's result object under
    /// this optimistically-issued handle.
    pub result_handle: Option<ObjectHandle>,
    pub args: Vec<WireValue>,
}

/// Completion status of a correlated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Resolve,
    Reject,
}

/// Correlated call result.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionResult {
    pub correlation: u32,
    pub status: CallStatus,
    pub value: WireValue,
}

/// A decoded mutation record of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    ChildList(ChildList),
    Attribute(Attribute),
    CharacterData(CharacterData),
    Property(Property),
    EventSubscription(EventSubscription),
    ObjectCreate(ObjectCreate),
    ObjectCall(ObjectCall),
    ObjectDelete(ObjectDelete),
    Storage(Storage),
    FunctionCall(FunctionCall),
    FunctionResult(FunctionResult),
}

fn node_or_zero(handle: Option<NodeHandle>) -> WireValue {
    WireValue::Node(handle.unwrap_or(NodeHandle(0)))
}

fn opt_string(value: &Option<String>) -> WireValue {
    match value {
        Some(s) => WireValue::String(s.clone()),
        None => WireValue::Absent,
    }
}

/// Positional reader over a decoded value list.
struct Reader<'a> {
    values: &'a [WireValue],
    pos: usize,
    opcode: Opcode,
}

impl<'a> Reader<'a> {
    fn next(&mut self) -> Result<&'a WireValue> {
        let value = self.values.get(self.pos).ok_or_else(|| {
            TreewireError::Decode(format!(
                "{:?} record too short at position {}",
                self.opcode, self.pos
            ))
        })?;
        self.pos += 1;
        Ok(value)
    }

    fn node(&mut self) -> Result<NodeHandle> {
        match self.next()? {
            WireValue::Node(h) => Ok(*h),
            other => self.mismatch("node handle", other),
        }
    }

    fn opt_node(&mut self) -> Result<Option<NodeHandle>> {
        let h = self.node()?;
        Ok(if h.0 == 0 { None } else { Some(h) })
    }

    fn remote(&mut self) -> Result<ObjectHandle> {
        match self.next()? {
            WireValue::Remote(h) => Ok(*h),
            other => self.mismatch("remote handle", other),
        }
    }

    fn uint(&mut self) -> Result<u32> {
        match self.next()? {
            WireValue::Int(v) if *v >= 0 && *v <= u32::MAX as i64 => Ok(*v as u32),
            other => self.mismatch("unsigned integer", other),
        }
    }

    fn boolean(&mut self) -> Result<bool> {
        match self.next()? {
            WireValue::Bool(b) => Ok(*b),
            other => self.mismatch("boolean", other),
        }
    }

    fn string(&mut self) -> Result<String> {
        match self.next()? {
            WireValue::String(s) => Ok(s.clone()),
            other => self.mismatch("string", other),
        }
    }

    fn opt_string(&mut self) -> Result<Option<String>> {
        match self.next()? {
            WireValue::String(s) => Ok(Some(s.clone())),
            WireValue::Absent => Ok(None),
            other => self.mismatch("string or absent", other),
        }
    }

    fn value(&mut self) -> Result<WireValue> {
        Ok(self.next()?.clone())
    }

    fn rest(&mut self, count: usize) -> Result<Vec<WireValue>> {
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            args.push(self.value()?);
        }
        Ok(args)
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.values.len() {
            return Err(TreewireError::Decode(format!(
                "{:?} record has {} trailing values",
                self.opcode,
                self.values.len() - self.pos
            )));
        }
        Ok(())
    }

    fn mismatch<T>(&self, expected: &str, found: &WireValue) -> Result<T> {
        Err(TreewireError::Decode(format!(
            "{:?} record: expected {} at position {}, found {}",
            self.opcode,
            expected,
            self.pos - 1,
            found.kind()
        )))
    }
}

impl Mutation {
    /// The opcode selecting this record's schema.
    pub fn opcode(&self) -> Opcode {
        match self {
            Mutation::ChildList(_) => Opcode::ChildList,
            Mutation::Attribute(_) => Opcode::Attribute,
            Mutation::CharacterData(_) => Opcode::CharacterData,
            Mutation::Property(_) => Opcode::Property,
            Mutation::EventSubscription(_) => Opcode::EventSubscription,
            Mutation::ObjectCreate(_) => Opcode::ObjectCreate,
            Mutation::ObjectCall(_) => Opcode::ObjectCall,
            Mutation::ObjectDelete(_) => Opcode::ObjectDelete,
            Mutation::Storage(_) => Opcode::Storage,
            Mutation::FunctionCall(_) => Opcode::FunctionCall,
            Mutation::FunctionResult(_) => Opcode::FunctionResult,
        }
    }

    /// Lower the record to its positional value list, opcode first.
    pub fn to_values(&self) -> Vec<WireValue> {
        let mut values = vec![WireValue::Int(self.opcode() as u8 as i64)];
        match self {
            Mutation::ChildList(r) => {
                values.push(WireValue::Node(r.target));
                values.push(node_or_zero(r.next_sibling));
                values.push(node_or_zero(r.previous_sibling));
                values.push(WireValue::Int(r.added.len() as i64));
                values.push(WireValue::Int(r.removed.len() as i64));
                values.extend(r.added.iter().map(|h| WireValue::Node(*h)));
                values.extend(r.removed.iter().map(|h| WireValue::Node(*h)));
            }
            Mutation::Attribute(r) => {
                values.push(WireValue::Node(r.target));
                values.push(WireValue::String(r.name.clone()));
                values.push(opt_string(&r.namespace));
                values.push(opt_string(&r.value));
            }
            Mutation::CharacterData(r) => {
                values.push(WireValue::Node(r.target));
                values.push(WireValue::String(r.value.clone()));
            }
            Mutation::Property(r) => {
                values.push(WireValue::Node(r.target));
                values.push(WireValue::String(r.name.clone()));
                values.push(r.value.clone());
            }
            Mutation::EventSubscription(r) => {
                values.push(WireValue::Node(r.target));
                values.push(WireValue::String(r.event_type.clone()));
                values.push(WireValue::Int(r.listener_index as i64));
                values.push(WireValue::Bool(r.subscribe));
                values.push(WireValue::Bool(r.capture));
                values.push(WireValue::Bool(r.once));
                values.push(WireValue::Bool(r.passive));
                values.push(WireValue::Bool(r.custom_prevent_default));
            }
            Mutation::ObjectCreate(r) => {
                values.push(WireValue::String(r.constructor.clone()));
                values.push(WireValue::Remote(r.handle));
                values.push(WireValue::Int(r.args.len() as i64));
                // The new handle repeats after the arg count so constructor
                // arguments may refer back to the object under construction.
                values.push(WireValue::Remote(r.handle));
                values.extend(r.args.iter().cloned());
            }
            Mutation::ObjectCall(r) => {
                values.push(WireValue::String(r.method.clone()));
                values.push(WireValue::Int(r.args.len() as i64));
                values.push(r.target.clone());
                values.extend(r.args.iter().cloned());
            }
            Mutation::ObjectDelete(r) => {
                values.push(WireValue::Remote(r.handle));
            }
            Mutation::Storage(r) => {
                values.push(WireValue::Int(r.op as u8 as i64));
                values.push(WireValue::Int(r.location as u8 as i64));
                values.push(WireValue::String(r.key.clone()));
                values.push(opt_string(&r.value));
            }
            Mutation::FunctionCall(r) => {
                values.push(r.target.clone());
                values.push(WireValue::String(r.name.clone()));
                values.push(WireValue::Int(r.correlation as i64));
                values.push(WireValue::Bool(r.is_async));
                values.push(match r.result_handle {
                    Some(h) => WireValue::Remote(h),
                    None => WireValue::Absent,
                });
                values.push(WireValue::Int(r.args.len() as i64));
                values.extend(r.args.iter().cloned());
            }
            Mutation::FunctionResult(r) => {
                values.push(WireValue::Int(r.correlation as i64));
                values.push(WireValue::Bool(r.status == CallStatus::Resolve));
                values.push(r.value.clone());
            }
        }
        values
    }

    /// Reconstruct a record from a decoded value list.
    pub fn from_values(values: &[WireValue]) -> Result<Self> {
        let code = match values.first() {
            Some(WireValue::Int(v)) if *v >= 0 && *v <= u8::MAX as i64 => *v as u8,
            Some(other) => {
                return Err(TreewireError::Decode(format!(
                    "record must begin with an opcode, found {}",
                    other.kind()
                )))
            }
            None => return Err(TreewireError::Decode("empty record".to_string())),
        };
        let opcode = Opcode::try_from(code)?;
        let mut r = Reader {
            values,
            pos: 1,
            opcode,
        };

        let mutation = match opcode {
            Opcode::ChildList => {
                let target = r.node()?;
                let next_sibling = r.opt_node()?;
                let previous_sibling = r.opt_node()?;
                let added_count = r.uint()? as usize;
                let removed_count = r.uint()? as usize;
                let mut added = Vec::with_capacity(added_count);
                for _ in 0..added_count {
                    added.push(r.node()?);
                }
                let mut removed = Vec::with_capacity(removed_count);
                for _ in 0..removed_count {
                    removed.push(r.node()?);
                }
                Mutation::ChildList(ChildList {
                    target,
                    next_sibling,
                    previous_sibling,
                    added,
                    removed,
                })
            }
            Opcode::Attribute => Mutation::Attribute(Attribute {
                target: r.node()?,
                name: r.string()?,
                namespace: r.opt_string()?,
                value: r.opt_string()?,
            }),
            Opcode::CharacterData => Mutation::CharacterData(CharacterData {
                target: r.node()?,
                value: r.string()?,
            }),
            Opcode::Property => Mutation::Property(Property {
                target: r.node()?,
                name: r.string()?,
                value: r.value()?,
            }),
            Opcode::EventSubscription => Mutation::EventSubscription(EventSubscription {
                target: r.node()?,
                event_type: r.string()?,
                listener_index: r.uint()?,
                subscribe: r.boolean()?,
                capture: r.boolean()?,
                once: r.boolean()?,
                passive: r.boolean()?,
                custom_prevent_default: r.boolean()?,
            }),
            Opcode::ObjectCreate => {
                let constructor = r.string()?;
                let handle = r.remote()?;
                let argc = r.uint()? as usize;
                let self_reference = r.remote()?;
                if self_reference != handle {
                    return Err(TreewireError::Decode(format!(
                        "object creation self-reference {} does not match handle {}",
                        self_reference.0, handle.0
                    )));
                }
                let args = r.rest(argc)?;
                Mutation::ObjectCreate(ObjectCreate {
                    constructor,
                    handle,
                    args,
                })
            }
            Opcode::ObjectCall => {
                let method = r.string()?;
                let argc = r.uint()? as usize;
                let target = r.value()?;
                let args = r.rest(argc)?;
                Mutation::ObjectCall(ObjectCall {
                    target,
                    method,
                    args,
                })
            }
            Opcode::ObjectDelete => Mutation::ObjectDelete(ObjectDelete {
                handle: r.remote()?,
            }),
            Opcode::Storage => {
                let op = match r.uint()? {
                    0 => StorageOp::Get,
                    1 => StorageOp::Set,
                    2 => StorageOp::Delete,
                    other => {
                        return Err(TreewireError::Decode(format!(
                            "unknown storage operation {}",
                            other
                        )))
                    }
                };
                let location = match r.uint()? {
                    0 => StorageLocation::Local,
                    1 => StorageLocation::Session,
                    other => {
                        return Err(TreewireError::Decode(format!(
                            "unknown storage location {}",
                            other
                        )))
                    }
                };
                Mutation::Storage(Storage {
                    op,
                    location,
                    key: r.string()?,
                    value: r.opt_string()?,
                })
            }
            Opcode::FunctionCall => {
                let target = r.value()?;
                let name = r.string()?;
                let correlation = r.uint()?;
                let is_async = r.boolean()?;
                let result_handle = match r.next()? {
                    WireValue::Remote(h) => Some(*h),
                    WireValue::Absent => None,
                    other => return r.mismatch("remote handle or absent", other),
                };
                let argc = r.uint()? as usize;
                let args = r.rest(argc)?;
                Mutation::FunctionCall(FunctionCall {
                    target,
                    name,
                    correlation,
                    is_async,
                    result_handle,
                    args,
                })
            }
            Opcode::FunctionResult => Mutation::FunctionResult(FunctionResult {
                correlation: r.uint()?,
                status: if r.boolean()? {
                    CallStatus::Resolve
                } else {
                    CallStatus::Reject
                },
                value: r.value()?,
            }),
        };

        r.finish()?;
        Ok(mutation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(mutation: Mutation) {
        let values = mutation.to_values();
        let decoded = Mutation::from_values(&values).unwrap();
        assert_eq!(decoded, mutation);
    }

    #[test]
    fn test_child_list_roundtrip() {
        roundtrip(Mutation::ChildList(ChildList {
            target: NodeHandle(1),
            next_sibling: Some(NodeHandle(5)),
            previous_sibling: None,
            added: vec![NodeHandle(2), NodeHandle(3)],
            removed: vec![NodeHandle(4)],
        }));
    }

    #[test]
    fn test_child_list_no_siblings_decodes_to_none() {
        let values = Mutation::ChildList(ChildList {
            target: NodeHandle(1),
            next_sibling: None,
            previous_sibling: None,
            added: vec![NodeHandle(9)],
            removed: vec![],
        })
        .to_values();

        // Absent siblings travel as handle 0.
        assert_eq!(values[2], WireValue::Node(NodeHandle(0)));
        assert_eq!(values[3], WireValue::Node(NodeHandle(0)));

        match Mutation::from_values(&values).unwrap() {
            Mutation::ChildList(r) => {
                assert_eq!(r.next_sibling, None);
                assert_eq!(r.previous_sibling, None);
                assert_eq!(r.added, vec![NodeHandle(9)]);
                assert!(r.removed.is_empty());
            }
            other => panic!("wrong record: {:?}", other),
        }
    }

    #[test]
    fn test_attribute_removal_roundtrip() {
        roundtrip(Mutation::Attribute(Attribute {
            target: NodeHandle(2),
            name: "class".to_string(),
            namespace: None,
            value: None,
        }));
        roundtrip(Mutation::Attribute(Attribute {
            target: NodeHandle(2),
            name: "href".to_string(),
            namespace: Some("xlink".to_string()),
            value: Some("#anchor".to_string()),
        }));
    }

    #[test]
    fn test_remaining_records_roundtrip() {
        roundtrip(Mutation::CharacterData(CharacterData {
            target: NodeHandle(3),
            value: "hello".to_string(),
        }));
        roundtrip(Mutation::Property(Property {
            target: NodeHandle(3),
            name: "checked".to_string(),
            value: WireValue::Bool(true),
        }));
        roundtrip(Mutation::EventSubscription(EventSubscription {
            target: NodeHandle(3),
            event_type: "click".to_string(),
            listener_index: 2,
            subscribe: true,
            capture: false,
            once: true,
            passive: false,
            custom_prevent_default: false,
        }));
        roundtrip(Mutation::ObjectCreate(ObjectCreate {
            constructor: "AudioNode".to_string(),
            handle: ObjectHandle(11),
            args: vec![WireValue::Int(440), WireValue::String("sine".to_string())],
        }));
        roundtrip(Mutation::ObjectCall(ObjectCall {
            target: WireValue::Remote(ObjectHandle(11)),
            method: "start".to_string(),
            args: vec![],
        }));
        roundtrip(Mutation::ObjectDelete(ObjectDelete {
            handle: ObjectHandle(11),
        }));
        roundtrip(Mutation::Storage(Storage {
            op: StorageOp::Set,
            location: StorageLocation::Local,
            key: "theme".to_string(),
            value: Some("dark".to_string()),
        }));
        roundtrip(Mutation::FunctionCall(FunctionCall {
            target: WireValue::ExecutionContext,
            name: "fetchTitle".to_string(),
            correlation: 7,
            is_async: true,
            result_handle: None,
            args: vec![WireValue::Array(vec![WireValue::Int(1)])],
        }));
        roundtrip(Mutation::FunctionResult(FunctionResult {
            correlation: 7,
            status: CallStatus::Reject,
            value: WireValue::String("boom".to_string()),
        }));
    }

    #[test]
    fn test_object_create_carries_self_reference() {
        let record = Mutation::ObjectCreate(ObjectCreate {
            constructor: "Gain".to_string(),
            handle: ObjectHandle(21),
            args: vec![WireValue::Float(0.5)],
        });
        let values = record.to_values();
        // The handle repeats after the arg count so args can refer back to
        // the object under construction.
        assert_eq!(values[2], WireValue::Remote(ObjectHandle(21)));
        assert_eq!(values[4], WireValue::Remote(ObjectHandle(21)));
        assert_eq!(Mutation::from_values(&values).unwrap(), record);

        let mut tampered = record.to_values();
        tampered[4] = WireValue::Remote(ObjectHandle(99));
        assert!(matches!(
            Mutation::from_values(&tampered),
            Err(TreewireError::Decode(_))
        ));
    }

    #[test]
    fn test_malformed_record_is_decode_error() {
        // Opcode says Attribute but the target is an integer.
        let values = vec![
            WireValue::Int(Opcode::Attribute as u8 as i64),
            WireValue::Int(5),
        ];
        assert!(matches!(
            Mutation::from_values(&values),
            Err(TreewireError::Decode(_))
        ));
    }

    #[test]
    fn test_trailing_values_rejected() {
        let mut values = Mutation::ObjectDelete(ObjectDelete {
            handle: ObjectHandle(1),
        })
        .to_values();
        values.push(WireValue::Null);
        assert!(matches!(
            Mutation::from_values(&values),
            Err(TreewireError::Decode(_))
        ));
    }

    #[test]
    fn test_empty_record_rejected() {
        assert!(matches!(
            Mutation::from_values(&[]),
            Err(TreewireError::Decode(_))
        ));
    }
}
