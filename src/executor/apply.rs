//! Command application against the executor's live state.
//!
//! Each record kind that mutates local state has one applier here. A
//! `ReferenceNotFound` from an applier is recoverable: the caller logs it
//! and moves on to the next record in the envelope.

use std::collections::HashMap;

use crate::codec::StringCache;
use crate::error::{Result, TreewireError};
use crate::protocol::{
    Attribute, CharacterData, ChildList, EventSubscription, Mutation, ObjectCall, ObjectCreate,
    ObjectDelete, Property, Storage, StorageLocation, StorageOp,
};
use crate::registry::{ObjectStore, RemoteTarget};

use super::tree::{ListenerRegistration, Tree};

/// Factory for one constructible remote class.
///
/// Returns the live object on success, or a message describing why
/// construction failed; failure poisons the handle the producer already
/// issued optimistically.
pub type Constructor =
    Box<dyn Fn(&[crate::codec::WireValue]) -> std::result::Result<Box<dyn RemoteTarget>, String> + Send>;

/// One key/value storage area.
#[derive(Debug, Default)]
pub struct StorageArea {
    entries: HashMap<String, String>,
}

impl StorageArea {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    pub fn set(&mut self, key: String, value: String) {
        self.entries.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything the executor mutates while applying envelopes.
pub struct ExecutionState {
    pub tree: Tree,
    pub objects: ObjectStore,
    pub strings: StringCache,
    pub local_storage: StorageArea,
    pub session_storage: StorageArea,
    constructors: HashMap<String, Constructor>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            tree: Tree::new(),
            objects: ObjectStore::new(),
            strings: StringCache::new(),
            local_storage: StorageArea::default(),
            session_storage: StorageArea::default(),
            constructors: HashMap::new(),
        }
    }

    /// Register a constructor the producer may instantiate by name.
    pub fn register_constructor(&mut self, name: impl Into<String>, ctor: Constructor) {
        self.constructors.insert(name.into(), ctor);
    }

    pub fn storage(&self, location: StorageLocation) -> &StorageArea {
        match location {
            StorageLocation::Local => &self.local_storage,
            StorageLocation::Session => &self.session_storage,
        }
    }

    pub fn storage_mut(&mut self, location: StorageLocation) -> &mut StorageArea {
        match location {
            StorageLocation::Local => &mut self.local_storage,
            StorageLocation::Session => &mut self.session_storage,
        }
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply one state-mutating record.
///
/// `FunctionCall`, `FunctionResult` and storage reads touch the reply path
/// and are routed by the context instead.
pub fn apply_mutation(state: &mut ExecutionState, mutation: &Mutation) -> Result<()> {
    match mutation {
        Mutation::ChildList(m) => apply_child_list(state, m),
        Mutation::Attribute(m) => apply_attribute(state, m),
        Mutation::CharacterData(m) => apply_character_data(state, m),
        Mutation::Property(m) => apply_property(state, m),
        Mutation::EventSubscription(m) => apply_event_subscription(state, m),
        Mutation::ObjectCreate(m) => apply_object_create(state, m),
        Mutation::ObjectCall(m) => apply_object_call(state, m),
        Mutation::ObjectDelete(m) => apply_object_delete(state, m),
        Mutation::Storage(m) => apply_storage(state, m),
        Mutation::FunctionCall(_) | Mutation::FunctionResult(_) => Err(TreewireError::Protocol(
            format!("{:?} is not applied against local state", mutation.opcode()),
        )),
    }
}

fn apply_child_list(state: &mut ExecutionState, m: &ChildList) -> Result<()> {
    state
        .tree
        .splice_children(m.target, &m.added, m.next_sibling, &m.removed)
}

fn apply_attribute(state: &mut ExecutionState, m: &Attribute) -> Result<()> {
    let node = state.tree.get_mut(m.target)?;
    let key = (m.name.clone(), m.namespace.clone());
    match &m.value {
        Some(value) => {
            node.attributes.insert(key, value.clone());
        }
        None => {
            node.attributes.remove(&key);
        }
    }
    Ok(())
}

fn apply_character_data(state: &mut ExecutionState, m: &CharacterData) -> Result<()> {
    state.tree.get_mut(m.target)?.text = m.value.clone();
    Ok(())
}

fn apply_property(state: &mut ExecutionState, m: &Property) -> Result<()> {
    state
        .tree
        .get_mut(m.target)?
        .properties
        .insert(m.name.clone(), m.value.clone());
    Ok(())
}

fn apply_event_subscription(state: &mut ExecutionState, m: &EventSubscription) -> Result<()> {
    let node = state.tree.get_mut(m.target)?;
    if m.subscribe {
        node.listeners.push(ListenerRegistration {
            event_type: m.event_type.clone(),
            listener_index: m.listener_index,
            capture: m.capture,
            once: m.once,
            passive: m.passive,
            custom_prevent_default: m.custom_prevent_default,
        });
    } else {
        node.listeners
            .retain(|l| !(l.event_type == m.event_type && l.listener_index == m.listener_index));
    }
    Ok(())
}

fn apply_object_create(state: &mut ExecutionState, m: &ObjectCreate) -> Result<()> {
    match state.constructors.get(&m.constructor) {
        Some(ctor) => match ctor(&m.args) {
            Ok(target) => {
                state.objects.store(m.handle, target);
            }
            Err(reason) => {
                tracing::warn!(
                    constructor = %m.constructor,
                    handle = m.handle.0,
                    %reason,
                    "constructor failed, handle poisoned"
                );
                state.objects.poison(m.handle, &m.constructor);
            }
        },
        None => {
            tracing::warn!(
                constructor = %m.constructor,
                handle = m.handle.0,
                "unknown constructor, handle poisoned"
            );
            state.objects.poison(m.handle, &m.constructor);
        }
    }
    Ok(())
}

fn apply_object_call(state: &mut ExecutionState, m: &ObjectCall) -> Result<()> {
    use crate::codec::WireValue;
    let handle = match &m.target {
        WireValue::Remote(h) => *h,
        other => {
            return Err(TreewireError::Protocol(format!(
                "fire-and-forget call against {} target",
                other.kind()
            )))
        }
    };
    let object = state.objects.get_mut(handle)?;
    if let Err(reason) = object.invoke(&m.method, &m.args) {
        // Fire-and-forget: nothing to deliver the failure to.
        tracing::warn!(handle = handle.0, method = %m.method, %reason, "object call failed");
    }
    Ok(())
}

fn apply_object_delete(state: &mut ExecutionState, m: &ObjectDelete) -> Result<()> {
    // Deleting twice is a no-op.
    state.objects.delete(m.handle);
    Ok(())
}

fn apply_storage(state: &mut ExecutionState, m: &Storage) -> Result<()> {
    let area = state.storage_mut(m.location);
    match m.op {
        StorageOp::Set => {
            if let Some(value) = &m.value {
                area.set(m.key.clone(), value.clone());
            }
            Ok(())
        }
        StorageOp::Delete => {
            area.remove(&m.key);
            Ok(())
        }
        StorageOp::Get => Err(TreewireError::Protocol(
            "storage reads are answered by the context".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{NodeHandle, ObjectHandle, WireValue};

    struct Counter {
        count: i64,
    }

    impl RemoteTarget for Counter {
        fn invoke(
            &mut self,
            method: &str,
            _args: &[WireValue],
        ) -> std::result::Result<WireValue, String> {
            match method {
                "increment" => {
                    self.count += 1;
                    Ok(WireValue::Int(self.count))
                }
                other => Err(format!("no such method: {other}")),
            }
        }
    }

    fn state_with_node(handle: u32) -> ExecutionState {
        let mut state = ExecutionState::new();
        state
            .tree
            .create_node(NodeHandle(handle), 1, "div".to_string(), None, String::new());
        state
    }

    #[test]
    fn test_attribute_set_and_remove() {
        let mut state = state_with_node(1);
        apply_mutation(
            &mut state,
            &Mutation::Attribute(Attribute {
                target: NodeHandle(1),
                name: "class".to_string(),
                namespace: None,
                value: Some("big".to_string()),
            }),
        )
        .unwrap();
        assert_eq!(
            state.tree.get(NodeHandle(1)).unwrap().attribute("class", None),
            Some("big")
        );

        apply_mutation(
            &mut state,
            &Mutation::Attribute(Attribute {
                target: NodeHandle(1),
                name: "class".to_string(),
                namespace: None,
                value: None,
            }),
        )
        .unwrap();
        assert_eq!(
            state.tree.get(NodeHandle(1)).unwrap().attribute("class", None),
            None
        );
    }

    #[test]
    fn test_character_data_replaces_text() {
        let mut state = state_with_node(1);
        apply_mutation(
            &mut state,
            &Mutation::CharacterData(CharacterData {
                target: NodeHandle(1),
                value: "hello".to_string(),
            }),
        )
        .unwrap();
        assert_eq!(state.tree.get(NodeHandle(1)).unwrap().text, "hello");
    }

    #[test]
    fn test_event_subscription_add_and_remove() {
        let mut state = state_with_node(1);
        let subscribe = EventSubscription {
            target: NodeHandle(1),
            event_type: "click".to_string(),
            listener_index: 7,
            subscribe: true,
            capture: false,
            once: false,
            passive: true,
            custom_prevent_default: false,
        };
        apply_mutation(&mut state, &Mutation::EventSubscription(subscribe.clone())).unwrap();
        assert_eq!(state.tree.get(NodeHandle(1)).unwrap().listeners.len(), 1);

        let unsubscribe = EventSubscription {
            subscribe: false,
            ..subscribe
        };
        apply_mutation(&mut state, &Mutation::EventSubscription(unsubscribe)).unwrap();
        assert!(state.tree.get(NodeHandle(1)).unwrap().listeners.is_empty());
    }

    #[test]
    fn test_object_create_and_call() {
        let mut state = ExecutionState::new();
        state.register_constructor("Counter", Box::new(|_args| Ok(Box::new(Counter { count: 0 }) as Box<dyn RemoteTarget>)));

        apply_mutation(
            &mut state,
            &Mutation::ObjectCreate(ObjectCreate {
                constructor: "Counter".to_string(),
                handle: ObjectHandle(1),
                args: vec![],
            }),
        )
        .unwrap();
        apply_mutation(
            &mut state,
            &Mutation::ObjectCall(ObjectCall {
                target: WireValue::Remote(ObjectHandle(1)),
                method: "increment".to_string(),
                args: vec![],
            }),
        )
        .unwrap();
        assert!(state.objects.contains(ObjectHandle(1)));
    }

    #[test]
    fn test_unknown_constructor_poisons_handle() {
        let mut state = ExecutionState::new();
        apply_mutation(
            &mut state,
            &Mutation::ObjectCreate(ObjectCreate {
                constructor: "Nope".to_string(),
                handle: ObjectHandle(9),
                args: vec![],
            }),
        )
        .unwrap();

        let err = apply_mutation(
            &mut state,
            &Mutation::ObjectCall(ObjectCall {
                target: WireValue::Remote(ObjectHandle(9)),
                method: "anything".to_string(),
                args: vec![],
            }),
        )
        .unwrap_err();
        match err {
            TreewireError::ReferenceNotFound(msg) => assert!(msg.contains("Nope")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_double_delete_is_noop() {
        let mut state = ExecutionState::new();
        state.register_constructor("Counter", Box::new(|_args| Ok(Box::new(Counter { count: 0 }) as Box<dyn RemoteTarget>)));
        apply_mutation(
            &mut state,
            &Mutation::ObjectCreate(ObjectCreate {
                constructor: "Counter".to_string(),
                handle: ObjectHandle(1),
                args: vec![],
            }),
        )
        .unwrap();

        let delete = Mutation::ObjectDelete(ObjectDelete {
            handle: ObjectHandle(1),
        });
        apply_mutation(&mut state, &delete).unwrap();
        apply_mutation(&mut state, &delete).unwrap();
        assert!(!state.objects.contains(ObjectHandle(1)));
    }

    #[test]
    fn test_storage_set_and_delete() {
        let mut state = ExecutionState::new();
        apply_mutation(
            &mut state,
            &Mutation::Storage(Storage {
                op: StorageOp::Set,
                location: StorageLocation::Local,
                key: "theme".to_string(),
                value: Some("dark".to_string()),
            }),
        )
        .unwrap();
        assert_eq!(state.local_storage.get("theme"), Some("dark"));
        assert_eq!(state.session_storage.get("theme"), None);

        apply_mutation(
            &mut state,
            &Mutation::Storage(Storage {
                op: StorageOp::Delete,
                location: StorageLocation::Local,
                key: "theme".to_string(),
                value: None,
            }),
        )
        .unwrap();
        assert!(state.local_storage.is_empty());
    }
}
