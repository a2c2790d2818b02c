//! The producer context: issues handles optimistically, records mutations
//! into the batcher and correlates calls toward the executor.

use std::time::Duration;

use crate::batch::{BatcherConfig, MutationBatcher};
use crate::channel::ChannelSender;
use crate::codec::{decode, DecodeConfig, NodeHandle, ObjectHandle, StringCache, WireValue};
use crate::error::Result;
use crate::protocol::{
    Attribute, CharacterData, ChildList, Envelope, EventSubscription, Mutation, ObjectCall,
    ObjectCreate, ObjectDelete, Phase, Property, Storage, StorageLocation, StorageOp,
};
use crate::registry::HandleIssuer;
use crate::rpc::{CallCorrelator, ExportedFn, RemoteCallResult};

/// The producer side of one channel.
///
/// Handle issuance is optimistic: `create_node` and `create_remote_object`
/// return a usable handle immediately, before the executor has seen the
/// creation record.
pub struct ProducerContext {
    batcher: MutationBatcher,
    correlator: CallCorrelator,
    node_issuer: HandleIssuer,
    object_issuer: HandleIssuer,
    strings_in: StringCache,
    decode_config: DecodeConfig,
}

impl ProducerContext {
    /// Create a producer context sending envelopes through `tx`.
    pub fn new(tx: ChannelSender, config: BatcherConfig) -> Self {
        let batcher = MutationBatcher::new(tx, config);
        let correlator = CallCorrelator::new(batcher.clone());
        Self {
            batcher,
            correlator,
            node_issuer: HandleIssuer::new(),
            object_issuer: HandleIssuer::new(),
            strings_in: StringCache::new(),
            decode_config: DecodeConfig::default(),
        }
    }

    /// The batcher this context records through.
    pub fn batcher(&self) -> &MutationBatcher {
        &self.batcher
    }

    /// Correlator for calls this context originates.
    pub fn correlator(&self) -> &CallCorrelator {
        &self.correlator
    }

    /// Current channel phase.
    pub fn phase(&self) -> Phase {
        self.batcher.phase()
    }

    /// Mark hydration as underway; the next flush is the hydration
    /// envelope.
    pub fn begin_hydration(&self) {
        self.batcher.begin_hydration();
    }

    /// Gate mutation transfer on or off.
    pub fn set_allow_transfer(&self, allow: bool) {
        self.batcher.set_allow_transfer(allow);
    }

    /// Create a mirrored node and queue its creation descriptor.
    pub fn create_node(
        &mut self,
        kind: u16,
        name: &str,
        namespace: Option<&str>,
        text: Option<&str>,
    ) -> Result<NodeHandle> {
        let handle = NodeHandle(self.node_issuer.next().0);
        self.batcher
            .queue_node_creation(handle, kind, name, namespace, text)?;
        Ok(handle)
    }

    /// Construct a remote object by class name; the handle is live
    /// immediately even though construction happens on the executor.
    pub fn create_remote_object(
        &mut self,
        constructor: &str,
        args: Vec<WireValue>,
    ) -> Result<ObjectHandle> {
        let handle = self.object_issuer.next();
        self.batcher.record(&Mutation::ObjectCreate(ObjectCreate {
            constructor: constructor.to_string(),
            handle,
            args,
        }))?;
        Ok(handle)
    }

    /// Release a remote object.
    pub fn delete_remote_object(&self, handle: ObjectHandle) -> Result<()> {
        self.batcher
            .record(&Mutation::ObjectDelete(ObjectDelete { handle }))
    }

    /// Record any mutation directly.
    pub fn record(&self, mutation: &Mutation) -> Result<()> {
        self.batcher.record(mutation)
    }

    /// Set or remove an attribute; `None` removes it.
    pub fn set_attribute(
        &self,
        target: NodeHandle,
        name: &str,
        namespace: Option<&str>,
        value: Option<&str>,
    ) -> Result<()> {
        self.batcher.record(&Mutation::Attribute(Attribute {
            target,
            name: name.to_string(),
            namespace: namespace.map(|s| s.to_string()),
            value: value.map(|s| s.to_string()),
        }))
    }

    /// Replace a node's character data.
    pub fn set_text(&self, target: NodeHandle, value: &str) -> Result<()> {
        self.batcher.record(&Mutation::CharacterData(CharacterData {
            target,
            value: value.to_string(),
        }))
    }

    /// Set a live property on a node.
    pub fn set_property(&self, target: NodeHandle, name: &str, value: WireValue) -> Result<()> {
        self.batcher.record(&Mutation::Property(Property {
            target,
            name: name.to_string(),
            value,
        }))
    }

    /// Splice children under `target`.
    pub fn splice_children(
        &self,
        target: NodeHandle,
        added: Vec<NodeHandle>,
        next_sibling: Option<NodeHandle>,
        previous_sibling: Option<NodeHandle>,
        removed: Vec<NodeHandle>,
    ) -> Result<()> {
        self.batcher.record(&Mutation::ChildList(ChildList {
            target,
            next_sibling,
            previous_sibling,
            added,
            removed,
        }))
    }

    /// Subscribe or unsubscribe an event listener on a node.
    #[allow(clippy::too_many_arguments)]
    pub fn set_event_subscription(
        &self,
        target: NodeHandle,
        event_type: &str,
        listener_index: u32,
        subscribe: bool,
        capture: bool,
        once: bool,
        passive: bool,
        custom_prevent_default: bool,
    ) -> Result<()> {
        self.batcher
            .record(&Mutation::EventSubscription(EventSubscription {
                target,
                event_type: event_type.to_string(),
                listener_index,
                subscribe,
                capture,
                once,
                passive,
                custom_prevent_default,
            }))
    }

    /// Fire-and-forget method call on a remote object.
    pub fn call_object(
        &self,
        target: ObjectHandle,
        method: &str,
        args: Vec<WireValue>,
    ) -> Result<()> {
        self.batcher.record(&Mutation::ObjectCall(ObjectCall {
            target: WireValue::Remote(target),
            method: method.to_string(),
            args,
        }))
    }

    /// Write one storage key.
    pub fn storage_set(&self, location: StorageLocation, key: &str, value: &str) -> Result<()> {
        self.batcher.record(&Mutation::Storage(Storage {
            op: StorageOp::Set,
            location,
            key: key.to_string(),
            value: Some(value.to_string()),
        }))
    }

    /// Delete one storage key.
    pub fn storage_delete(&self, location: StorageLocation, key: &str) -> Result<()> {
        self.batcher.record(&Mutation::Storage(Storage {
            op: StorageOp::Delete,
            location,
            key: key.to_string(),
            value: None,
        }))
    }

    /// Correlated call against a target on the executor side.
    pub async fn call(
        &self,
        target: WireValue,
        name: &str,
        args: Vec<WireValue>,
        timeout: Option<Duration>,
    ) -> Result<WireValue> {
        self.correlator.call(target, name, args, timeout).await
    }

    /// Correlated call that also stores the result under a fresh handle on
    /// the executor side.
    pub async fn call_with_result_handle(
        &mut self,
        target: WireValue,
        name: &str,
        args: Vec<WireValue>,
        timeout: Option<Duration>,
    ) -> Result<(ObjectHandle, WireValue)> {
        let handle = self.object_issuer.next();
        let value = self
            .correlator
            .call_with_handle(target, name, args, Some(handle), timeout)
            .await?;
        Ok((handle, value))
    }

    /// Export a function the executor side may call.
    pub fn export(&self, name: &str, f: ExportedFn) -> Result<()> {
        self.correlator.export(name, f)
    }

    /// Export a synchronous function.
    pub fn export_sync<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: Fn(Vec<WireValue>) -> RemoteCallResult + Send + Sync + 'static,
    {
        self.correlator.export_sync(name, f)
    }

    /// Process one envelope arriving from the executor side.
    ///
    /// Call results and upcalls are consumed here; every other record is
    /// returned to the caller as an event.
    pub fn process_envelope(&mut self, envelope: Envelope) -> Result<Vec<Mutation>> {
        self.strings_in.absorb(envelope.strings);
        let mut events = Vec::new();
        for buf in &envelope.mutations {
            let values = decode(buf, &self.strings_in, &self.decode_config)?;
            match Mutation::from_values(&values)? {
                Mutation::FunctionResult(result) => self.correlator.deliver_result(result),
                Mutation::FunctionCall(call) => {
                    let correlator = self.correlator.clone();
                    tokio::spawn(async move {
                        correlator.handle_call(call).await;
                    });
                }
                other => events.push(other),
            }
        }
        Ok(events)
    }
}
