//! The executor context: receives envelopes, applies them against live
//! state, and answers calls over its own outbound batcher.

mod apply;
mod tree;

pub use apply::{apply_mutation, Constructor, ExecutionState, StorageArea};
pub use tree::{ListenerRegistration, Tree, TreeNode};

use crate::batch::{BatcherConfig, MutationBatcher, NO_STRING_INDEX};
use crate::channel::{ChannelReceiver, ChannelSender};
use crate::codec::{decode, DecodeConfig, WireValue};
use crate::error::{Result, TreewireError};
use crate::protocol::{
    CallStatus, Envelope, FunctionCall, FunctionResult, Mutation, NodeDescriptor, Phase, Storage,
    StorageOp,
};
use crate::registry::RemoteTarget;
use crate::rpc::CallCorrelator;

/// Wraps a call result so a `result_handle` can reference it later.
struct StoredResult {
    value: WireValue,
}

impl RemoteTarget for StoredResult {
    fn invoke(
        &mut self,
        _method: &str,
        _args: &[WireValue],
    ) -> std::result::Result<WireValue, String> {
        Ok(self.value.clone())
    }
}

/// The executor side of one channel.
///
/// Owns the live state and an outbound batcher for replies and upcalls;
/// the outbound channel starts in `Mutating` phase since the executor
/// never hydrates the producer.
pub struct ExecutorContext {
    state: ExecutionState,
    batcher: MutationBatcher,
    correlator: CallCorrelator,
    decode_config: DecodeConfig,
}

impl ExecutorContext {
    /// Create an executor context sending replies through `tx`.
    pub fn new(tx: ChannelSender) -> Self {
        let batcher = MutationBatcher::new(
            tx,
            BatcherConfig {
                allow_transfer: true,
                initial_phase: Phase::Mutating,
            },
        );
        let correlator = CallCorrelator::new(batcher.clone());
        Self {
            state: ExecutionState::new(),
            batcher,
            correlator,
            decode_config: DecodeConfig::default(),
        }
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ExecutionState {
        &mut self.state
    }

    /// Correlator for calls the executor originates toward the producer.
    pub fn correlator(&self) -> &CallCorrelator {
        &self.correlator
    }

    /// Register a remote class the producer may construct by name.
    pub fn register_constructor(&mut self, name: impl Into<String>, ctor: Constructor) {
        self.state.register_constructor(name, ctor);
    }

    /// Apply one inbound envelope.
    ///
    /// A decode failure is fatal for the whole envelope; a missing
    /// reference only skips its record.
    pub fn apply_envelope(&mut self, envelope: Envelope) -> Result<()> {
        self.state.strings.absorb(envelope.strings);

        for descriptor in NodeDescriptor::unpack(&envelope.node_creations)? {
            self.create_node(descriptor)?;
        }

        for buf in &envelope.mutations {
            let values = decode(buf, &self.state.strings, &self.decode_config)?;
            let mutation = Mutation::from_values(&values)?;
            self.apply_record(mutation)?;
        }
        Ok(())
    }

    /// Drain the inbound channel, applying every envelope until the
    /// producer side closes.
    pub async fn run(mut self, mut rx: ChannelReceiver) {
        while let Some(envelope) = rx.recv().await {
            if let Err(error) = self.apply_envelope(envelope) {
                tracing::error!(%error, "failed to apply envelope");
            }
        }
        tracing::debug!("inbound channel closed, executor loop done");
    }

    fn create_node(&mut self, d: NodeDescriptor) -> Result<()> {
        let name = self.state.strings.get(d.name)?.to_string();
        let namespace = if d.namespace == NO_STRING_INDEX {
            None
        } else {
            Some(self.state.strings.get(d.namespace)?.to_string())
        };
        let text = if d.text == NO_STRING_INDEX {
            String::new()
        } else {
            self.state.strings.get(d.text)?.to_string()
        };
        self.state
            .tree
            .create_node(d.handle, d.kind, name, namespace, text);
        Ok(())
    }

    fn apply_record(&mut self, mutation: Mutation) -> Result<()> {
        match mutation {
            Mutation::FunctionResult(result) => {
                self.correlator.deliver_result(result);
                Ok(())
            }
            Mutation::FunctionCall(call) => self.dispatch_call(call),
            Mutation::Storage(ref storage) if storage.op == StorageOp::Get => {
                self.answer_storage_read(storage)
            }
            other => match apply_mutation(&mut self.state, &other) {
                Ok(()) => Ok(()),
                Err(TreewireError::ReferenceNotFound(reason)) => {
                    tracing::warn!(%reason, opcode = ?other.opcode(), "skipping record");
                    Ok(())
                }
                Err(other_error) => Err(other_error),
            },
        }
    }

    /// Route a correlated call to its target and emit exactly one result.
    fn dispatch_call(&mut self, call: FunctionCall) -> Result<()> {
        match call.target {
            WireValue::ExecutionContext => {
                let correlator = self.correlator.clone();
                tokio::spawn(async move {
                    correlator.handle_call(call).await;
                });
                Ok(())
            }
            WireValue::Remote(handle) => {
                let outcome = match self.state.objects.get_mut(handle) {
                    Ok(object) => object.invoke(&call.name, &call.args),
                    Err(error) => Err(error.to_string()),
                };
                let (status, value) = match outcome {
                    Ok(value) => {
                        if let Some(result_handle) = call.result_handle {
                            self.state.objects.store(
                                result_handle,
                                Box::new(StoredResult {
                                    value: value.clone(),
                                }),
                            );
                        }
                        (CallStatus::Resolve, value)
                    }
                    Err(reason) => (CallStatus::Reject, WireValue::String(reason)),
                };
                self.emit_result(call.correlation, status, value)
            }
            other => {
                let reason = format!("call against {} target", other.kind());
                self.emit_result(call.correlation, CallStatus::Reject, WireValue::String(reason))
            }
        }
    }

    fn emit_result(&self, correlation: u32, status: CallStatus, value: WireValue) -> Result<()> {
        self.batcher
            .record(&Mutation::FunctionResult(FunctionResult {
                correlation,
                status,
                value,
            }))
    }

    /// Read the storage area and send the value back as a read record with
    /// the value filled in.
    fn answer_storage_read(&mut self, storage: &Storage) -> Result<()> {
        let value = self
            .state
            .storage(storage.location)
            .get(&storage.key)
            .map(|s| s.to_string());
        self.batcher.record(&Mutation::Storage(Storage {
            op: StorageOp::Get,
            location: storage.location,
            key: storage.key.clone(),
            value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use crate::codec::{encode, NodeHandle, ObjectHandle, StringTable};
    use crate::protocol::{Attribute, EnvelopeKind};
    use bytes::Bytes;

    fn envelope_with(mutations: Vec<Mutation>, strings: &mut StringTable) -> Envelope {
        let mut encoded = Vec::new();
        for m in &mutations {
            encoded.push(encode(&m.to_values(), strings).unwrap());
        }
        Envelope {
            kind: EnvelopeKind::Mutate,
            node_creations: Bytes::new(),
            strings: strings.drain(),
            mutations: encoded,
        }
    }

    fn hydration_envelope(strings: &mut StringTable) -> Envelope {
        let name = strings.intern("div").unwrap();
        let descriptor = NodeDescriptor {
            handle: NodeHandle(1),
            kind: 1,
            name,
            namespace: NO_STRING_INDEX,
            text: NO_STRING_INDEX,
        };
        Envelope {
            kind: EnvelopeKind::Hydrate,
            node_creations: NodeDescriptor::pack(&[descriptor]),
            strings: strings.drain(),
            mutations: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_envelope_creates_nodes_and_applies_records() {
        let (tx, _rx) = channel();
        let mut executor = ExecutorContext::new(tx);
        let mut strings = StringTable::new();

        executor
            .apply_envelope(hydration_envelope(&mut strings))
            .unwrap();
        assert_eq!(executor.state().tree.len(), 1);

        let set_class = Mutation::Attribute(Attribute {
            target: NodeHandle(1),
            name: "class".to_string(),
            namespace: None,
            value: Some("big".to_string()),
        });
        executor
            .apply_envelope(envelope_with(vec![set_class], &mut strings))
            .unwrap();
        let node = executor.state().tree.get(NodeHandle(1)).unwrap();
        assert_eq!(node.attribute("class", None), Some("big"));
    }

    #[tokio::test]
    async fn test_missing_reference_skips_record_only() {
        let (tx, _rx) = channel();
        let mut executor = ExecutorContext::new(tx);
        let mut strings = StringTable::new();
        executor
            .apply_envelope(hydration_envelope(&mut strings))
            .unwrap();

        let bad = Mutation::CharacterData(crate::protocol::CharacterData {
            target: NodeHandle(77),
            value: "lost".to_string(),
        });
        let good = Mutation::CharacterData(crate::protocol::CharacterData {
            target: NodeHandle(1),
            value: "kept".to_string(),
        });
        executor
            .apply_envelope(envelope_with(vec![bad, good], &mut strings))
            .unwrap();
        assert_eq!(executor.state().tree.get(NodeHandle(1)).unwrap().text, "kept");
    }

    #[tokio::test]
    async fn test_truncated_mutation_is_fatal_for_envelope() {
        let (tx, _rx) = channel();
        let mut executor = ExecutorContext::new(tx);
        let envelope = Envelope {
            kind: EnvelopeKind::Mutate,
            node_creations: Bytes::new(),
            strings: Vec::new(),
            mutations: vec![Bytes::from_static(&[0, 0, 0])],
        };
        assert!(matches!(
            executor.apply_envelope(envelope),
            Err(TreewireError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_call_resolves_over_outbound_channel() {
        struct Echo;
        impl RemoteTarget for Echo {
            fn invoke(
                &mut self,
                _method: &str,
                args: &[WireValue],
            ) -> std::result::Result<WireValue, String> {
                Ok(args.first().cloned().unwrap_or(WireValue::Null))
            }
        }

        let (tx, mut rx) = channel();
        let mut executor = ExecutorContext::new(tx);
        executor
            .state_mut()
            .objects
            .store(ObjectHandle(5), Box::new(Echo));
        let mut strings = StringTable::new();

        let call = Mutation::FunctionCall(FunctionCall {
            target: WireValue::Remote(ObjectHandle(5)),
            name: "echo".to_string(),
            correlation: 3,
            is_async: true,
            result_handle: None,
            args: vec![WireValue::Int(42)],
        });
        executor
            .apply_envelope(envelope_with(vec![call], &mut strings))
            .unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.mutations.len(), 1);
        let cache = {
            let mut cache = crate::codec::StringCache::new();
            cache.absorb(reply.strings.clone());
            cache
        };
        let values = decode(&reply.mutations[0], &cache, &DecodeConfig::default()).unwrap();
        match Mutation::from_values(&values).unwrap() {
            Mutation::FunctionResult(result) => {
                assert_eq!(result.correlation, 3);
                assert_eq!(result.status, CallStatus::Resolve);
                assert_eq!(result.value, WireValue::Int(42));
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_storage_read_answered_with_value() {
        let (tx, mut rx) = channel();
        let mut executor = ExecutorContext::new(tx);
        executor
            .state_mut()
            .local_storage
            .set("theme".to_string(), "dark".to_string());
        let mut strings = StringTable::new();

        let read = Mutation::Storage(Storage {
            op: StorageOp::Get,
            location: crate::protocol::StorageLocation::Local,
            key: "theme".to_string(),
            value: None,
        });
        executor
            .apply_envelope(envelope_with(vec![read], &mut strings))
            .unwrap();

        let reply = rx.recv().await.unwrap();
        let cache = {
            let mut cache = crate::codec::StringCache::new();
            cache.absorb(reply.strings.clone());
            cache
        };
        let values = decode(&reply.mutations[0], &cache, &DecodeConfig::default()).unwrap();
        match Mutation::from_values(&values).unwrap() {
            Mutation::Storage(answer) => {
                assert_eq!(answer.value.as_deref(), Some("dark"));
            }
            other => panic!("unexpected record: {other:?}"),
        }
    }
}
