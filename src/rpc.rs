//! Bidirectional request/response calls over the mutation channel.
//!
//! A call emits a `FunctionCall` record through the batcher and suspends the
//! caller on a one-shot listener keyed by a per-call correlation id. The
//! responding side resolves the named function from its exported-function
//! table, invokes it, and emits exactly one `FunctionResult` record back,
//! whether the function completed synchronously or asynchronously, succeeded
//! or failed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::batch::MutationBatcher;
use crate::codec::{ObjectHandle, WireValue};
use crate::error::{Result, TreewireError};
use crate::protocol::{CallStatus, FunctionCall, FunctionResult, Mutation};

/// Boxed future for exported function results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of an exported function: a value, or a message reported to the
/// caller as a rejection.
pub type RemoteCallResult = std::result::Result<WireValue, String>;

/// An exported function invocable from the peer context.
pub type ExportedFn = Box<dyn Fn(Vec<WireValue>) -> BoxFuture<'static, RemoteCallResult> + Send + Sync>;

struct PendingCalls {
    next_id: u32,
    listeners: HashMap<u32, oneshot::Sender<FunctionResult>>,
}

struct Inner {
    pending: Mutex<PendingCalls>,
    exports: Mutex<HashMap<String, Arc<ExportedFn>>>,
    batcher: MutationBatcher,
}

/// Correlates outbound calls with inbound results and dispatches inbound
/// calls to exported functions. Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct CallCorrelator {
    inner: Arc<Inner>,
}

impl CallCorrelator {
    /// Create a correlator emitting records through `batcher`.
    pub fn new(batcher: MutationBatcher) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(PendingCalls {
                    next_id: 0,
                    listeners: HashMap::new(),
                }),
                exports: Mutex::new(HashMap::new()),
                batcher,
            }),
        }
    }

    /// Call a function in the peer context and await its typed result.
    ///
    /// Resolves with the result value, or fails with `CallRejected` when the
    /// remote function failed, `CallTimeout` when `timeout` elapses first
    /// (any late result is then silently dropped), or `ChannelClosed` when
    /// the channel disappeared before a result arrived.
    pub async fn call(
        &self,
        target: WireValue,
        name: &str,
        args: Vec<WireValue>,
        timeout: Option<Duration>,
    ) -> Result<WireValue> {
        self.call_with_handle(target, name, args, None, timeout)
            .await
    }

    /// Like [`call`](Self::call), additionally asking the executor to store
    /// the call's result object under an optimistically-issued handle.
    pub async fn call_with_handle(
        &self,
        target: WireValue,
        name: &str,
        args: Vec<WireValue>,
        result_handle: Option<ObjectHandle>,
        timeout: Option<Duration>,
    ) -> Result<WireValue> {
        let (tx, rx) = oneshot::channel();
        let correlation = {
            let mut pending = self.inner.pending.lock().expect("correlator state poisoned");
            let id = pending.next_id;
            pending.next_id = pending.next_id.checked_add(1).unwrap_or(0);
            pending.listeners.insert(id, tx);
            id
        };

        let record = Mutation::FunctionCall(FunctionCall {
            target,
            name: name.to_string(),
            correlation,
            is_async: true,
            result_handle,
            args,
        });
        if let Err(e) = self.inner.batcher.record(&record) {
            self.remove_listener(correlation);
            return Err(e);
        }

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    // Deregister so a late result is a no-op.
                    self.remove_listener(correlation);
                    return Err(TreewireError::CallTimeout);
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(result) => match result.status {
                CallStatus::Resolve => Ok(result.value),
                CallStatus::Reject => Err(TreewireError::CallRejected(stringify(&result.value))),
            },
            Err(_) => Err(TreewireError::ChannelClosed),
        }
    }

    fn remove_listener(&self, correlation: u32) {
        self.inner
            .pending
            .lock()
            .expect("correlator state poisoned")
            .listeners
            .remove(&correlation);
    }

    /// Complete the pending call for a delivered result record.
    ///
    /// A result with no registered listener (timed out or never ours) is
    /// silently dropped.
    pub fn deliver_result(&self, result: FunctionResult) {
        let listener = self
            .inner
            .pending
            .lock()
            .expect("correlator state poisoned")
            .listeners
            .remove(&result.correlation);
        match listener {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => {
                tracing::trace!(correlation = result.correlation, "dropping late call result");
            }
        }
    }

    /// Export an async function under an identifier the peer can call.
    ///
    /// # Errors
    ///
    /// `ExportConflict` when the identifier is already exported.
    pub fn export(&self, name: &str, f: ExportedFn) -> Result<()> {
        let mut exports = self.inner.exports.lock().expect("correlator state poisoned");
        if exports.contains_key(name) {
            return Err(TreewireError::ExportConflict(name.to_string()));
        }
        exports.insert(name.to_string(), Arc::new(f));
        Ok(())
    }

    /// Export a synchronous function.
    pub fn export_sync<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: Fn(Vec<WireValue>) -> RemoteCallResult + Send + Sync + 'static,
    {
        self.export(
            name,
            Box::new(move |args| {
                let result = f(args);
                Box::pin(async move { result })
            }),
        )
    }

    /// Handle an inbound call record addressed to an exported function and
    /// emit exactly one result record back.
    ///
    /// An unregistered identifier, like a failing function, reports as a
    /// rejection to the caller; neither propagates as an error here.
    pub async fn handle_call(&self, call: FunctionCall) {
        let exported = self
            .inner
            .exports
            .lock()
            .expect("correlator state poisoned")
            .get(&call.name)
            .cloned();

        let outcome = match exported {
            Some(f) => f(call.args).await,
            None => Err(format!("function not found: {}", call.name)),
        };

        let result = match outcome {
            Ok(value) => FunctionResult {
                correlation: call.correlation,
                status: CallStatus::Resolve,
                value,
            },
            Err(message) => FunctionResult {
                correlation: call.correlation,
                status: CallStatus::Reject,
                value: WireValue::String(message),
            },
        };

        if let Err(e) = self
            .inner
            .batcher
            .record(&Mutation::FunctionResult(result))
        {
            tracing::warn!(correlation = call.correlation, "failed to send call result: {}", e);
        }
    }

    /// Whether a function identifier is currently exported.
    pub fn is_exported(&self, name: &str) -> bool {
        self.inner
            .exports
            .lock()
            .expect("correlator state poisoned")
            .contains_key(name)
    }
}

fn stringify(value: &WireValue) -> String {
    match value {
        WireValue::String(s) => s.clone(),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatcherConfig;
    use crate::channel::channel;
    use crate::protocol::Phase;

    fn correlator() -> (CallCorrelator, crate::channel::ChannelReceiver) {
        let (tx, rx) = channel();
        let batcher = MutationBatcher::new(
            tx,
            BatcherConfig {
                allow_transfer: true,
                initial_phase: Phase::Mutating,
            },
        );
        (CallCorrelator::new(batcher), rx)
    }

    #[tokio::test]
    async fn test_resolve_completes_the_caller() {
        let (correlator, _rx) = correlator();

        let pending = correlator.call(WireValue::ExecutionContext, "f", vec![], None);
        let delivery = {
            let correlator = correlator.clone();
            async move {
                correlator.deliver_result(FunctionResult {
                    correlation: 0,
                    status: CallStatus::Resolve,
                    value: WireValue::Int(99),
                });
            }
        };

        let (result, ()) = tokio::join!(pending, delivery);
        assert_eq!(result.unwrap(), WireValue::Int(99));
    }

    #[tokio::test]
    async fn test_reject_surfaces_message() {
        let (correlator, _rx) = correlator();

        let pending = correlator.call(WireValue::ExecutionContext, "f", vec![], None);
        let delivery = {
            let correlator = correlator.clone();
            async move {
                correlator.deliver_result(FunctionResult {
                    correlation: 0,
                    status: CallStatus::Reject,
                    value: WireValue::String("nope".to_string()),
                });
            }
        };

        let (result, ()) = tokio::join!(pending, delivery);
        match result {
            Err(TreewireError::CallRejected(msg)) => assert_eq!(msg, "nope"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rejects_and_late_result_is_dropped() {
        let (correlator, _rx) = correlator();

        let result = correlator
            .call(
                WireValue::ExecutionContext,
                "slow",
                vec![],
                Some(Duration::from_millis(50)),
            )
            .await;
        assert!(matches!(result, Err(TreewireError::CallTimeout)));

        // Late result: listener is gone, this must be a no-op.
        correlator.deliver_result(FunctionResult {
            correlation: 0,
            status: CallStatus::Resolve,
            value: WireValue::Null,
        });
    }

    #[tokio::test]
    async fn test_export_conflict() {
        let (correlator, _rx) = correlator();

        correlator
            .export_sync("greet", |_| Ok(WireValue::Null))
            .unwrap();
        let second = correlator.export_sync("greet", |_| Ok(WireValue::Null));
        assert!(matches!(second, Err(TreewireError::ExportConflict(_))));
    }

    #[tokio::test]
    async fn test_handle_call_emits_one_resolve_record() {
        let (correlator, mut rx) = correlator();
        correlator
            .export_sync("double", |args| match args.first() {
                Some(WireValue::Int(v)) => Ok(WireValue::Int(v * 2)),
                _ => Err("expected an integer".to_string()),
            })
            .unwrap();

        correlator
            .handle_call(FunctionCall {
                target: WireValue::ExecutionContext,
                name: "double".to_string(),
                correlation: 5,
                is_async: true,
                result_handle: None,
                args: vec![WireValue::Int(21)],
            })
            .await;

        let env = rx.recv().await.unwrap();
        assert_eq!(env.mutations.len(), 1);

        let mut cache = crate::codec::StringCache::new();
        cache.absorb(env.strings);
        let values = crate::codec::decode(
            &env.mutations[0],
            &cache,
            &crate::codec::DecodeConfig::default(),
        )
        .unwrap();
        match Mutation::from_values(&values).unwrap() {
            Mutation::FunctionResult(r) => {
                assert_eq!(r.correlation, 5);
                assert_eq!(r.status, CallStatus::Resolve);
                assert_eq!(r.value, WireValue::Int(42));
            }
            other => panic!("wrong record: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unregistered_function_rejects() {
        let (correlator, mut rx) = correlator();

        correlator
            .handle_call(FunctionCall {
                target: WireValue::ExecutionContext,
                name: "ghost".to_string(),
                correlation: 1,
                is_async: false,
                result_handle: None,
                args: vec![],
            })
            .await;

        let env = rx.recv().await.unwrap();
        let mut cache = crate::codec::StringCache::new();
        cache.absorb(env.strings);
        let values = crate::codec::decode(
            &env.mutations[0],
            &cache,
            &crate::codec::DecodeConfig::default(),
        )
        .unwrap();
        match Mutation::from_values(&values).unwrap() {
            Mutation::FunctionResult(r) => {
                assert_eq!(r.status, CallStatus::Reject);
                assert_eq!(
                    r.value,
                    WireValue::String("function not found: ghost".to_string())
                );
            }
            other => panic!("wrong record: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_correlation_ids_increase_per_call() {
        let (correlator, mut rx) = correlator();

        // Fire two calls without awaiting results; inspect emitted records.
        let c = correlator.clone();
        tokio::spawn(async move {
            let _ = c.call(WireValue::ExecutionContext, "a", vec![], None).await;
        });
        let c = correlator.clone();
        tokio::spawn(async move {
            let _ = c.call(WireValue::ExecutionContext, "b", vec![], None).await;
        });

        let env = rx.recv().await.unwrap();
        let mut cache = crate::codec::StringCache::new();
        cache.absorb(env.strings);

        let mut ids = Vec::new();
        for buf in &env.mutations {
            let values =
                crate::codec::decode(buf, &cache, &crate::codec::DecodeConfig::default()).unwrap();
            if let Mutation::FunctionCall(call) = Mutation::from_values(&values).unwrap() {
                ids.push(call.correlation);
            }
        }
        assert_eq!(ids, vec![0, 1]);
    }
}
