//! Reference registry: the two coordinated id spaces of the protocol.
//!
//! The producer side issues handles optimistically through [`HandleIssuer`]
//! the instant a facade requests creation, without waiting for the executor
//! to confirm. The executor side stores the real objects under those exact
//! handles in an [`ObjectStore`].

use std::collections::{HashMap, HashSet};

use crate::codec::{AsWireReference, ObjectHandle, WireValue};
use crate::error::{Result, TreewireError};

/// Producer-side monotonic handle allocator.
///
/// Ids are practically unique: strictly increasing with wraparound at
/// `u32::MAX` back past zero (zero is reserved for "no handle"). One issuer
/// is constructed per channel so multiple channels in a process never
/// collide.
#[derive(Debug)]
pub struct HandleIssuer {
    next: u32,
}

impl HandleIssuer {
    /// Create an issuer starting at 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next handle.
    pub fn next(&mut self) -> ObjectHandle {
        let id = self.next;
        self.next = self.next.checked_add(1).unwrap_or(1);
        ObjectHandle(id)
    }
}

impl Default for HandleIssuer {
    fn default() -> Self {
        Self::new()
    }
}

/// An executor-side object reachable through a remote handle.
///
/// Stored objects expose a uniform invocation surface; a failing invocation
/// reports its message and is surfaced to the caller as a rejection, never
/// as a panic.
pub trait RemoteTarget: Send {
    /// Invoke a named method with decoded arguments.
    fn invoke(&mut self, method: &str, args: &[WireValue]) -> std::result::Result<WireValue, String>;
}

/// A stored object tagged with its handle, so return values can be encoded
/// as references without a reverse search.
pub struct StoredObject {
    handle: ObjectHandle,
    target: Box<dyn RemoteTarget>,
}

impl StoredObject {
    /// The handle this object is stored under.
    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    /// Invoke a method on the underlying object.
    pub fn invoke(
        &mut self,
        method: &str,
        args: &[WireValue],
    ) -> std::result::Result<WireValue, String> {
        self.target.invoke(method, args)
    }
}

impl AsWireReference for StoredObject {
    fn as_wire_ref(&self) -> WireValue {
        WireValue::Remote(self.handle)
    }
}

/// Executor-side registry mapping remote handles to live objects.
///
/// Creation is optimistic on the producer side, so a failed construction is
/// recorded as a poisoned handle: first use reports `ReferenceNotFound`
/// naming the constructor that failed, instead of silently succeeding.
#[derive(Default)]
pub struct ObjectStore {
    objects: HashMap<u32, StoredObject>,
    poisoned: HashMap<u32, String>,
    retired: HashSet<u32>,
}

impl ObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object under the handle the producer issued for it.
    pub fn store(&mut self, handle: ObjectHandle, target: Box<dyn RemoteTarget>) {
        self.retired.remove(&handle.0);
        self.poisoned.remove(&handle.0);
        self.objects.insert(handle.0, StoredObject { handle, target });
    }

    /// Record a handle whose optimistic creation failed on this side.
    pub fn poison(&mut self, handle: ObjectHandle, constructor: &str) {
        self.poisoned.insert(handle.0, constructor.to_string());
    }

    /// Look up a live object.
    ///
    /// # Errors
    ///
    /// `ReferenceNotFound` for unknown, retired, or poisoned handles; the
    /// poisoned message names the constructor that failed.
    pub fn get_mut(&mut self, handle: ObjectHandle) -> Result<&mut StoredObject> {
        if let Some(constructor) = self.poisoned.get(&handle.0) {
            return Err(TreewireError::ReferenceNotFound(format!(
                "handle {} references a failed {} construction",
                handle.0, constructor
            )));
        }
        if self.retired.contains(&handle.0) {
            return Err(TreewireError::ReferenceNotFound(format!(
                "handle {} was already deleted",
                handle.0
            )));
        }
        self.objects.get_mut(&handle.0).ok_or_else(|| {
            TreewireError::ReferenceNotFound(format!("no object stored under handle {}", handle.0))
        })
    }

    /// Retire a handle. Deleting an already-deleted or unknown handle is a
    /// no-op returning `false`, never an error.
    pub fn delete(&mut self, handle: ObjectHandle) -> bool {
        self.poisoned.remove(&handle.0);
        if self.objects.remove(&handle.0).is_some() {
            self.retired.insert(handle.0);
            true
        } else {
            false
        }
    }

    /// Whether a handle currently resolves to a live object.
    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.objects.contains_key(&handle.0)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no live objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
