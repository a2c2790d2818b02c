//! Binary wire codec for heterogeneous value lists.
//!
//! `encode` and `decode` are mutual inverses for every value representable
//! by [`WireValue`]. Encoding runs an exact size-estimation pass first so a
//! single correctly-sized buffer is allocated; there is no growable-buffer
//! reallocation on the hot path.

mod decode;
mod encode;
mod strings;
mod value;

pub use decode::{decode, DecodeConfig};
pub use encode::{encode, estimate_size, LONG_STRING_THRESHOLD};
pub use strings::{StringCache, StringTable};
pub use value::{tag, AsWireReference, NodeHandle, ObjectHandle, WireValue};
