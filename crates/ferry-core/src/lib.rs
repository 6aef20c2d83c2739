//! Ferry host bridge: marshals values between a host and a WebAssembly guest.
//!
//! # Architecture
//!
//! A [`Bridge`] owns one guest module and one `wasmi::Store` whose data is
//! the [`BridgeState`]. Everything that crosses the boundary goes through
//! one of its parts:
//!
//! - [`memory`]: bounds-checked views over guest linear memory, refreshed
//!   whenever the memory grows.
//! - [`codec`]: UTF-8 strings, byte buffers, handle arrays and the
//!   out-buffer used for multi-value returns.
//! - [`table`]: the object table mapping guest-held integer handles to host
//!   values, with four reserved sentinel handles.
//! - [`closure`]: guest callbacks wrapped as reference-counted host values.
//! - [`dispatch`]: host functions registered as guest imports, each with a
//!   shim that decodes arguments, runs the function and encodes the result.
//! - [`boundary`]: the exception register fallible imports report through.
//! - [`lifecycle`]: loading, instantiating and starting the module.
//!
//! ## Handles
//!
//! | handle | value       |
//! |--------|-------------|
//! | 0      | `undefined` |
//! | 1      | `null`      |
//! | 2      | `true`      |
//! | 3      | `false`     |
//! | 4..    | table slots |
//!
//! Guest imports and their lowering are described by [`ferry_abi`].

pub mod boundary;
pub mod closure;
pub mod codec;
pub mod config;
pub mod dispatch;
mod error;
mod intrinsics;
pub mod lifecycle;
pub mod memory;
mod state;
pub mod table;
mod value;

pub use closure::{run_finalizers, Closure};
pub use codec::EncodedStr;
pub use config::{BridgeConfig, ExportNames};
pub use dispatch::{Arg, Args, Dispatcher, HostCx, Ret, Thunk};
pub use error::{BridgeError, BridgeResult};
pub use lifecycle::{Bridge, LifecycleState, ModuleSource};
pub use memory::MemoryView;
pub use state::{BridgeState, Diagnostics};
pub use table::ObjectTable;
pub use value::{HostError, HostObject, HostValue};

pub use ferry_abi::{AbiParam, AbiReturn, DispatchKind, Handle, Signature};
