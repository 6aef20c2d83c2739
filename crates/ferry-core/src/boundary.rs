//! Error/exception boundary.
//!
//! Host failures raised inside a fallible import are captured as a handle
//! in a single-slot register; the import returns the failure status and the
//! guest collects the exception with `take_exception` straight away. An
//! exception the guest never collected is released at the start of the next
//! fallible call.

use ferry_abi::Handle;
use log::{debug, error};

use crate::error::BridgeError;
use crate::state::Diagnostics;
use crate::table::ObjectTable;
use crate::value::HostValue;

/// The last-exception register.
#[derive(Debug, Default)]
pub struct ErrorBoundary {
    pending: Option<Handle>,
}

impl ErrorBoundary {
    /// Store `value` as the pending exception and return its handle.
    ///
    /// An exception still pending is released first.
    pub fn capture(&mut self, objects: &mut ObjectTable, value: HostValue) -> Handle {
        self.discard_stale(objects);
        let handle = objects.alloc(value);
        self.pending = Some(handle);
        handle
    }

    /// Retrieve and clear the pending exception.
    pub fn take_last_exception(&mut self) -> Option<Handle> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<Handle> {
        self.pending
    }

    /// Release an exception the guest never took. Returns whether one was
    /// pending.
    pub fn discard_stale(&mut self, objects: &mut ObjectTable) -> bool {
        let Some(handle) = self.pending.take() else {
            return false;
        };
        debug!("discarding unconsumed exception {handle}");
        if let Err(err) = objects.release(handle) {
            debug!("stale exception {handle} was already released: {err}");
        }
        true
    }
}

/// Write a failure that left the bridge to the diagnostic channel.
pub fn report_uncaught(diagnostics: &mut Diagnostics, err: &BridgeError) {
    let report = err.report();
    error!("uncaught failure crossing the bridge: {report}");
    diagnostics.uncaught += 1;
    diagnostics.last_uncaught = Some(report);
}
