//! Controller handle shared between the event and timer callbacks

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::Result;
use crate::controller::{BleMode, FlowRole, HciController, Input};
use crate::transport::HciTransport;

/// Cloneable handle serializing access to one [`HciController`]
///
/// The transport delivers packets from its receive callback while the retry
/// timer fires from another context. Both go through this handle so an input
/// always runs to completion before the next one starts.
#[derive(Debug)]
pub struct SharedController<T: HciTransport> {
    inner: Arc<Mutex<HciController<T>>>,
}

impl<T: HciTransport> Clone for SharedController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: HciTransport> SharedController<T> {
    /// Share `controller`
    pub fn new(controller: HciController<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(controller)),
        }
    }

    /// Process one input
    pub fn handle(&self, input: Input<'_>) {
        self.inner.lock().handle(input);
    }

    /// See [`HciController::start`]
    pub fn start(&self, mode: BleMode, role: FlowRole) {
        self.inner.lock().start(mode, role);
    }

    /// See [`HciController::stop`]
    pub fn stop(&self) {
        self.inner.lock().stop();
    }

    /// See [`HciController::send_acl`]
    pub fn send_acl(&self, flags: u8, payload: &[u8]) -> Result<()> {
        self.inner.lock().send_acl(flags, payload)
    }

    /// Lock the controller for direct access
    pub fn lock(&self) -> MutexGuard<'_, HciController<T>> {
        self.inner.lock()
    }
}
