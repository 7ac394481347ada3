//! Process health surface, polled by an external health check rather than
//! exposed over the network by this crate itself.
//!
//! "Ready" means the auditor has replayed at least one update and can serve
//! a tree head. "Healthy" stays true until a fatal error (an invalid proof
//! or a failed self-signature verification) has been recorded, at which
//! point it latches false permanently: the divergence that caused it won't
//! resolve itself on the next tick, so there is no staleness window to wait
//! out, only an operator to page.

use std::sync::Mutex;

pub struct HealthState {
    inner: Mutex<Inner>,
}

struct Inner {
    is_initialized: bool,
    has_fatal_error: bool,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                is_initialized: false,
                has_fatal_error: false,
            }),
        }
    }

    pub fn record_successful_tick(&self, is_initialized: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.is_initialized = is_initialized;
    }

    /// Permanently marks the process unhealthy. Once set, `is_healthy`
    /// never returns true again for this `HealthState`.
    pub fn record_fatal_error(&self) {
        self.inner.lock().unwrap().has_fatal_error = true;
    }

    /// The process has replayed at least one update and holds a
    /// well-formed tree head.
    pub fn is_ready(&self) -> bool {
        self.inner.lock().unwrap().is_initialized
    }

    /// No fatal error has been recorded yet.
    pub fn is_healthy(&self) -> bool {
        !self.inner.lock().unwrap().has_fatal_error
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
