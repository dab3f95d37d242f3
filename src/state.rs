//! The shared controller record. Current position, busy/calibrating
//! flags, the pending-action slot and the config snapshot all live here
//! as narrow, independently lockable fields rather than module-level
//! globals.

use crate::config::Config;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// A request waiting for the dispatcher, in pulses/degrees as given by the
/// client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PendingAction {
    Goto { target_degrees: f64 },
    Calibrate,
    Track,
}

pub struct DomeState {
    current_pos: AtomicI64,
    busy: AtomicBool,
    calibrating: AtomicBool,
    pending: Mutex<Option<PendingAction>>,
    config: RwLock<Arc<Config>>,
}

impl DomeState {
    pub fn new(config: Config, initial_pos: i64) -> Arc<DomeState> {
        Arc::new(DomeState {
            current_pos: AtomicI64::new(initial_pos),
            busy: AtomicBool::new(false),
            calibrating: AtomicBool::new(false),
            pending: Mutex::new(None),
            config: RwLock::new(Arc::new(config)),
        })
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.read().expect("config lock poisoned").clone()
    }

    pub fn set_config(&self, config: Config) {
        *self.config.write().expect("config lock poisoned") = Arc::new(config);
    }

    pub fn current_pos(&self) -> i64 {
        self.current_pos.load(Ordering::SeqCst)
    }

    pub fn set_current_pos(&self, value: i64) {
        self.current_pos.store(value, Ordering::SeqCst);
    }

    pub fn add_pulse(&self, sign: i64) -> i64 {
        self.current_pos.fetch_add(sign, Ordering::SeqCst) + sign
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn set_busy(&self, value: bool) {
        self.busy.store(value, Ordering::SeqCst);
    }

    /// Sets busy to true only if it was false, returning whether this call
    /// won the race. `force` bypasses the check for tracking's internal
    /// sub-motions, which must preempt the busy flag they themselves hold.
    pub fn try_set_busy(&self, force: bool) -> bool {
        if force {
            self.busy.store(true, Ordering::SeqCst);
            return true;
        }
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibrating.load(Ordering::SeqCst)
    }

    pub fn set_calibrating(&self, value: bool) {
        self.calibrating.store(value, Ordering::SeqCst);
    }

    /// Admits a pending action if the slot is empty and the dome is not
    /// busy. Returns `true` on admission. The busy check and the slot
    /// check happen under the same lock `take_pending` uses, so admission
    /// can never observe a slot the dispatcher is mid-pickup of.
    pub fn try_admit(&self, action: PendingAction) -> bool {
        let mut slot = self.pending.lock().expect("pending lock poisoned");
        if self.is_busy() || slot.is_some() {
            return false;
        }
        *slot = Some(action);
        true
    }

    /// Pops the pending action, if any. Busy is raised by the action
    /// itself (its first relay pulse, or immediately for `track`), not by
    /// the pickup, matching the dome's actual hardware engagement point.
    pub fn take_pending(&self) -> Option<PendingAction> {
        self.pending.lock().expect("pending lock poisoned").take()
    }
}
