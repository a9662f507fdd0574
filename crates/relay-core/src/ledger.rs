//! Bounded record of deliveries already observed as successful.
//!
//! Delivery stays at-least-once: a send that succeeds on the platform but
//! whose response is lost still looks failed here and will be re-run.

use std::{
    collections::{HashSet, VecDeque},
    sync::Mutex,
};

pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

#[derive(Default)]
struct Inner {
    keys: HashSet<String>,
    order: VecDeque<String>,
}

pub struct DeliveryLedger {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl Default for DeliveryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}

impl DeliveryLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.keys.contains(key))
            .unwrap_or(false)
    }

    /// Record a delivered key. Returns `false` if it was already present.
    pub fn record(&self, key: impl Into<String>) -> bool {
        let key = key.into();
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        if !inner.keys.insert(key.clone()) {
            return false;
        }
        inner.order.push_back(key);
        while inner.order.len() > self.capacity {
            if let Some(old) = inner.order.pop_front() {
                inner.keys.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.keys.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
