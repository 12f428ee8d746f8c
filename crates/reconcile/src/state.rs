//! In-memory reconciliation state: lame services and known CriticalServices.
//!
//! Mutators are crate-private; only the reconciler loop changes this state.

use rustc_hash::{FxHashMap, FxHashSet};
use svcwatch_core::{CriticalServiceSpec, ServiceObject};

#[derive(Debug, Default, Clone)]
pub struct ReconcileState {
    /// Qualified names (`namespace/name`) last observed with zero matching Pods.
    lame: FxHashSet<String>,
    /// CriticalService name -> latest spec.
    critical: FxHashMap<String, CriticalServiceSpec>,
}

impl ReconcileState {
    pub fn new() -> Self { Self::default() }

    pub fn is_lame(&self, qualified: &str) -> bool { self.lame.contains(qualified) }

    /// Sorted snapshot of the lame set.
    pub fn lame_services(&self) -> Vec<String> {
        let mut out: Vec<String> = self.lame.iter().cloned().collect();
        out.sort();
        out
    }

    pub fn lame_len(&self) -> usize { self.lame.len() }

    pub fn critical(&self, name: &str) -> Option<&CriticalServiceSpec> { self.critical.get(name) }

    pub fn critical_len(&self) -> usize { self.critical.len() }

    /// A Service is critical when a CriticalService of the same name exists in its
    /// namespace and its `matchLabels` select the Service's labels.
    pub fn is_critical(&self, svc: &ServiceObject) -> bool {
        self.critical.get(&svc.name).map(|spec| spec.covers(svc)).unwrap_or(false)
    }

    /// Returns true when the name was not already lame.
    pub(crate) fn mark_lame(&mut self, qualified: String) -> bool { self.lame.insert(qualified) }

    /// Returns true when the name was lame.
    pub(crate) fn unmark_lame(&mut self, qualified: &str) -> bool { self.lame.remove(qualified) }

    pub(crate) fn register(&mut self, spec: CriticalServiceSpec) -> Option<CriticalServiceSpec> {
        self.critical.insert(spec.name.clone(), spec)
    }

    pub(crate) fn unregister(&mut self, name: &str) -> Option<CriticalServiceSpec> { self.critical.remove(name) }
}
