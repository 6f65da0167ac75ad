//! Process-local interruption flag (C14). SPEC_FULL.md §4.14.
//!
//! A lock-protected map from call id to a boolean, read by the egress loop
//! between audio slices and set by ingress VAD during bot speech. Exists
//! alongside the persisted `should_stop_speaking` on `ConversationSession`:
//! this one is the O(1) in-process fast path; the persisted copy is what a
//! different task reading a session-store snapshot would see.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Default)]
pub struct InterruptFlags {
    flags: RwLock<HashMap<String, Arc<AtomicBool>>>,
}

impl InterruptFlags {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, call_id: &str) -> Arc<AtomicBool> {
        if let Some(flag) = self.flags.read().get(call_id) {
            return flag.clone();
        }
        self.flags
            .write()
            .entry(call_id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    pub fn set(&self, call_id: &str) {
        self.entry(call_id).store(true, Ordering::SeqCst);
    }

    pub fn check(&self, call_id: &str) -> bool {
        self.flags
            .read()
            .get(call_id)
            .map(|f| f.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn clear(&self, call_id: &str) {
        if let Some(flag) = self.flags.read().get(call_id) {
            flag.store(false, Ordering::SeqCst);
        }
    }

    /// Called on call finalization; no finalizer magic, removed explicitly.
    pub fn cleanup(&self, call_id: &str) {
        self.flags.write().remove(call_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_flag_reads_false() {
        let flags = InterruptFlags::new();
        assert!(!flags.check("CA1"));
    }

    #[test]
    fn set_then_check_then_clear() {
        let flags = InterruptFlags::new();
        flags.set("CA1");
        assert!(flags.check("CA1"));
        flags.clear("CA1");
        assert!(!flags.check("CA1"));
    }

    #[test]
    fn cleanup_removes_entry_entirely() {
        let flags = InterruptFlags::new();
        flags.set("CA1");
        flags.cleanup("CA1");
        assert!(!flags.check("CA1"));
    }

    #[test]
    fn flags_are_independent_per_call() {
        let flags = InterruptFlags::new();
        flags.set("CA1");
        assert!(!flags.check("CA2"));
    }
}
