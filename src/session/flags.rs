use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Lifecycle flags shared between the manager, the event pump, the capture
/// callback and the deferred cleanup task.
#[derive(Debug, Default)]
pub struct LifecycleFlags {
    active: AtomicBool,
    initializing: AtomicBool,
    cleanup_prevented: AtomicBool,
    recording: AtomicBool,
    detached: AtomicBool,
    epoch: AtomicU64,
}

impl LifecycleFlags {
    /// A call was started and not yet torn down.
    pub fn active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, value: bool) {
        self.active.store(value, Ordering::SeqCst);
    }

    /// `start_voice_chat` is in progress.
    pub fn initializing(&self) -> bool {
        self.initializing.load(Ordering::SeqCst)
    }

    /// Claim initialization. Returns `false` if a start already holds it.
    pub fn begin_initializing(&self) -> bool {
        self.initializing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_initializing(&self) {
        self.initializing.store(false, Ordering::SeqCst);
    }

    /// Stop requests that are not forced must be ignored.
    pub fn cleanup_prevented(&self) -> bool {
        self.cleanup_prevented.load(Ordering::SeqCst)
    }

    pub fn set_cleanup_prevented(&self, value: bool) {
        self.cleanup_prevented.store(value, Ordering::SeqCst);
    }

    /// Capture frames are forwarded to the session.
    pub fn recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn set_recording(&self, value: bool) {
        self.recording.store(value, Ordering::SeqCst);
    }

    /// The owner went away; the next opportunity should tear down.
    pub fn detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn set_detached(&self, value: bool) {
        self.detached.store(value, Ordering::SeqCst);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Start a new epoch and return it.
    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    /// Nothing forbids releasing resources right now.
    pub fn may_clean_up(&self) -> bool {
        !self.active() && !self.cleanup_prevented()
    }

    /// Reset the call flags. `detached` and the epoch are left alone.
    pub fn clear(&self) {
        self.set_active(false);
        self.set_cleanup_prevented(false);
        self.set_recording(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_moves_forward() {
        let flags = LifecycleFlags::default();
        let first = flags.bump_epoch();
        assert!(flags.is_current(first));
        let second = flags.bump_epoch();
        assert!(!flags.is_current(first));
        assert!(flags.is_current(second));
    }

    #[test]
    fn test_may_clean_up() {
        let flags = LifecycleFlags::default();
        assert!(flags.may_clean_up());

        flags.set_active(true);
        assert!(!flags.may_clean_up());

        flags.set_active(false);
        flags.set_cleanup_prevented(true);
        assert!(!flags.may_clean_up());

        flags.clear();
        assert!(flags.may_clean_up());
    }

    #[test]
    fn test_initializing_is_exclusive() {
        let flags = LifecycleFlags::default();
        assert!(flags.begin_initializing());
        assert!(!flags.begin_initializing());
        flags.end_initializing();
        assert!(flags.begin_initializing());
    }

    #[test]
    fn test_clear_keeps_detached() {
        let flags = LifecycleFlags::default();
        flags.set_detached(true);
        flags.set_recording(true);
        flags.clear();
        assert!(flags.detached());
        assert!(!flags.recording());
    }
}
