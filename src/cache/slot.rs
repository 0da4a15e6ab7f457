//! Double-checked lazily populated cell shared by the single-value caches.

use parking_lot::{ReentrantMutex, RwLock};

use super::traits::Disposer;

/// One lazily populated value.
///
/// Reads take the shared lock only. A miss serializes on `gate`, re-checks,
/// and runs the populate callback while holding `gate`, so at most one
/// population runs per epoch. Disposal also runs under `gate` so no reader
/// can see a disposed value still marked as cached.
///
/// `gate` is reentrant: a populate callback may call back into the owning
/// cache on the same thread.
pub(crate) struct Slot<T> {
    value: RwLock<Option<T>>,
    gate: ReentrantMutex<()>,
}

impl<T: Clone> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: RwLock::new(None),
            gate: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn is_cached(&self) -> bool {
        self.value.read().is_some()
    }

    pub(crate) fn get(&self) -> Option<T> {
        self.value.read().clone()
    }

    /// Returns the cached value, populating it first on a miss.
    ///
    /// The flag is `true` when this call ran `populate`. A panicking
    /// `populate` leaves the slot empty.
    pub(crate) fn get_or_populate(&self, populate: impl FnOnce() -> T) -> (T, bool) {
        if let Some(value) = self.value.read().as_ref() {
            return (value.clone(), false);
        }

        let _gate = self.gate.lock();
        if let Some(value) = self.value.read().as_ref() {
            return (value.clone(), false);
        }

        let value = populate();
        *self.value.write() = Some(value.clone());
        (value, true)
    }

    /// Stores `value` without populating; the displaced value is handed back.
    pub(crate) fn set(&self, value: T) -> Option<T> {
        let _gate = self.gate.lock();
        self.value.write().replace(value)
    }

    /// Clears the slot, disposing the outgoing value when a disposer is set.
    ///
    /// Returns `true` if a value was evicted.
    pub(crate) fn invalidate(&self, disposer: Disposer<T>) -> bool {
        let Some(dispose) = disposer else {
            let evicted = self.value.write().take();
            return evicted.is_some();
        };

        if !self.is_cached() {
            return false;
        }

        let _gate = self.gate.lock();
        let mut value = self.value.write();
        match value.take() {
            Some(evicted) => {
                dispose(&evicted);
                true
            }
            None => false,
        }
    }
}

// Copies the current state into fresh locks; the copy diverges from here on.
impl<T: Clone> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            value: RwLock::new(self.get()),
            gate: ReentrantMutex::new(()),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Slot").field(&*self.value.read()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_populates_once() {
        let slot = Slot::new();
        let (value, populated) = slot.get_or_populate(|| 7);
        assert_eq!(value, 7);
        assert!(populated);

        let (value, populated) = slot.get_or_populate(|| unreachable!());
        assert_eq!(value, 7);
        assert!(!populated);
    }

    #[test]
    fn test_clone_diverges() {
        let slot: Slot<i32> = Slot::new();
        let copy = slot.clone();
        slot.get_or_populate(|| 1);

        assert!(slot.is_cached());
        assert!(!copy.is_cached());
    }

    #[test]
    fn test_invalidate_reports_eviction() {
        let slot = Slot::new();
        assert!(!slot.invalidate(None));
        slot.set(3);
        assert!(slot.invalidate(None));
        assert_eq!(slot.get(), None);
    }

    #[test]
    fn test_populate_may_reenter() {
        let slot = Slot::new();
        let (value, populated) = slot.get_or_populate(|| {
            assert_eq!(slot.set(1), None);
            assert!(slot.invalidate(None));
            2
        });
        assert!(populated);
        assert_eq!(value, 2);
        assert_eq!(slot.get(), Some(2));
    }
}
