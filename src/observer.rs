use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Handle returned by observer registration, used for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl ObserverId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Callbacks keyed by [`ObserverId`]
///
/// Delivery snapshots the list and runs callbacks without holding the lock,
/// so a callback may add or remove observers (including itself).
pub struct ObserverRegistry<T: ?Sized> {
    entries: Mutex<Vec<(ObserverId, Callback<T>)>>,
}

impl<T: ?Sized> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn add<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ObserverId::new();
        self.lock().push((id, Arc::new(callback)));
        id
    }

    /// Returns false when `id` was not registered
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn notify(&self, event: &T) {
        let snapshot: Vec<Callback<T>> = self.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in snapshot {
            callback(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ObserverId, Callback<T>)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T: ?Sized> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn removed_observer_stops_receiving() {
        let registry: ObserverRegistry<str> = ObserverRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = registry.add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify("a");
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        registry.notify("b");

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_can_unregister_itself_without_deadlock() {
        let registry: Arc<ObserverRegistry<u32>> = Arc::new(ObserverRegistry::new());
        let slot: Arc<Mutex<Option<ObserverId>>> = Arc::new(Mutex::new(None));

        let reg = registry.clone();
        let own_id = slot.clone();
        let id = registry.add(move |_| {
            if let Some(id) = *own_id.lock().unwrap() {
                reg.remove(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        registry.notify(&1);
        // Already gone
        assert!(!registry.remove(id));
    }

    #[test]
    fn every_observer_sees_events_in_order() {
        let registry: ObserverRegistry<u32> = ObserverRegistry::new();
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));
        let (sink_a, sink_b) = (a.clone(), b.clone());
        registry.add(move |n| sink_a.lock().unwrap().push(*n));
        registry.add(move |n| sink_b.lock().unwrap().push(*n));

        for n in 0..5 {
            registry.notify(&n);
        }

        assert_eq!(*a.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(*a.lock().unwrap(), *b.lock().unwrap());
    }
}
