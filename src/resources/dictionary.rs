use std::{
    collections::HashMap,
    fmt::Display,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, ThreadId},
};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::{
    context::{Device, DeviceId, DeviceResource},
    error::{EngineError, Result},
};

/// Creates the resource for one device.
pub type Factory<R> = Arc<dyn Fn(&Device) -> anyhow::Result<R> + Send + Sync>;

/// A shared, device-scoped resource instance.
pub type ResourceHandle<R> = Arc<Loaded<R>>;

/// A resource loaded on one device.
///
/// Handles stay valid as values after their device unloads the resource, but
/// [`get`](Self::get) refuses to hand out the disposed resource.
pub struct Loaded<R> {
    label: String,
    device: DeviceId,
    disposed: AtomicBool,
    value: R,
}

impl<R> Loaded<R> {
    pub fn get(&self) -> Result<&R> {
        if self.is_disposed() {
            return Err(EngineError::Disposed(format!("{} on {}", self.label, self.device)));
        }
        Ok(&self.value)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<R> std::fmt::Debug for Loaded<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loaded")
            .field("label", &self.label)
            .field("device", &self.device)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct Entry<R> {
    resource: ResourceHandle<R>,
    needs_unload: bool,
    seq: u64,
}

enum Slot<R> {
    Loading(ThreadId),
    Ready(Entry<R>),
}

/// Cached slots and reference counts, guarded together.
///
/// A key present in `refs` with a count of zero has lost its last reference
/// while some device still holds or loads it.
struct State<K, R> {
    slots: HashMap<(DeviceId, K), Slot<R>>,
    refs: HashMap<K, usize>,
}

impl<K: Eq + Hash, R> State<K, R> {
    fn set_marks(&mut self, key: &K, needs_unload: bool) {
        self.slots
            .iter_mut()
            .filter(|((_, k), _)| k == key)
            .for_each(|(_, slot)| {
                if let Slot::Ready(entry) = slot {
                    entry.needs_unload = needs_unload;
                }
            });
    }

    /// Forgets an unreferenced key once no device holds it anymore.
    fn prune(&mut self, key: &K) {
        if self.refs.get(key) == Some(&0) && !self.slots.keys().any(|(_, k)| k == key) {
            self.refs.remove(key);
        }
    }
}

/// Lazily constructed, device-scoped resources keyed by `K`.
///
/// The first request for a `(device, key)` pair runs the key's factory; every
/// later request returns the cached instance until the device flushes it.
/// Reference counts are kept per key: releasing the last reference marks the
/// key's entries on all devices for unloading, and the next
/// [`flush`](Self::flush) of a device disposes its marked entries.
pub struct ResourceDictionary<K, R> {
    factories: RwLock<HashMap<K, Factory<R>>>,
    state: Mutex<State<K, R>>,
    loaded: Condvar,
    next_seq: AtomicU64,
}

impl<K, R> ResourceDictionary<K, R>
where
    K: Eq + Hash + Clone + Display,
    R: DeviceResource,
{
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            state: Mutex::new(State {
                slots: HashMap::new(),
                refs: HashMap::new(),
            }),
            loaded: Condvar::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Registers the factory for `key`, replacing (and returning) a previous one.
    ///
    /// Instances already loaded from the old factory stay cached until flushed.
    pub fn register<F>(&self, key: K, factory: F) -> Option<Factory<R>>
    where
        F: Fn(&Device) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        self.factories.write().insert(key, Arc::new(factory))
    }

    pub fn is_registered(&self, key: &K) -> bool {
        self.factories.read().contains_key(key)
    }

    /// Returns the instance for `key` on `device`, loading it with the registered factory.
    pub fn get(&self, device: &Device, key: &K) -> Result<ResourceHandle<R>> {
        let factory = self
            .factories
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::UnknownResource(key.to_string()))?;
        self.get_or_load_with(device, key, |device| (*factory)(device))
    }

    /// Returns the instance for `key` on `device`, loading it with `factory` if it is not cached.
    pub fn get_or_load_with<F>(&self, device: &Device, key: &K, factory: F) -> Result<ResourceHandle<R>>
    where
        F: FnOnce(&Device) -> anyhow::Result<R>,
    {
        let slot_key = (device.id(), key.clone());
        let mut state = self.state.lock();
        loop {
            let loading_on = match state.slots.get(&slot_key) {
                Some(Slot::Ready(entry)) => return Ok(entry.resource.clone()),
                Some(Slot::Loading(owner)) => *owner,
                None => break,
            };
            if loading_on == thread::current().id() {
                return Err(EngineError::CyclicLoad(key.to_string()));
            }
            self.loaded.wait(&mut state);
        }
        state
            .slots
            .insert(slot_key.clone(), Slot::Loading(thread::current().id()));
        drop(state);

        // The factory runs unlocked so it can request its own dependencies.
        let mut guard = LoadGuard {
            dictionary: self,
            slot_key: Some(slot_key.clone()),
        };
        let value = factory(device).map_err(|e| EngineError::load(key, e))?;
        guard.slot_key = None;

        let resource = Arc::new(Loaded {
            label: key.to_string(),
            device: device.id(),
            disposed: AtomicBool::new(false),
            value,
        });
        let mut state = self.state.lock();
        // references may have come and gone while the factory ran
        let entry = Entry {
            resource: resource.clone(),
            needs_unload: state.refs.get(key) == Some(&0),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        state.slots.insert(slot_key, Slot::Ready(entry));
        drop(state);
        self.loaded.notify_all();
        log::debug!("Loaded resource {} on {}", key, device);
        Ok(resource)
    }

    /// Returns the cached instance without loading.
    pub fn peek(&self, device: &Device, key: &K) -> Option<ResourceHandle<R>> {
        match self.state.lock().slots.get(&(device.id(), key.clone())) {
            Some(Slot::Ready(entry)) => Some(entry.resource.clone()),
            _ => None,
        }
    }

    /// Adds a reference to `key`, clearing any pending unload mark.
    pub fn retain(&self, key: &K) -> usize {
        let mut state = self.state.lock();
        let count = state.refs.entry(key.clone()).or_insert(0);
        *count += 1;
        let count = *count;
        if count == 1 {
            state.set_marks(key, false);
        }
        count
    }

    /// Drops a reference to `key`. Releasing the last one marks the key for unloading.
    pub fn release(&self, key: &K) -> Result<usize> {
        let mut state = self.state.lock();
        let count = match state.refs.get_mut(key) {
            Some(count) if *count > 0 => {
                *count -= 1;
                *count
            }
            _ => return Err(EngineError::ResourceRefUnderflow(key.to_string())),
        };
        if count == 0 {
            state.set_marks(key, true);
            state.prune(key);
        }
        Ok(count)
    }

    pub fn ref_count(&self, key: &K) -> usize {
        self.state.lock().refs.get(key).copied().unwrap_or(0)
    }

    /// Marks the instance on `device` for unloading at the next flush.
    ///
    /// Returns `false` if nothing is loaded for the pair.
    pub fn mark_for_unload(&self, device: &Device, key: &K) -> bool {
        match self.state.lock().slots.get_mut(&(device.id(), key.clone())) {
            Some(Slot::Ready(entry)) => {
                entry.needs_unload = true;
                true
            }
            _ => false,
        }
    }

    pub fn needs_unload(&self, device: &Device, key: &K) -> bool {
        matches!(
            self.state.lock().slots.get(&(device.id(), key.clone())),
            Some(Slot::Ready(entry)) if entry.needs_unload
        )
    }

    /// Number of instances cached for `device`.
    pub fn loaded_count(&self, device: &Device) -> usize {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|((id, _), slot)| *id == device.id() && matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Unloads every instance of `device` that is marked, newest first.
    pub fn flush(&self, device: &Device) -> usize {
        self.unload_where(device, |entry| entry.needs_unload)
    }

    /// Unloads every instance of `device`, newest first.
    ///
    /// Factories finish after the dependencies they request, so this tears
    /// resources down before the resources they depend on.
    pub fn unload_all(&self, device: &Device) -> usize {
        self.unload_where(device, |_| true)
    }

    fn unload_where(&self, device: &Device, select: impl Fn(&Entry<R>) -> bool) -> usize {
        let mut doomed = {
            let mut state = self.state.lock();
            let keys: Vec<_> = state
                .slots
                .iter()
                .filter(|((id, _), slot)| {
                    *id == device.id() && matches!(slot, Slot::Ready(entry) if select(entry))
                })
                .map(|(slot_key, _)| slot_key.clone())
                .collect();
            let doomed = keys
                .into_iter()
                .filter_map(|slot_key| match state.slots.remove(&slot_key) {
                    Some(Slot::Ready(entry)) => {
                        entry.resource.disposed.store(true, Ordering::Release);
                        Some((slot_key.1, entry))
                    }
                    Some(loading) => {
                        state.slots.insert(slot_key, loading);
                        None
                    }
                    None => None,
                })
                .collect::<Vec<_>>();
            for (key, _) in &doomed {
                state.prune(key);
            }
            doomed
        };
        doomed.sort_by(|(_, a), (_, b)| b.seq.cmp(&a.seq));
        let count = doomed.len();
        for (key, entry) in doomed {
            if let Err(e) = entry.resource.value.unload(device) {
                log::error!("Unloading {} on {} failed: {:#}", key, device, e);
            } else {
                log::debug!("Unloaded resource {} on {}", key, device);
            }
        }
        count
    }
}

impl<K, R> std::fmt::Debug for ResourceDictionary<K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResourceDictionary")
            .field("factories", &self.factories.read().len())
            .field("slots", &state.slots.len())
            .field("referenced", &state.refs.len())
            .finish()
    }
}

impl<K, R> Default for ResourceDictionary<K, R>
where
    K: Eq + Hash + Clone + Display,
    R: DeviceResource,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Clears a `Loading` slot if the factory fails or panics, waking up waiters.
struct LoadGuard<'a, K, R>
where
    K: Eq + Hash,
{
    dictionary: &'a ResourceDictionary<K, R>,
    slot_key: Option<(DeviceId, K)>,
}

impl<K, R> Drop for LoadGuard<'_, K, R>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if let Some(slot_key) = self.slot_key.take() {
            let mut state = self.dictionary.state.lock();
            state.slots.remove(&slot_key);
            state.prune(&slot_key.1);
            drop(state);
            self.dictionary.loaded.notify_all();
        }
    }
}
