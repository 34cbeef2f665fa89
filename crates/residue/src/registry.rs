//! Live-object registry.
//!
//! One mutex guards the whole registry. It is held only for the hash
//! insert/remove or for the copy taken by [`LiveRegistry::snapshot`];
//! sorting, formatting and logging always happen after the guard is gone.

use parking_lot::Mutex;
use residue_types::{Checkpoint, ObjectKey, ObjectLog, ObjectRecord, TypeKey};
use std::collections::HashMap;
use std::sync::Arc;

/// Metadata kept for one tracked object. Never holds a reference to the
/// object itself.
#[derive(Debug, Clone)]
pub struct Entry {
    pub object: ObjectKey,
    pub ty: TypeKey,
    pub type_name: Arc<str>,
    pub label: Option<String>,
    pub generation: u64,
}

impl Entry {
    pub fn to_record(&self) -> ObjectRecord {
        ObjectRecord {
            type_name: self.type_name.to_string(),
            object: self.object,
            label: self.label.clone(),
            generation: self.generation,
        }
    }
}

// ── Activity window ──────────────────────────────────────
//
// While tracking is active, every add lands in `created` and every remove
// either cancels a `created` entry from the same window or lands in
// `removed`.

#[derive(Default)]
struct Activity {
    created: HashMap<ObjectKey, (u64, Arc<str>)>,
    removed: Vec<(Arc<str>, ObjectKey)>,
}

impl Activity {
    fn record_removed(&mut self, entry: &Entry) {
        if self.created.remove(&entry.object).is_none() {
            self.removed.push((entry.type_name.clone(), entry.object));
        }
    }
}

#[derive(Default)]
struct State {
    live: HashMap<ObjectKey, Entry>,
    next_generation: u64,
    activity: Option<Activity>,
    closed: bool,
}

#[derive(Default)]
pub struct LiveRegistry {
    state: Mutex<State>,
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry for `object`.
    ///
    /// If `object` is already present the old entry is replaced and handed
    /// back so the caller can report the anomaly outside the lock. Ignored
    /// once the registry has been drained.
    pub fn add(
        &self,
        object: ObjectKey,
        ty: TypeKey,
        type_name: Arc<str>,
        label: Option<String>,
    ) -> Option<Entry> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.next_generation += 1;
        let generation = state.next_generation;
        let displaced = state.live.insert(
            object,
            Entry {
                object,
                ty,
                type_name: type_name.clone(),
                label,
                generation,
            },
        );
        if let Some(activity) = state.activity.as_mut() {
            if let Some(previous) = &displaced {
                activity.record_removed(previous);
            }
            activity.created.insert(object, (generation, type_name));
        }
        displaced
    }

    /// Remove the entry for `object`, if any. Absence is not an error.
    pub fn remove(&self, object: ObjectKey) -> Option<Entry> {
        let mut state = self.state.lock();
        let removed = state.live.remove(&object)?;
        if let Some(activity) = state.activity.as_mut() {
            activity.record_removed(&removed);
        }
        Some(removed)
    }

    pub fn contains(&self, object: ObjectKey) -> bool {
        self.state.lock().live.contains_key(&object)
    }

    pub fn len(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of every entry, oldest first.
    pub fn snapshot(&self) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self.state.lock().live.values().cloned().collect();
        entries.sort_unstable_by_key(|entry| entry.generation);
        entries
    }

    /// Empty the registry for good and return what was in it, oldest first.
    /// Also ends any activity window; later adds are dropped.
    pub fn drain(&self) -> Vec<Entry> {
        let live = {
            let mut state = self.state.lock();
            state.closed = true;
            state.activity = None;
            std::mem::take(&mut state.live)
        };
        let mut entries: Vec<Entry> = live.into_values().collect();
        entries.sort_unstable_by_key(|entry| entry.generation);
        entries
    }

    /// Open an activity window. Returns `false` if one is already open.
    pub fn start_activity(&self) -> bool {
        let mut state = self.state.lock();
        if state.activity.is_some() {
            return false;
        }
        state.activity = Some(Activity::default());
        true
    }

    /// Close the current activity window. Returns `false` if none was open.
    pub fn stop_activity(&self) -> bool {
        self.state.lock().activity.take().is_some()
    }

    /// Take the objects created and removed since the last checkpoint and
    /// start a new window. `None` if no window is open.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        let window = {
            let mut state = self.state.lock();
            std::mem::take(state.activity.as_mut()?)
        };

        let mut created: Vec<(ObjectKey, (u64, Arc<str>))> = window.created.into_iter().collect();
        created.sort_unstable_by_key(|(_, (generation, _))| *generation);

        Some(Checkpoint {
            created: created
                .into_iter()
                .map(|(object, (_, type_name))| ObjectLog {
                    type_name: type_name.to_string(),
                    object,
                })
                .collect(),
            removed: window
                .removed
                .into_iter()
                .map(|(type_name, object)| ObjectLog {
                    type_name: type_name.to_string(),
                    object,
                })
                .collect(),
        })
    }
}
