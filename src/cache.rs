//! Run-scoped entity cache. The first caller of [`EntityCache::resolve_or_fetch`]
//! for a key runs the fetch; concurrent callers for that key wait and share its
//! result. Confirmed absences are cached too.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::{Condvar, Mutex};

use crate::model::{EntityId, EntityKind, RemoteEntity};

pub type SharedEntity = Arc<Mutex<RemoteEntity>>;

pub fn share(entity: RemoteEntity) -> SharedEntity {
    Arc::new(Mutex::new(entity))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Label {
        kind: EntityKind,
        label: String,
        language: String,
    },
    Statement {
        property: EntityId,
        value: String,
    },
}

impl CacheKey {
    pub fn label(kind: EntityKind, label: &str, language: &str) -> Self {
        CacheKey::Label {
            kind,
            label: label.to_string(),
            language: language.to_string(),
        }
    }

    pub fn statement(property: &EntityId, value: &str) -> Self {
        CacheKey::Statement {
            property: property.clone(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Label {
                kind,
                label,
                language,
            } => write!(f, "{kind} '{label}'@{language}"),
            CacheKey::Statement { property, value } => write!(f, "{property}='{value}'"),
        }
    }
}

enum Slot {
    Ready(Option<SharedEntity>),
    InFlight(Arc<Flight>),
}

#[derive(Default)]
struct Flight {
    done: Mutex<bool>,
    signal: Condvar,
}

impl Flight {
    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.signal.wait(&mut done);
        }
    }

    fn finish(&self) {
        *self.done.lock() = true;
        self.signal.notify_all();
    }
}

/// Releases waiters even when the fetch unwinds; the slot is cleared so the
/// next caller retries instead of blocking forever.
struct FlightGuard<'a> {
    cache: &'a EntityCache,
    key: &'a CacheKey,
    flight: Arc<Flight>,
    completed: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            let mut slots = self.cache.slots.lock();
            let ours = match slots.get(self.key) {
                Some(Slot::InFlight(flight)) => Arc::ptr_eq(flight, &self.flight),
                _ => false,
            };
            if ours {
                slots.remove(self.key);
            }
        }
        self.flight.finish();
    }
}

#[derive(Default)]
pub struct EntityCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached entity, if one has been resolved. Absent markers and
    /// in-flight keys both read as `None`.
    pub fn lookup(&self, key: &CacheKey) -> Option<SharedEntity> {
        match self.slots.lock().get(key) {
            Some(Slot::Ready(entity)) => entity.clone(),
            _ => None,
        }
    }

    /// Whether `key` has been resolved as absent during this run.
    pub fn is_known_absent(&self, key: &CacheKey) -> bool {
        matches!(self.slots.lock().get(key), Some(Slot::Ready(None)))
    }

    /// Records `entity` under `key`, replacing an absent marker if present.
    pub fn put(&self, key: CacheKey, entity: SharedEntity) {
        self.slots.lock().insert(key, Slot::Ready(Some(entity)));
    }

    /// Returns the cached resolution for `key`, or runs `fetch` exactly once
    /// across all concurrent callers and caches what it returns. Errors are
    /// not cached; the next caller fetches again.
    pub fn resolve_or_fetch<F, E>(
        &self,
        key: &CacheKey,
        fetch: F,
    ) -> Result<Option<SharedEntity>, E>
    where
        F: FnOnce() -> Result<Option<SharedEntity>, E>,
    {
        let flight = loop {
            let mut slots = self.slots.lock();
            let pending = match slots.get(key) {
                Some(Slot::Ready(entity)) => return Ok(entity.clone()),
                Some(Slot::InFlight(flight)) => Some(Arc::clone(flight)),
                None => None,
            };
            match pending {
                Some(flight) => {
                    drop(slots);
                    flight.wait();
                }
                None => {
                    let flight = Arc::new(Flight::default());
                    slots.insert(key.clone(), Slot::InFlight(Arc::clone(&flight)));
                    break flight;
                }
            }
        };

        let mut guard = FlightGuard {
            cache: self,
            key,
            flight,
            completed: false,
        };
        let result = fetch();
        if let Ok(entity) = &result {
            let mut slots = self.slots.lock();
            // A `put` during the fetch (e.g. the fetch cached its own result) wins.
            let still_ours = match slots.get(key) {
                Some(Slot::InFlight(f)) => Arc::ptr_eq(f, &guard.flight),
                _ => false,
            };
            if still_ours {
                slots.insert(key.clone(), Slot::Ready(entity.clone()));
            }
            guard.completed = true;
        }
        drop(guard);
        result
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
