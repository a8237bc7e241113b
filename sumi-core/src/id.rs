//! # IDs
//! Two kinds of identity live here, and they must never be confused:
//!
//! * [`RuntimeId<T>`] is unique within one execution of the program, namespaced by the
//!   type `T`. Cheap to mint, never persisted. Used for in-flight entities - strokes,
//!   gestures - whose identity does not outlive the session.
//! * [`TextureId`] is a persistent identity, stable across sessions. It names texture
//!   records in a repository and doubles as the on-disk file name. Layers are keyed by
//!   the `TextureId` of their committed texture.

// Collection of counters by namespace type.
// A RwLock'd BTreeMap from TypeId to the next available runtime ID.
static ID_SERVER: parking_lot::RwLock<
    std::collections::BTreeMap<std::any::TypeId, std::sync::atomic::AtomicU64>,
> = parking_lot::const_rwlock(std::collections::BTreeMap::new());

/// ID that is guaranteed unique within this execution of the program.
/// IDs with different namespace types may share a value but are distinct types.
pub struct RuntimeId<T: std::any::Any> {
    id: std::num::NonZeroU64,
    // Namespace marker
    _phantom: std::marker::PhantomData<T>,
}
impl<T: std::any::Any> Clone for RuntimeId<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: std::any::Any> Copy for RuntimeId<T> {}
impl<T: std::any::Any> PartialEq for RuntimeId<T> {
    fn eq(&self, other: &Self) -> bool {
        // Namespace equality is checked at compile time.
        self.id == other.id
    }
}
impl<T: std::any::Any> Eq for RuntimeId<T> {}

// Safety - it's just a u64. If T is !Send or !Sync that would be carried
// over to the ID even though no T is ever stored.
unsafe impl<T: std::any::Any> Send for RuntimeId<T> {}
unsafe impl<T: std::any::Any> Sync for RuntimeId<T> {}

impl<T: std::any::Any> std::hash::Hash for RuntimeId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::any::TypeId::of::<T>().hash(state);
        self.id.hash(state);
    }
}
impl<T: std::any::Any> RuntimeId<T> {
    /// Get the raw numeric value. IDs from differing namespaces may share it!
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id.get()
    }
    /// Mint the next ID of this namespace.
    ///
    /// Exhausting all `u64::MAX - 1` values terminates the program - at one
    /// allocation per nanosecond that takes five centuries, so no recovery
    /// path is provided.
    #[must_use]
    pub fn next() -> Self {
        let raw = {
            let read = ID_SERVER.upgradable_read();
            let ty = std::any::TypeId::of::<T>();
            if let Some(atomic) = read.get(&ty) {
                // Order is irrelevant, only uniqueness.
                atomic.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            } else {
                // First allocation of this namespace - transition to exclusive access.
                // Happens at most a handful of times per program run.
                let mut write = parking_lot::RwLockUpgradableReadGuard::upgrade(read);
                write.insert(ty, 2.into());
                1
            }
        };
        match std::num::NonZeroU64::new(raw) {
            Some(id) => Self {
                id,
                _phantom: std::marker::PhantomData,
            },
            // Wrapped around to zero - global state is unfixably borked.
            None => {
                #[cfg(not(test))]
                {
                    log::error!("{} ID overflow! Aborting!", std::any::type_name::<T>());
                    log::logger().flush();
                    std::process::abort();
                }
                #[cfg(test)]
                {
                    panic!("{} ID overflow! Aborting!", std::any::type_name::<T>())
                }
            }
        }
    }
}
impl<T: std::any::Any> Default for RuntimeId<T> {
    fn default() -> Self {
        Self::next()
    }
}
impl<T: std::any::Any> std::fmt::Display for RuntimeId<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Unwrap is safe - rsplit always yields at least one element.
        write!(
            f,
            "{}#{}",
            std::any::type_name::<T>().rsplit("::").next().unwrap(),
            self.id
        )
    }
}
impl<T: std::any::Any> std::fmt::Debug for RuntimeId<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

/// A persistent identity for a texture record, stable across sessions and
/// shareable between repositories.
///
/// Prints as 32 lowercase hex digits, which is also the on-disk file name of
/// the record. Randomized (v4) rather than sequential so that ids minted in
/// different sessions never collide.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TextureId(uuid::Uuid);
impl TextureId {
    /// Mint a fresh, globally-unique id.
    #[must_use]
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }
    /// The file name this texture is stored under by a disk repository.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.0.simple().to_string()
    }
    /// Inverse of [`Self::file_name`]. `None` if the name is not 32 hex digits.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        // `parse_str` also accepts hyphenated and braced forms which are not
        // valid repository file names.
        if name.len() != 32 {
            return None;
        }
        uuid::Uuid::try_parse(name).ok().map(Self)
    }
}
impl std::fmt::Display for TextureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}
impl std::fmt::Debug for TextureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TextureId({})", self.0.simple())
    }
}
