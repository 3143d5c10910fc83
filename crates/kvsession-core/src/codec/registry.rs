//! Process-wide registry of decodable types.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::{Arc, LazyLock, PoisonError, RwLock},
};

use serde_json::Value;

use super::value::{Kind, SessionValue};
use crate::error::{DecodeError, EncodeError};

type Factory = fn(Value, bool) -> Result<Decoded, DecodeError>;

#[derive(Clone, Copy)]
struct Entry {
    type_id: TypeId,
    factory: Factory,
}

static GLOBAL: LazyLock<Arc<TypeRegistry>> = LazyLock::new(|| Arc::new(TypeRegistry::new()));

/// Set of concrete types the codec can reconstruct, keyed by type tag.
///
/// Grows monotonically. Scalars are known from the start; everything else is
/// added by the codec the first time a value of that type is encoded.
pub struct TypeRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl TypeRegistry {
    /// Create a registry that knows only the scalar types.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            entries: RwLock::new(HashMap::new()),
        };
        registry.preload_scalars();
        registry
    }

    /// The registry shared by every codec in the process.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Make `T` decodable. Returns `true` when `T` was not registered before.
    ///
    /// # Errors
    /// Returns [`EncodeError::TagConflict`] when a different type already owns `T`'s tag.
    pub fn register_if_absent<T: SessionValue>(&self) -> Result<bool, EncodeError> {
        let tag = T::type_tag();
        let type_id = TypeId::of::<T>();

        if let Some(entry) = self.read().get(&tag) {
            return check_owner(&tag, entry, type_id).map(|()| false);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(&tag) {
            // Lost the race to another registration of the same tag.
            return check_owner(&tag, entry, type_id).map(|()| false);
        }
        tracing::debug!(tag = %tag, "registered session value type");
        entries.insert(
            tag,
            Entry {
                type_id,
                factory: reconstruct::<T>,
            },
        );
        Ok(true)
    }

    /// Whether a type tag is decodable.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.read().contains_key(tag)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub(crate) fn reconstruct(
        &self,
        tag: &str,
        data: Value,
        pointer: bool,
    ) -> Result<Decoded, DecodeError> {
        let factory = self
            .read()
            .get(tag)
            .map(|entry| entry.factory)
            .ok_or_else(|| DecodeError::UnknownType(tag.to_string()))?;
        factory(data, pointer)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn preload_scalars(&self) {
        macro_rules! preload {
            ($registry:expr; $($ty:ty),*) => {$(
                let _ = $registry.register_if_absent::<$ty>();
            )*};
        }
        preload!(self; i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool, char, String);
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.read();
        let mut tags: Vec<&str> = entries.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_set().entries(tags).finish()
    }
}

fn check_owner(tag: &str, entry: &Entry, type_id: TypeId) -> Result<(), EncodeError> {
    if entry.type_id == type_id {
        Ok(())
    } else {
        Err(EncodeError::TagConflict(tag.to_string()))
    }
}

fn reconstruct<T: SessionValue>(data: Value, pointer: bool) -> Result<Decoded, DecodeError> {
    let value: T = serde_json::from_value(data).map_err(|source| DecodeError::Data {
        tag: T::type_tag(),
        source,
    })?;
    // Structs only ever leave the store behind a pointer.
    let pointer = pointer || T::KIND == Kind::Struct;
    let value: Box<dyn Any + Send + Sync> = if pointer {
        Box::new(Box::new(value))
    } else {
        Box::new(value)
    };
    Ok(Decoded {
        type_tag: T::type_tag(),
        pointer,
        value,
    })
}

/// A value reconstructed from a blob.
///
/// Pointer values hold a `Box<T>`; downcast to `Box<T>` to get them back.
pub struct Decoded {
    type_tag: String,
    pointer: bool,
    value: Box<dyn Any + Send + Sync>,
}

impl Decoded {
    /// Tag of the concrete type (the pointee's tag for pointers).
    #[must_use]
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Whether the value is a pointer.
    #[must_use]
    pub const fn is_pointer(&self) -> bool {
        self.pointer
    }

    /// Whether the value is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Borrow the value as a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Take the value as a `T`, handing `self` back on a type mismatch.
    ///
    /// # Errors
    /// Returns `self` unchanged when the value is not a `T`.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        let Self {
            type_tag,
            pointer,
            value,
        } = self;
        match value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => Err(Self {
                type_tag,
                pointer,
                value,
            }),
        }
    }
}

impl fmt::Debug for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoded")
            .field("type_tag", &self.type_tag)
            .field("pointer", &self.pointer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cart {
        items: Vec<String>,
    }
    crate::session_struct!(Cart, "registry.Cart");

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Impostor {
        items: Vec<String>,
    }
    crate::session_struct!(Impostor, "registry.Cart");

    #[test]
    fn test_scalars_preloaded() {
        let registry = TypeRegistry::new();
        assert!(registry.contains("i64"));
        assert!(registry.contains("String"));
        assert!(registry.contains("bool"));
        assert!(!registry.contains("registry.Cart"));
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = TypeRegistry::new();
        let before = registry.len();

        assert!(registry.register_if_absent::<Cart>().unwrap());
        assert!(!registry.register_if_absent::<Cart>().unwrap());
        assert_eq!(registry.len(), before + 1);
    }

    #[test]
    fn test_tag_conflict_rejected() {
        let registry = TypeRegistry::new();
        registry.register_if_absent::<Cart>().unwrap();

        let err = registry.register_if_absent::<Impostor>().unwrap_err();
        assert!(matches!(err, EncodeError::TagConflict(tag) if tag == "registry.Cart"));
        assert!(registry.contains("registry.Cart"));
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = TypeRegistry::new();
        let before = registry.len();

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    registry.register_if_absent::<Cart>().unwrap();
                    registry.register_if_absent::<Vec<u32>>().unwrap();
                    assert!(registry.contains("i64"));
                });
            }
        });

        assert_eq!(registry.len(), before + 2);
    }

    #[test]
    fn test_reconstruct_unknown_tag() {
        let registry = TypeRegistry::new();
        let err = registry
            .reconstruct("nope.Missing", Value::Null, true)
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(tag) if tag == "nope.Missing"));
    }

    #[test]
    fn test_decoded_downcast_mismatch_returns_self() {
        let registry = TypeRegistry::new();
        let decoded = registry
            .reconstruct("u16", Value::from(7), false)
            .unwrap();

        let decoded = decoded.downcast::<String>().unwrap_err();
        assert_eq!(decoded.type_tag(), "u16");
        assert_eq!(decoded.downcast::<u16>().unwrap(), 7);
    }
}
