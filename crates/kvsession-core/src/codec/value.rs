//! Value shapes the codec understands.

use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
};

use serde::{Serialize, de::DeserializeOwned};

/// Shape of a value, deciding how it is registered and returned on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Numbers, booleans, characters and text. Always decodable.
    Scalar,
    /// Application aggregate. Must be encoded behind a pointer.
    Struct,
    /// Ordered sequence.
    Sequence,
    /// Keyed mapping.
    Mapping,
    /// Owning pointer to another value.
    Pointer,
    /// Shape the codec refuses to store.
    Unsupported,
}

/// A value that can be stored in a session and reconstructed without a type hint.
///
/// Application structs opt in through [`session_struct!`](crate::session_struct).
pub trait SessionValue: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Shape of the value.
    const KIND: Kind;

    /// The pointee for pointers, `Self` for everything else.
    type Target: SessionValue;

    /// Stable identity written into every blob.
    fn type_tag() -> String;
}

macro_rules! scalar_values {
    ($($ty:ty),* $(,)?) => {$(
        impl SessionValue for $ty {
            const KIND: Kind = Kind::Scalar;
            type Target = Self;

            fn type_tag() -> String {
                stringify!($ty).to_string()
            }
        }
    )*};
}

scalar_values!(
    i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool, char, String,
);

impl<T: SessionValue> SessionValue for Vec<T> {
    const KIND: Kind = Kind::Sequence;
    type Target = Self;

    fn type_tag() -> String {
        format!("Vec<{}>", T::type_tag())
    }
}

impl<K, V> SessionValue for HashMap<K, V>
where
    K: SessionValue + Eq + Hash,
    V: SessionValue,
{
    const KIND: Kind = Kind::Mapping;
    type Target = Self;

    fn type_tag() -> String {
        format!("HashMap<{},{}>", K::type_tag(), V::type_tag())
    }
}

impl<K, V> SessionValue for BTreeMap<K, V>
where
    K: SessionValue + Ord,
    V: SessionValue,
{
    const KIND: Kind = Kind::Mapping;
    type Target = Self;

    fn type_tag() -> String {
        format!("BTreeMap<{},{}>", K::type_tag(), V::type_tag())
    }
}

impl<T: SessionValue> SessionValue for Box<T> {
    const KIND: Kind = Kind::Pointer;
    type Target = T;

    fn type_tag() -> String {
        format!("*{}", T::type_tag())
    }
}

// Fixed-size arrays and the unit type serialize fine but are not storable shapes.
impl<T, const N: usize> SessionValue for [T; N]
where
    T: SessionValue,
    [T; N]: Serialize + DeserializeOwned,
{
    const KIND: Kind = Kind::Unsupported;
    type Target = Self;

    fn type_tag() -> String {
        format!("[{};{N}]", T::type_tag())
    }
}

impl SessionValue for () {
    const KIND: Kind = Kind::Unsupported;
    type Target = Self;

    fn type_tag() -> String {
        "()".to_string()
    }
}

/// Declare an application type as a storable struct.
///
/// The optional second argument sets the tag written into blobs; it defaults
/// to the type's name and must stay stable for stored sessions to decode.
///
/// ```
/// use kvsession_core::session_struct;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     name: String,
/// }
///
/// session_struct!(User, "app.User");
/// ```
#[macro_export]
macro_rules! session_struct {
    ($ty:ty) => {
        $crate::session_struct!($ty, ::std::stringify!($ty));
    };
    ($ty:ty, $tag:expr) => {
        impl $crate::codec::SessionValue for $ty {
            const KIND: $crate::codec::Kind = $crate::codec::Kind::Struct;
            type Target = Self;

            fn type_tag() -> ::std::string::String {
                ::std::string::String::from($tag)
            }
        }
    };
}
