//! Type-preserving value codec.
//!
//! Blobs are self-describing JSON envelopes:
//!
//! ```text
//! {"type": "app.User", "pointer": true, "data": {"name": "a"}}
//! ```
//!
//! `type` names a registered type, `pointer` records whether the value was
//! boxed, and `data` is the value itself.

mod registry;
mod value;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use registry::{Decoded, TypeRegistry};
pub use value::{Kind, SessionValue};

use crate::error::{DecodeError, EncodeError};

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    #[serde(rename = "type")]
    type_tag: &'a str,
    pointer: bool,
    data: &'a Value,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(default)]
    pointer: bool,
    data: Value,
}

/// Encodes session values into blobs and back.
#[derive(Debug, Clone)]
pub struct ValueCodec {
    registry: Arc<TypeRegistry>,
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueCodec {
    /// Codec backed by the process-wide registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: TypeRegistry::global(),
        }
    }

    /// Codec backed by its own registry.
    #[must_use]
    pub fn with_registry(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this codec records types in.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Encode a value, registering its type for later decoding.
    ///
    /// Structs must be passed boxed; bare structs are rejected so the
    /// pointer shape survives the round trip.
    ///
    /// # Errors
    /// Returns [`EncodeError`] for bare structs, unsupported shapes, tag
    /// conflicts, serialization failures and values JSON cannot carry
    /// (non-finite floats).
    pub fn encode<T: SessionValue>(&self, value: &T) -> Result<Vec<u8>, EncodeError> {
        let (type_tag, pointer) = match T::KIND {
            Kind::Struct => return Err(EncodeError::BareStruct(T::type_tag())),
            Kind::Unsupported => return Err(EncodeError::Unsupported(T::type_tag())),
            Kind::Pointer => {
                if matches!(
                    <T::Target as SessionValue>::KIND,
                    Kind::Pointer | Kind::Unsupported
                ) {
                    return Err(EncodeError::Unsupported(T::type_tag()));
                }
                self.registry.register_if_absent::<T::Target>()?;
                (<T::Target as SessionValue>::type_tag(), true)
            }
            Kind::Sequence | Kind::Mapping => {
                self.registry.register_if_absent::<T>()?;
                (T::type_tag(), false)
            }
            Kind::Scalar => (T::type_tag(), false),
        };

        let data = serde_json::to_value(value).map_err(|source| EncodeError::Serialize {
            tag: type_tag.clone(),
            source,
        })?;
        // JSON has no NaN or infinity; such floats serialize as null.
        T::deserialize(&data).map_err(|source| EncodeError::Lossy {
            tag: type_tag.clone(),
            source,
        })?;

        let envelope = EnvelopeRef {
            type_tag: &type_tag,
            pointer,
            data: &data,
        };
        serde_json::to_vec(&envelope).map_err(|source| EncodeError::Serialize {
            tag: type_tag.clone(),
            source,
        })
    }

    /// Decode a blob into the exact type it was encoded from.
    ///
    /// # Errors
    /// Returns [`DecodeError`] for corrupt blobs, unregistered types and data
    /// that no longer fits the registered type.
    pub fn decode(&self, bytes: &[u8]) -> Result<Decoded, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;
        self.registry
            .reconstruct(&envelope.type_tag, envelope.data, envelope.pointer)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use serde::{Deserialize, Serialize};
    use tokio_test::assert_err;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
        age: u32,
    }
    crate::session_struct!(User, "codec.User");

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Preferences {
        theme: String,
    }
    crate::session_struct!(Preferences);

    fn isolated() -> ValueCodec {
        ValueCodec::with_registry(Arc::new(TypeRegistry::new()))
    }

    #[test]
    fn test_pointer_to_struct_roundtrip() {
        let codec = isolated();
        let user = Box::new(User {
            name: "a".to_string(),
            age: 31,
        });

        let blob = codec.encode(&user).unwrap();
        let decoded = codec.decode(&blob).unwrap();

        assert!(decoded.is_pointer());
        assert_eq!(decoded.type_tag(), "codec.User");
        assert_eq!(decoded.downcast::<Box<User>>().unwrap(), user);
    }

    #[test]
    fn test_scalar_roundtrip() {
        let codec = isolated();

        let decoded = codec.decode(&codec.encode(&42i64).unwrap()).unwrap();
        assert!(!decoded.is_pointer());
        assert_eq!(decoded.downcast_ref::<i64>(), Some(&42));
        assert!(!decoded.is::<i32>());

        let decoded = codec
            .decode(&codec.encode(&"hello".to_string()).unwrap())
            .unwrap();
        assert_eq!(decoded.downcast::<String>().unwrap(), "hello");

        let decoded = codec.decode(&codec.encode(&true).unwrap()).unwrap();
        assert!(decoded.downcast::<bool>().unwrap());

        let decoded = codec.decode(&codec.encode(&2.5f32).unwrap()).unwrap();
        assert_eq!(decoded.downcast::<f32>().unwrap(), 2.5);
    }

    #[test]
    fn test_sequence_and_mapping_roundtrip() {
        let codec = isolated();

        let ids = vec![3u64, 1, 2];
        let decoded = codec.decode(&codec.encode(&ids).unwrap()).unwrap();
        assert_eq!(decoded.type_tag(), "Vec<u64>");
        assert_eq!(decoded.downcast::<Vec<u64>>().unwrap(), ids);

        let mut flags = HashMap::new();
        flags.insert("beta".to_string(), true);
        flags.insert("dark".to_string(), false);
        let decoded = codec.decode(&codec.encode(&flags).unwrap()).unwrap();
        assert!(!decoded.is_pointer());
        assert_eq!(decoded.downcast::<HashMap<String, bool>>().unwrap(), flags);

        let mut scores = BTreeMap::new();
        scores.insert("x".to_string(), vec![1i32, 2]);
        let decoded = codec.decode(&codec.encode(&scores).unwrap()).unwrap();
        assert_eq!(
            decoded.downcast::<BTreeMap<String, Vec<i32>>>().unwrap(),
            scores
        );
    }

    #[test]
    fn test_sequence_of_structs_roundtrip() {
        let codec = isolated();
        let users = vec![
            User {
                name: "a".to_string(),
                age: 1,
            },
            User {
                name: "b".to_string(),
                age: 2,
            },
        ];

        let decoded = codec.decode(&codec.encode(&users).unwrap()).unwrap();
        assert_eq!(decoded.type_tag(), "Vec<codec.User>");
        assert_eq!(decoded.downcast::<Vec<User>>().unwrap(), users);
    }

    #[test]
    fn test_boxed_scalar_keeps_pointer() {
        let codec = isolated();

        let decoded = codec.decode(&codec.encode(&Box::new(7u8)).unwrap()).unwrap();
        assert!(decoded.is_pointer());
        assert_eq!(decoded.downcast::<Box<u8>>().unwrap(), Box::new(7));
    }

    #[test]
    fn test_repeated_encode_of_same_type() {
        let codec = isolated();
        let before = codec.registry().len();

        for age in 0..3 {
            let user = Box::new(User {
                name: "x".to_string(),
                age,
            });
            let decoded = codec.decode(&codec.encode(&user).unwrap()).unwrap();
            assert_eq!(decoded.downcast::<Box<User>>().unwrap().age, age);
        }
        assert_eq!(codec.registry().len(), before + 1);
    }

    #[test]
    fn test_bare_struct_rejected() {
        let codec = isolated();
        let prefs = Preferences {
            theme: "dark".to_string(),
        };

        let err = codec.encode(&prefs).unwrap_err();
        assert!(matches!(err, EncodeError::BareStruct(tag) if tag == "Preferences"));
        assert!(!codec.registry().contains("Preferences"));
    }

    #[test]
    fn test_unsupported_shapes_rejected() {
        let codec = isolated();

        let err = codec.encode(&[1u8, 2, 3]).unwrap_err();
        assert!(matches!(err, EncodeError::Unsupported(tag) if tag == "[u8;3]"));
        assert_err!(codec.encode(&()));
        assert_err!(codec.encode(&Box::new(())));
        assert_err!(codec.encode(&Box::new(Box::new(1i32))));
    }

    #[test]
    fn test_non_finite_floats_rejected() {
        let codec = isolated();

        let err = codec.encode(&f64::NAN).unwrap_err();
        assert!(matches!(err, EncodeError::Lossy { ref tag, .. } if tag == "f64"));
        assert_err!(codec.encode(&f32::INFINITY));
        assert_err!(codec.encode(&vec![1.0f64, f64::NEG_INFINITY]));
        assert_err!(codec.encode(&Box::new(f64::NAN)));

        let decoded = codec.decode(&codec.encode(&-0.25f64).unwrap()).unwrap();
        assert_eq!(decoded.downcast::<f64>().unwrap(), -0.25);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let writer = isolated();
        let reader = isolated();
        let blob = writer
            .encode(&Box::new(Preferences {
                theme: "light".to_string(),
            }))
            .unwrap();

        let err = reader.decode(&blob).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(tag) if tag == "Preferences"));
    }

    #[test]
    fn test_struct_without_pointer_flag_decodes_as_pointer() {
        let codec = isolated();
        codec.registry().register_if_absent::<User>().unwrap();

        let decoded = codec
            .decode(br#"{"type":"codec.User","data":{"name":"z","age":9}}"#)
            .unwrap();
        assert!(decoded.is_pointer());
        assert_eq!(decoded.downcast_ref::<Box<User>>().unwrap().name, "z");
    }

    #[test]
    fn test_corrupt_blobs_rejected() {
        let codec = isolated();

        assert!(matches!(
            codec.decode(b"not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            codec.decode(br#"{"type":"i64","pointer":false,"data":"seven"}"#),
            Err(DecodeError::Data { .. })
        ));
    }

    #[test]
    fn test_global_registry_shared() {
        let first = ValueCodec::new();
        let second = ValueCodec::default();
        let blob = first.encode(&vec!["shared".to_string()]).unwrap();

        let decoded = second.decode(&blob).unwrap();
        assert_eq!(decoded.downcast::<Vec<String>>().unwrap(), vec!["shared"]);
    }
}
