//! CBOR serialization helpers for frame bodies.
//!
//! Wraps [`ciborium`] (RFC 8949). Struct fields are encoded in declaration
//! order, which keeps frame bodies stable across builds.

use serde::{de::DeserializeOwned, Serialize};

use crate::TransportError;

/// Serialize a value to CBOR bytes, naming the type in any error.
///
/// # Errors
///
/// Returns [`TransportError::Serialization`] if the value cannot be serialized.
pub fn to_vec_named<T: Serialize>(value: &T, type_name: &str) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| {
        TransportError::Serialization(format!(
            "CBOR serialization of {type_name} failed: {e}"
        ))
    })?;
    Ok(buf)
}

/// Deserialize a value from CBOR bytes, naming the type in any error.
///
/// # Errors
///
/// Returns [`TransportError::Deserialization`] if the bytes cannot be deserialized
/// into the target type.
pub fn from_slice_named<T: DeserializeOwned>(
    data: &[u8],
    type_name: &str,
) -> Result<T, TransportError> {
    ciborium::from_reader(data).map_err(|e| {
        TransportError::Deserialization(format!(
            "CBOR deserialization of {type_name} failed: {e}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SecConf;

    #[test]
    fn test_roundtrip_named() {
        let conf = SecConf {
            src_index: 3,
            sid: "TVSS_3_0".to_string(),
        };
        let bytes = to_vec_named(&conf, "SecConf").expect("serialize");
        let restored: SecConf = from_slice_named(&bytes, "SecConf").expect("deserialize");
        assert_eq!(restored, conf);
    }

    #[test]
    fn test_invalid_data_names_type() {
        let result: Result<SecConf, _> = from_slice_named(&[0xFF, 0xFF, 0xFF], "SecConf");
        let err = result.expect_err("garbage must not decode");
        assert!(err.to_string().contains("SecConf"));
    }

    #[test]
    fn test_empty_data_returns_error() {
        let result: Result<SecConf, _> = from_slice_named(&[], "SecConf");
        assert!(result.is_err());
    }
}
