//! Metadata value types and validation.
//!
//! Metadata is a small string-keyed map of scalar values attached to each
//! document. The core treats it as opaque payload: it is validated on the
//! way in, stored, matched against filters, and returned verbatim.
//!
//! # Serialization Format
//!
//! Values serialize to JSON using an adjacently-tagged representation:
//!
//! ```json
//! {"type": "string", "value": "hello"}
//! {"type": "integer", "value": 42}
//! {"type": "float", "value": 2.5}
//! {"type": "boolean", "value": true}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Maximum number of metadata keys per document.
pub const MAX_KEYS_PER_DOC: usize = 64;

/// Maximum metadata key length in bytes.
pub const MAX_KEY_LEN: usize = 256;

/// Maximum metadata string value length in bytes.
pub const MAX_STRING_LEN: usize = 65_536;

/// A scalar metadata value.
///
/// # Example
///
/// ```rust
/// use docvec::MetadataValue;
///
/// let title = MetadataValue::String("Document Title".to_string());
/// let json = serde_json::to_string(&MetadataValue::Integer(42)).unwrap();
/// assert_eq!(json, r#"{"type":"integer","value":42}"#);
/// # drop(title);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    /// UTF-8 string value (max 65,536 bytes).
    String(String),

    /// 64-bit signed integer.
    Integer(i64),

    /// 64-bit IEEE 754 floating point. NaN and infinities are rejected
    /// during validation.
    Float(f64),

    /// Boolean flag.
    Boolean(bool),
}

impl MetadataValue {
    /// Returns the string payload, if this is a `String`.
    #[must_use]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an `Integer`.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

/// Validation failures for document metadata.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    /// Key is the empty string.
    #[error("metadata key must not be empty")]
    EmptyKey,

    /// Key exceeds [`MAX_KEY_LEN`] bytes.
    #[error("metadata key '{key}' exceeds {max} bytes")]
    KeyTooLong {
        /// The offending key (truncated for display).
        key: String,
        /// The limit.
        max: usize,
    },

    /// Key contains a character outside `[A-Za-z0-9_.-]`.
    #[error("metadata key '{key}' contains invalid characters")]
    InvalidKeyChar {
        /// The offending key.
        key: String,
    },

    /// More than [`MAX_KEYS_PER_DOC`] keys on one document.
    #[error("too many metadata keys: {count} (max {max})")]
    TooManyKeys {
        /// Number of keys supplied.
        count: usize,
        /// The limit.
        max: usize,
    },

    /// String value exceeds [`MAX_STRING_LEN`] bytes.
    #[error("metadata value for '{key}' exceeds {max} bytes")]
    StringTooLong {
        /// The key whose value is too long.
        key: String,
        /// The limit.
        max: usize,
    },

    /// Float value is NaN or infinite.
    #[error("metadata value for '{key}' is not a finite number")]
    NonFiniteFloat {
        /// The key whose value is non-finite.
        key: String,
    },
}

/// Validates a metadata map against the key and value limits.
///
/// # Errors
///
/// Returns the first violation found, keyed to the offending entry.
pub fn validate_metadata(
    metadata: &BTreeMap<String, MetadataValue>,
) -> Result<(), MetadataError> {
    if metadata.len() > MAX_KEYS_PER_DOC {
        return Err(MetadataError::TooManyKeys {
            count: metadata.len(),
            max: MAX_KEYS_PER_DOC,
        });
    }

    for (key, value) in metadata {
        if key.is_empty() {
            return Err(MetadataError::EmptyKey);
        }
        if key.len() > MAX_KEY_LEN {
            return Err(MetadataError::KeyTooLong {
                key: key.chars().take(32).collect(),
                max: MAX_KEY_LEN,
            });
        }
        if !key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-')
        {
            return Err(MetadataError::InvalidKeyChar { key: key.clone() });
        }

        match value {
            MetadataValue::String(s) if s.len() > MAX_STRING_LEN => {
                return Err(MetadataError::StringTooLong {
                    key: key.clone(),
                    max: MAX_STRING_LEN,
                });
            }
            MetadataValue::Float(f) if !f.is_finite() => {
                return Err(MetadataError::NonFiniteFloat { key: key.clone() });
            }
            _ => {}
        }
    }

    Ok(())
}
