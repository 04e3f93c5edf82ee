//! Typed cell values and text coercion

use super::SemanticType;
use serde::Serialize;

/// One cell of a table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Utf8(String),
}

/// One row of a table, in column order
pub type Row = Vec<Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value can be stored in a column of the given type
    pub fn conforms_to(&self, ty: SemanticType) -> bool {
        matches!(
            (self, ty),
            (Value::Null, _)
                | (Value::Int32(_), SemanticType::Int32)
                | (Value::Int64(_), SemanticType::Int64)
                | (Value::Float32(_), SemanticType::Float32)
                | (Value::Float64(_), SemanticType::Float64)
                | (Value::Utf8(_), SemanticType::Utf8)
        )
    }

    /// Feed a canonical, platform-independent encoding into the hasher
    pub fn hash_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            Value::Null => {
                hasher.update(&[0]);
            }
            Value::Int32(v) => {
                hasher.update(&[1]);
                hasher.update(&v.to_le_bytes());
            }
            Value::Int64(v) => {
                hasher.update(&[2]);
                hasher.update(&v.to_le_bytes());
            }
            Value::Float32(v) => {
                hasher.update(&[3]);
                hasher.update(&v.to_bits().to_le_bytes());
            }
            Value::Float64(v) => {
                hasher.update(&[4]);
                hasher.update(&v.to_bits().to_le_bytes());
            }
            Value::Utf8(s) => {
                hasher.update(&[5]);
                hasher.update(&(s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Option<i32>> for Value {
    fn from(v: Option<i32>) -> Self {
        v.map(Value::Int32).unwrap_or(Value::Null)
    }
}

impl From<Option<i64>> for Value {
    fn from(v: Option<i64>) -> Self {
        v.map(Value::Int64).unwrap_or(Value::Null)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        v.map(Value::Utf8).unwrap_or(Value::Null)
    }
}

impl SemanticType {
    /// Coerce one raw field. Blank fields become `Null`; `None` means the
    /// text cannot be represented as this type.
    pub fn coerce(&self, raw: &str) -> Option<Value> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Some(Value::Null);
        }

        match self {
            SemanticType::Int32 => trimmed.parse().ok().map(Value::Int32),
            SemanticType::Int64 => trimmed.parse().ok().map(Value::Int64),
            SemanticType::Float32 => trimmed.parse().ok().map(Value::Float32),
            SemanticType::Float64 => trimmed.parse().ok().map(Value::Float64),
            SemanticType::Utf8 => Some(Value::Utf8(raw.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_numbers() {
        assert_eq!(SemanticType::Int32.coerce("42"), Some(Value::Int32(42)));
        assert_eq!(
            SemanticType::Int64.coerce("26984851472"),
            Some(Value::Int64(26_984_851_472))
        );
        assert_eq!(SemanticType::Float32.coerce("-0.6"), Some(Value::Float32(-0.6)));
        assert_eq!(SemanticType::Int32.coerce(" 7 "), Some(Value::Int32(7)));
    }

    #[test]
    fn test_coerce_rejects_wrong_shape() {
        assert_eq!(SemanticType::Int32.coerce("1.5"), None);
        assert_eq!(SemanticType::Int32.coerce("abc"), None);
        // Does not fit in 32 bits
        assert_eq!(SemanticType::Int32.coerce("26984851472"), None);
        assert_eq!(SemanticType::Float32.coerce("1,50"), None);
    }

    #[test]
    fn test_blank_is_null() {
        assert_eq!(SemanticType::Int32.coerce(""), Some(Value::Null));
        assert_eq!(SemanticType::Float32.coerce("   "), Some(Value::Null));
        assert_eq!(SemanticType::Utf8.coerce(""), Some(Value::Null));
    }

    #[test]
    fn test_strings_kept_verbatim() {
        assert_eq!(
            SemanticType::Utf8.coerce(" 2 Adults Kids"),
            Some(Value::Utf8(" 2 Adults Kids".to_string()))
        );
    }

    #[test]
    fn test_hash_distinguishes_types() {
        let mut a = blake3::Hasher::new();
        Value::Int32(1).hash_into(&mut a);
        let mut b = blake3::Hasher::new();
        Value::Int64(1).hash_into(&mut b);
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_conforms_to() {
        assert!(Value::Null.conforms_to(SemanticType::Utf8));
        assert!(Value::Float64(1.0).conforms_to(SemanticType::Float64));
        assert!(!Value::Float32(1.0).conforms_to(SemanticType::Float64));
    }
}
