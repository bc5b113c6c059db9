//! AMF value types
//!
//! Objects keep their properties in insertion order. Servers do not require
//! a particular order, but commands such as `connect` are easier to compare
//! against captures from other encoders when the order is stable.

/// Ordered list of object properties
pub type AmfObject = Vec<(String, AmfValue)>;

/// AMF0 value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AmfValue {
    /// IEEE 754 double (marker 0x00)
    Number(f64),
    /// Boolean (marker 0x01)
    Boolean(bool),
    /// UTF-8 string (marker 0x02, or 0x0C when longer than 65535 bytes)
    String(String),
    /// Anonymous object (marker 0x03)
    Object(AmfObject),
    /// Null (marker 0x05)
    #[default]
    Null,
    /// Undefined (marker 0x06)
    Undefined,
    /// Associative array (marker 0x08), used for `onMetaData`
    EcmaArray(AmfObject),
    /// Dense array (marker 0x0A)
    StrictArray(Vec<AmfValue>),
    /// Milliseconds since the Unix epoch (marker 0x0B)
    Date(f64),
}

impl AmfValue {
    /// Build an object from `(key, value)` pairs
    pub fn object<K, V, I>(props: I) -> Self
    where
        K: Into<String>,
        V: Into<AmfValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        AmfValue::Object(
            props
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build an ECMA array from `(key, value)` pairs
    pub fn ecma_array<K, V, I>(props: I) -> Self
    where
        K: Into<String>,
        V: Into<AmfValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        AmfValue::EcmaArray(
            props
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Properties of an object or ECMA array
    pub fn properties(&self) -> Option<&[(String, AmfValue)]> {
        match self {
            AmfValue::Object(props) | AmfValue::EcmaArray(props) => Some(props),
            _ => None,
        }
    }

    /// Look up a property by key (first match wins)
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.properties()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}
