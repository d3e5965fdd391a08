//! Key/value format descriptions exchanged with clients and engines.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known format keys.
pub mod keys {
    pub const MIME: &str = "mime";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const BITRATE: &str = "bitrate";
    pub const FRAME_RATE: &str = "frame_rate";
    pub const INPUT_BUFFER_COUNT: &str = "input_buffer_cnt";
    pub const OUTPUT_BUFFER_COUNT: &str = "output_buffer_cnt";
    pub const MAX_INPUT_SIZE: &str = "max_input_size";
    pub const CHANNEL_COUNT: &str = "channel_count";
    pub const SAMPLE_RATE: &str = "sample_rate";
    pub const EXTRADATA: &str = "extradata";
    pub const SURFACE_PIXFORMAT: &str = "surface_pixformat";
    pub const SURFACE_ROTATION: &str = "surface_rotation";
    pub const SURFACE_SCALE_TYPE: &str = "surface_scale_type";
}

/// A single format value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FormatValue {
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for FormatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatValue::Int(v) => write!(f, "{v}"),
            FormatValue::Long(v) => write!(f, "{v}"),
            FormatValue::Double(v) => write!(f, "{v}"),
            FormatValue::String(v) => write!(f, "{v:?}"),
            FormatValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Ordered map of format keys to values.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FormatMap {
    entries: BTreeMap<String, FormatValue>,
}

impl FormatMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_int(mut self, key: &str, value: i32) -> Self {
        self.set_int(key, value);
        self
    }

    pub fn with_long(mut self, key: &str, value: i64) -> Self {
        self.set_long(key, value);
        self
    }

    pub fn with_double(mut self, key: &str, value: f64) -> Self {
        self.set_double(key, value);
        self
    }

    pub fn with_string(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_string(key, value);
        self
    }

    pub fn with_bytes(mut self, key: &str, value: impl Into<Vec<u8>>) -> Self {
        self.entries
            .insert(key.to_string(), FormatValue::Bytes(value.into()));
        self
    }

    pub fn set_int(&mut self, key: &str, value: i32) {
        self.entries.insert(key.to_string(), FormatValue::Int(value));
    }

    pub fn set_long(&mut self, key: &str, value: i64) {
        self.entries.insert(key.to_string(), FormatValue::Long(value));
    }

    pub fn set_double(&mut self, key: &str, value: f64) {
        self.entries
            .insert(key.to_string(), FormatValue::Double(value));
    }

    pub fn set_string(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(key.to_string(), FormatValue::String(value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&FormatValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Integer value of `key`. A long is accepted if it fits.
    pub fn get_int(&self, key: &str) -> Option<i32> {
        match self.entries.get(key)? {
            FormatValue::Int(v) => Some(*v),
            FormatValue::Long(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// 64-bit integer value of `key`. An int is widened.
    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            FormatValue::Int(v) => Some(i64::from(*v)),
            FormatValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.entries.get(key)? {
            FormatValue::Double(v) => Some(*v),
            FormatValue::Int(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            FormatValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        match self.entries.get(key)? {
            FormatValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Integer value of a key that must be present.
    pub fn require_int(&self, key: &str) -> Result<i32> {
        self.get_int(key)
            .ok_or_else(|| Error::invalid_value(format!("missing integer format key '{key}'")))
    }

    pub fn remove(&mut self, key: &str) -> Option<FormatValue> {
        self.entries.remove(key)
    }

    /// Copy every entry of `other` into `self`, overwriting duplicates.
    pub fn merge(&mut self, other: &FormatMap) {
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormatValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for FormatMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let fmt = FormatMap::new()
            .with_int(keys::WIDTH, 1920)
            .with_long(keys::BITRATE, 4_000_000)
            .with_double(keys::FRAME_RATE, 29.97)
            .with_string(keys::MIME, "video/avc")
            .with_bytes(keys::EXTRADATA, vec![0, 0, 1]);

        assert_eq!(fmt.get_int(keys::WIDTH), Some(1920));
        assert_eq!(fmt.get_long(keys::WIDTH), Some(1920));
        assert_eq!(fmt.get_int(keys::BITRATE), Some(4_000_000));
        assert_eq!(fmt.get_double(keys::FRAME_RATE), Some(29.97));
        assert_eq!(fmt.get_string(keys::MIME), Some("video/avc"));
        assert_eq!(fmt.get_bytes(keys::EXTRADATA), Some(&[0u8, 0, 1][..]));
        assert_eq!(fmt.get_int(keys::MIME), None);
        assert_eq!(fmt.len(), 5);
    }

    #[test]
    fn test_long_out_of_int_range() {
        let fmt = FormatMap::new().with_long("big", i64::MAX);
        assert_eq!(fmt.get_int("big"), None);
        assert_eq!(fmt.get_long("big"), Some(i64::MAX));
    }

    #[test]
    fn test_require_int() {
        let fmt = FormatMap::new().with_int(keys::HEIGHT, 720);
        assert_eq!(fmt.require_int(keys::HEIGHT).unwrap(), 720);
        assert!(matches!(
            fmt.require_int(keys::WIDTH),
            Err(Error::InvalidValue(_))
        ));
    }

    #[test]
    fn test_merge_overwrites() {
        let mut a = FormatMap::new().with_int(keys::WIDTH, 640).with_int(keys::HEIGHT, 480);
        let b = FormatMap::new().with_int(keys::WIDTH, 1280);
        a.merge(&b);
        assert_eq!(a.get_int(keys::WIDTH), Some(1280));
        assert_eq!(a.get_int(keys::HEIGHT), Some(480));
    }

    #[test]
    fn test_display() {
        let fmt = FormatMap::new().with_int("a", 1).with_string("b", "x");
        assert_eq!(fmt.to_string(), "{a=1, b=\"x\"}");
    }
}
