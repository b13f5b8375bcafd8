use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::android::error::ParseResourceIdError;

pub const TYPE_NULL: u8 = 0x00;
pub const TYPE_REFERENCE: u8 = 0x01;
pub const TYPE_STRING: u8 = 0x03;
pub const TYPE_FLOAT: u8 = 0x04;
pub const TYPE_INT_DEC: u8 = 0x10;
pub const TYPE_INT_HEX: u8 = 0x11;
pub const TYPE_INT_BOOLEAN: u8 = 0x12;
pub const TYPE_FIRST_COLOR_INT: u8 = 0x1c;
pub const TYPE_LAST_COLOR_INT: u8 = 0x1f;

/// A packed resource identifier: `(package << 24) | (type << 16) | entry`.
///
/// Displays as `@` followed by eight uppercase hex digits, e.g. `@7F0B0001`. Parsing accepts
/// that form in either case, and `0x` ids with or without a leading `@`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub u32);

impl ResourceId {
    pub fn new(package_id: u8, type_id: u8, entry_index: u16) -> Self {
        ResourceId(((package_id as u32) << 24) | ((type_id as u32) << 16) | entry_index as u32)
    }

    pub fn package_id(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn type_id(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn entry_index(self) -> u16 {
        self.0 as u16
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:08X}", self.0)
    }
}

impl FromStr for ResourceId {
    type Err = ParseResourceIdError;

    /// Accepts eight hex digits, or `0x` and up to eight, after an optional `@`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('@').unwrap_or(trimmed);
        let (hex, valid_len) = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => (hex, (1..=8).contains(&hex.len())),
            None => (trimmed, trimmed.len() == 8),
        };
        if !valid_len || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseResourceIdError(s.to_string()));
        }
        u32::from_str_radix(hex, 16)
            .map(ResourceId)
            .map_err(|_| ParseResourceIdError(s.to_string()))
    }
}

impl From<u32> for ResourceId {
    fn from(value: u32) -> Self {
        ResourceId(value)
    }
}

/// Renders a typed `Res_value` payload as text.
pub fn format_typed_value(data_type: u8, data: u32) -> String {
    match data_type {
        TYPE_REFERENCE => ResourceId(data).to_string(),
        TYPE_INT_DEC => (data as i32).to_string(),
        TYPE_INT_HEX => format!("0x{data:x}"),
        TYPE_INT_BOOLEAN => (data != 0).to_string(),
        TYPE_FIRST_COLOR_INT..=TYPE_LAST_COLOR_INT => format!("#{data:08X}"),
        TYPE_FLOAT => f32::from_bits(data).to_string(),
        _ => data.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_display_and_parse() {
        let id = ResourceId::new(0x7f, 0x0b, 0x0001);
        assert_eq!(id.to_string(), "@7F0B0001");
        assert_eq!("@7f0b0001".parse::<ResourceId>().unwrap(), id);
        assert_eq!("0x7F0B0001".parse::<ResourceId>().unwrap(), id);
        assert_eq!("@0x7f0b0001".parse::<ResourceId>().unwrap(), id);
        assert_eq!(id.package_id(), 0x7f);
        assert_eq!(id.type_id(), 0x0b);
        assert_eq!(id.entry_index(), 1);
        assert!("@string/app_name".parse::<ResourceId>().is_err());
    }

    #[test]
    fn short_or_signed_hex_is_not_an_id() {
        for text in ["@Cafe", "@+1", "@+7f0b0001", "@7f0b00011", "@0x", "@0x+1", "@"] {
            assert!(text.parse::<ResourceId>().is_err(), "{text}");
        }
        assert_eq!("@0x1".parse::<ResourceId>().unwrap(), ResourceId(1));
        assert_eq!(
            "@Cafe".parse::<ResourceId>(),
            Err(ParseResourceIdError("@Cafe".to_string()))
        );
    }

    #[test]
    fn typed_values() {
        assert_eq!(format_typed_value(TYPE_INT_DEC, (-3i32) as u32), "-3");
        assert_eq!(format_typed_value(TYPE_INT_HEX, 0x1f), "0x1f");
        assert_eq!(format_typed_value(TYPE_INT_BOOLEAN, 0xFFFF_FFFF), "true");
        assert_eq!(format_typed_value(TYPE_INT_BOOLEAN, 0), "false");
        assert_eq!(format_typed_value(0x1d, 0xFF00_80FF), "#FF0080FF");
        assert_eq!(format_typed_value(TYPE_REFERENCE, 0x7f02_0000), "@7F020000");
        assert_eq!(format_typed_value(TYPE_FLOAT, 1.5f32.to_bits()), "1.5");
    }
}
