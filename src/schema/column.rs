//! # Column Definitions
//!
//! A column is a name, a type code, a serial position and an optional default
//! value. The serial position is the column's stable identity: ALTER TABLE
//! matches modified columns by serial position, never by name, so renames
//! keep rows readable.
//!
//! Type codes are plain integers on the wire; the `column_types` module holds
//! the known codes and the primary-key validation rule. Nullable variants are
//! kept distinct from their NOT NULL counterparts because the row encoding
//! differs between them.

/// Wire-level column type codes.
pub mod column_types {
    pub const STRING: i32 = 0;
    pub const LONG: i32 = 1;
    pub const INTEGER: i32 = 2;
    pub const BYTEARRAY: i32 = 3;
    pub const TIMESTAMP: i32 = 4;
    pub const NULL: i32 = 5;
    pub const DOUBLE: i32 = 6;
    pub const BOOLEAN: i32 = 7;
    pub const ANYTYPE: i32 = 10;
    pub const NOTNULL_STRING: i32 = 11;
    pub const NOTNULL_INTEGER: i32 = 12;
    pub const NOTNULL_LONG: i32 = 13;
    pub const NOTNULL_TIMESTAMP: i32 = 15;
    pub const NOTNULL_DOUBLE: i32 = 16;
    pub const NOTNULL_BOOLEAN: i32 = 17;

    /// Whether `column_type` may be part of a primary key. Nullable variants
    /// are accepted for backward compatibility with tables created before
    /// the NOT NULL codes existed.
    pub fn validate_primary_key_type(column_type: i32) -> bool {
        matches!(
            column_type,
            INTEGER
                | NOTNULL_INTEGER
                | LONG
                | NOTNULL_LONG
                | STRING
                | NOTNULL_STRING
                | TIMESTAMP
                | NOTNULL_TIMESTAMP
                | BYTEARRAY
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Lowercase column name.
    pub name: String,
    pub column_type: i32,
    /// Stable identity of the column across renames.
    pub serial_position: i32,
    pub default_value: Option<Vec<u8>>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: i32, serial_position: i32) -> Self {
        Self {
            name: name.into().to_lowercase(),
            column_type,
            serial_position,
            default_value: None,
        }
    }

    pub fn with_default(mut self, default_value: Vec<u8>) -> Self {
        self.default_value = Some(default_value);
        self
    }
}
