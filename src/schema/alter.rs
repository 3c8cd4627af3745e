//! # ALTER TABLE Carrier
//!
//! The resolved form of an ALTER TABLE statement: which columns to add, drop
//! or modify, an optional rename, an auto-increment toggle, and foreign keys
//! to add or drop. Validation happens in [`crate::schema::Table::apply_alter_table`],
//! which consumes one of these and produces a new table definition or an
//! invariant error; the original table is never modified.

use super::column::Column;
use super::table::ForeignKeyDef;

#[derive(Debug, Clone, Default)]
pub struct AlterTableStatement {
    pub new_table_name: Option<String>,
    pub add_columns: Vec<Column>,
    /// Matched against existing columns by serial position.
    pub modify_columns: Vec<Column>,
    pub drop_columns: Vec<String>,
    pub change_auto_increment: Option<bool>,
    pub add_foreign_keys: Vec<ForeignKeyDef>,
    /// Foreign key names, matched case-insensitively.
    pub drop_foreign_keys: Vec<String>,
}

impl AlterTableStatement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename_to(mut self, name: impl Into<String>) -> Self {
        self.new_table_name = Some(name.into());
        self
    }

    pub fn add_column(mut self, column: Column) -> Self {
        self.add_columns.push(column);
        self
    }

    pub fn modify_column(mut self, column: Column) -> Self {
        self.modify_columns.push(column);
        self
    }

    pub fn drop_column(mut self, name: impl Into<String>) -> Self {
        self.drop_columns.push(name.into());
        self
    }

    pub fn change_auto_increment(mut self, auto_increment: bool) -> Self {
        self.change_auto_increment = Some(auto_increment);
        self
    }

    pub fn add_foreign_key(mut self, foreign_key: ForeignKeyDef) -> Self {
        self.add_foreign_keys.push(foreign_key);
        self
    }

    pub fn drop_foreign_key(mut self, name: impl Into<String>) -> Self {
        self.drop_foreign_keys.push(name.into());
        self
    }
}
