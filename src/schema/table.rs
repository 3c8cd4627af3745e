//! # Table Definition
//!
//! Immutable table metadata: tablespace, name, uuid, columns, primary key,
//! auto-increment flag and foreign keys. Definitions are built through
//! [`Table::builder`], which enforces the structural invariants (primary key
//! present and typed correctly, no duplicate columns, auto-increment on a
//! single column, unique foreign key names), and altered through
//! [`Table::apply_alter_table`], which produces a new definition without
//! touching the original.
//!
//! ## Binary Format
//!
//! `serialize`/`deserialize` speak the versioned wire format consumed by the
//! index layers:
//!
//! ```text
//! vlong version (=1)
//! vlong flags   (=0)
//! utf   tablespace
//! utf   name
//! utf   uuid
//! u8    auto_increment (0|1)
//! vint  max_serial_position
//! u8    pk_column_count
//! utf[] primary key columns
//! vint  table_flags     (bit0 = has foreign keys)
//! vint  column_count
//! per column:
//!   vlong version (=1)
//!   vlong flags   (bit0 = has default value)
//!   utf   name
//!   vint  type
//!   vint  serial_position
//!   if has default: byte_array default_value
//! if has foreign keys:
//!   vint fk_count
//!   per fk:
//!     utf name
//!     utf parent_table_id
//!     vint column_count
//!     utf[] columns
//!     utf[] parent_table_columns
//!     vint on_update_action
//!     vint on_delete_action
//! ```
//!
//! Unknown versions or flag bits fail deserialization with a "corrupted
//! table file" error; forward compatibility is handled by bumping the
//! version, never by ignoring bits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::{bail, ensure, Result};
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::encoding::{WireReader, WireWriter};

use super::column::{column_types, Column};

const TABLE_VERSION_1: i64 = 1;
const COLUMN_VERSION_1: i64 = 1;
const COLUMNFLAGS_NO_FLAGS: i64 = 0;
const COLUMNFLAGS_HAS_DEFAULT_VALUE: i64 = 1;
const TABLEFLAGS_HAS_FOREIGN_KEYS: i32 = 1;

pub const DEFAULT_TABLESPACE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDef {
    /// Lowercase constraint name, unique within the table.
    pub name: String,
    /// UUID of the parent table.
    pub parent_table_id: String,
    pub columns: Vec<String>,
    pub parent_table_columns: Vec<String>,
    pub on_update_action: i32,
    pub on_delete_action: i32,
}

impl ForeignKeyDef {
    pub const ACTION_NO_ACTION: i32 = 0;
    pub const ACTION_CASCADE: i32 = 1;
    pub const ACTION_SETNULL: i32 = 2;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub uuid: String,
    pub name: String,
    pub tablespace: String,
    /// Columns sorted by serial position.
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub auto_increment: bool,
    pub max_serial_position: i32,
    pub foreign_keys: Vec<ForeignKeyDef>,
    /// Per column, its index within the primary key, or -1.
    primary_key_projection: SmallVec<[i16; 8]>,
}

impl Table {
    pub fn builder() -> Builder {
        Builder::new()
    }

    fn assemble(
        uuid: String,
        name: String,
        tablespace: String,
        columns: Vec<Column>,
        primary_key: Vec<String>,
        auto_increment: bool,
        max_serial_position: i32,
        foreign_keys: Vec<ForeignKeyDef>,
    ) -> Self {
        let primary_key_projection = columns
            .iter()
            .map(|c| {
                primary_key
                    .iter()
                    .position(|pk| *pk == c.name)
                    .map_or(-1, |at| at as i16)
            })
            .collect();
        Self {
            uuid,
            name,
            tablespace,
            columns,
            primary_key,
            auto_increment,
            max_serial_position,
            foreign_keys,
            primary_key_projection,
        }
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn get_column_by_serial_position(&self, serial_position: i32) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.serial_position == serial_position)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn is_primary_key_column(&self, name: &str) -> bool {
        self.primary_key.iter().any(|pk| pk == name)
    }

    /// For each column in declaration order, its index within the primary
    /// key, or -1 for non-key columns.
    pub fn primary_key_projection(&self) -> &[i16] {
        &self.primary_key_projection
    }

    pub fn primary_key_types(&self) -> Vec<i32> {
        self.primary_key
            .iter()
            .filter_map(|pk| self.get_column(pk).map(|c| c.column_type))
            .collect()
    }

    pub fn is_child_of_table(&self, parent_uuid: &str) -> bool {
        self.foreign_keys
            .iter()
            .any(|fk| fk.parent_table_id == parent_uuid)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.write_vlong(TABLE_VERSION_1);
        w.write_vlong(0); // flags for future implementations
        w.write_utf(&self.tablespace);
        w.write_utf(&self.name);
        w.write_utf(&self.uuid);
        w.write_u8(self.auto_increment as u8);
        w.write_vint(self.max_serial_position);
        w.write_u8(self.primary_key.len() as u8);
        for pk in &self.primary_key {
            w.write_utf(pk);
        }
        let has_foreign_keys = !self.foreign_keys.is_empty();
        w.write_vint(if has_foreign_keys {
            TABLEFLAGS_HAS_FOREIGN_KEYS
        } else {
            0
        });
        w.write_vint(self.columns.len() as i32);
        for column in &self.columns {
            w.write_vlong(COLUMN_VERSION_1);
            w.write_vlong(match column.default_value {
                Some(_) => COLUMNFLAGS_HAS_DEFAULT_VALUE,
                None => COLUMNFLAGS_NO_FLAGS,
            });
            w.write_utf(&column.name);
            w.write_vint(column.column_type);
            w.write_vint(column.serial_position);
            if let Some(default_value) = &column.default_value {
                w.write_byte_array(default_value);
            }
        }
        if has_foreign_keys {
            w.write_vint(self.foreign_keys.len() as i32);
            for fk in &self.foreign_keys {
                w.write_utf(&fk.name);
                w.write_utf(&fk.parent_table_id);
                w.write_vint(fk.columns.len() as i32);
                for column in &fk.columns {
                    w.write_utf(column);
                }
                for column in &fk.parent_table_columns {
                    w.write_utf(column);
                }
                w.write_vint(fk.on_update_action);
                w.write_vint(fk.on_delete_action);
            }
        }
        w.into_bytes()
    }

    pub fn deserialize(data: &[u8]) -> Result<Table> {
        let mut r = WireReader::new(data);
        let version = r.read_vlong("table version")?;
        let flags = r.read_vlong("table flags")?;
        if version != TABLE_VERSION_1 || (flags != 0 && flags != 1) {
            bail!("corrupted table file");
        }
        let tablespace = r.read_utf("tablespace")?;
        let name = r.read_utf("table name")?;
        let uuid = r.read_utf("table uuid")?;
        let auto_increment = r.read_u8("auto_increment")? > 0;
        let max_serial_position = r.read_vint("max serial position")?;
        let pk_count = r.read_u8("primary key column count")?;
        let mut primary_key = Vec::with_capacity(pk_count as usize);
        for _ in 0..pk_count {
            primary_key.push(r.read_utf("primary key column")?);
        }
        let table_flags = r.read_vint("table flags")?;
        let column_count = r.read_vint("column count")?;
        ensure!(column_count >= 0, "corrupted table file");
        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let column_version = r.read_vlong("column version")?;
            let column_flags = r.read_vlong("column flags")?;
            if column_version != COLUMN_VERSION_1
                || (column_flags != COLUMNFLAGS_NO_FLAGS
                    && column_flags != COLUMNFLAGS_HAS_DEFAULT_VALUE)
            {
                bail!("corrupted table file");
            }
            let column_name = r.read_utf("column name")?;
            let column_type = r.read_vint("column type")?;
            let serial_position = r.read_vint("column serial position")?;
            let mut column = Column::new(column_name, column_type, serial_position);
            if column_flags & COLUMNFLAGS_HAS_DEFAULT_VALUE != 0 {
                column = column.with_default(r.read_byte_array("column default value")?);
            }
            columns.push(column);
        }
        let mut foreign_keys = Vec::new();
        if table_flags & TABLEFLAGS_HAS_FOREIGN_KEYS != 0 {
            let fk_count = r.read_vint("foreign key count")?;
            ensure!(fk_count >= 0, "corrupted table file");
            for _ in 0..fk_count {
                let fk_name = r.read_utf("foreign key name")?;
                let parent_table_id = r.read_utf("foreign key parent table")?;
                let fk_column_count = r.read_vint("foreign key column count")?;
                ensure!(fk_column_count >= 0, "corrupted table file");
                let mut fk_columns = Vec::with_capacity(fk_column_count as usize);
                for _ in 0..fk_column_count {
                    fk_columns.push(r.read_utf("foreign key column")?);
                }
                let mut parent_columns = Vec::with_capacity(fk_column_count as usize);
                for _ in 0..fk_column_count {
                    parent_columns.push(r.read_utf("foreign key parent column")?);
                }
                let on_update_action = r.read_vint("foreign key on update action")?;
                let on_delete_action = r.read_vint("foreign key on delete action")?;
                foreign_keys.push(ForeignKeyDef {
                    name: fk_name,
                    parent_table_id,
                    columns: fk_columns,
                    parent_table_columns: parent_columns,
                    on_update_action,
                    on_delete_action,
                });
            }
        }
        Ok(Table::assemble(
            uuid,
            name,
            tablespace,
            columns,
            primary_key,
            auto_increment,
            max_serial_position,
            foreign_keys,
        ))
    }

    /// Applies an ALTER TABLE statement, producing the new definition. The
    /// receiving table is left untouched; every structural invariant is
    /// re-validated on the result.
    pub fn apply_alter_table(&self, statement: &super::AlterTableStatement) -> Result<Table> {
        let mut new_max_serial_position = self.max_serial_position;
        let new_name = statement
            .new_table_name
            .as_ref()
            .map(|n| n.to_lowercase())
            .unwrap_or_else(|| self.name.clone());

        let drop_columns: Vec<String> = statement
            .drop_columns
            .iter()
            .map(|c| c.to_lowercase())
            .collect();
        for drop_column in &drop_columns {
            ensure!(
                self.get_column(drop_column).is_some(),
                "column {} not found in table {}",
                drop_column,
                self.name
            );
            ensure!(
                !self.is_primary_key_column(drop_column),
                "column {} cannot be dropped because it is part of the primary key of table {}",
                drop_column,
                self.name
            );
        }

        let by_serial_position: HashMap<i32, &Column> = self
            .columns
            .iter()
            .map(|c| (c.serial_position, c))
            .collect();
        let mut changed_columns: HashSet<String> = HashSet::new();
        for modified in &statement.modify_columns {
            let old = by_serial_position
                .get(&modified.serial_position)
                .ok_or_else(|| {
                    eyre::eyre!(
                        "column {} not found in table {}, looking for serial position {}",
                        modified.name,
                        self.name,
                        modified.serial_position
                    )
                })?;
            changed_columns.insert(old.name.clone());
        }

        let mut builder = Table::builder()
            .name(&new_name)
            .uuid(&self.uuid)
            .tablespace(&self.tablespace);

        for column in &self.columns {
            if !drop_columns.contains(&column.name) && !changed_columns.contains(&column.name) {
                builder = builder.column_at(
                    &column.name,
                    column.column_type,
                    column.serial_position,
                    column.default_value.clone(),
                );
            }
            new_max_serial_position = new_max_serial_position.max(column.serial_position);
        }

        for added in &statement.add_columns {
            ensure!(
                self.get_column(&added.name.to_lowercase()).is_none(),
                "column {} already found in table {}",
                added.name,
                self.name
            );
            new_max_serial_position += 1;
            builder = builder.column_at(
                &added.name,
                added.column_type,
                new_max_serial_position,
                added.default_value.clone(),
            );
        }

        let mut new_primary_key = self.primary_key.clone();
        for modified in &statement.modify_columns {
            builder = builder.column_at(
                &modified.name,
                modified.column_type,
                modified.serial_position,
                modified.default_value.clone(),
            );
            new_max_serial_position = new_max_serial_position.max(modified.serial_position);

            // renaming a primary key column follows the column through its
            // serial position
            let old = by_serial_position[&modified.serial_position];
            if self.is_primary_key_column(&old.name) {
                for pk in &mut new_primary_key {
                    if *pk == old.name {
                        *pk = modified.name.to_lowercase();
                    }
                }
            }
        }

        let new_auto_increment = statement
            .change_auto_increment
            .unwrap_or(self.auto_increment);
        for pk in &new_primary_key {
            builder = builder.primary_key_column(pk, new_auto_increment);
        }

        let mut new_foreign_keys = self.foreign_keys.clone();
        new_foreign_keys.extend(statement.add_foreign_keys.iter().cloned());
        for dropped in &statement.drop_foreign_keys {
            new_foreign_keys.retain(|fk| !fk.name.eq_ignore_ascii_case(dropped));
        }
        for fk in new_foreign_keys {
            builder = builder.foreign_key(fk);
        }

        builder
            .max_serial_position(new_max_serial_position)
            .build()
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Table [name={}, tablespace={}]", self.name, self.tablespace)
    }
}

pub struct Builder {
    name: Option<String>,
    uuid: Option<String>,
    tablespace: String,
    columns: Vec<Column>,
    /// `(column name, wants auto increment)` in declaration order.
    primary_key: Vec<(String, bool)>,
    max_serial_position: i32,
    foreign_keys: Vec<ForeignKeyDef>,
}

impl Builder {
    fn new() -> Self {
        Self {
            name: None,
            uuid: None,
            tablespace: DEFAULT_TABLESPACE.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            max_serial_position: 0,
            foreign_keys: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_lowercase());
        self
    }

    pub fn uuid(mut self, uuid: &str) -> Self {
        self.uuid = Some(uuid.to_lowercase());
        self
    }

    pub fn tablespace(mut self, tablespace: &str) -> Self {
        self.tablespace = tablespace.to_string();
        self
    }

    pub fn max_serial_position(mut self, max_serial_position: i32) -> Self {
        self.max_serial_position = max_serial_position;
        self
    }

    /// Adds a column at the next serial position.
    pub fn column(mut self, name: &str, column_type: i32) -> Self {
        let at = self.max_serial_position;
        self.max_serial_position += 1;
        self.column_at_internal(name, column_type, at, None)
    }

    /// Adds a column with a default value at the next serial position.
    pub fn column_with_default(
        mut self,
        name: &str,
        column_type: i32,
        default_value: Vec<u8>,
    ) -> Self {
        let at = self.max_serial_position;
        self.max_serial_position += 1;
        self.column_at_internal(name, column_type, at, Some(default_value))
    }

    /// Adds a column at an explicit serial position (used when cloning or
    /// altering an existing definition).
    pub fn column_at(
        self,
        name: &str,
        column_type: i32,
        serial_position: i32,
        default_value: Option<Vec<u8>>,
    ) -> Self {
        self.column_at_internal(name, column_type, serial_position, default_value)
    }

    fn column_at_internal(
        mut self,
        name: &str,
        column_type: i32,
        serial_position: i32,
        default_value: Option<Vec<u8>>,
    ) -> Self {
        let mut column = Column::new(name, column_type, serial_position);
        if let Some(default_value) = default_value {
            column = column.with_default(default_value);
        }
        self.columns.push(column);
        self
    }

    pub fn primary_key(self, name: &str) -> Self {
        self.primary_key_column(name, false)
    }

    pub fn primary_key_column(mut self, name: &str, auto_increment: bool) -> Self {
        let name = name.to_lowercase();
        if !self.primary_key.iter().any(|(pk, _)| *pk == name) {
            self.primary_key.push((name, auto_increment));
        }
        self
    }

    pub fn foreign_key(mut self, mut foreign_key: ForeignKeyDef) -> Self {
        foreign_key.name = foreign_key.name.to_lowercase();
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn cloning(mut self, table: &Table) -> Self {
        self.name = Some(table.name.clone());
        self.uuid = Some(table.uuid.clone());
        self.tablespace = table.tablespace.clone();
        self.columns = table.columns.clone();
        self.primary_key = table
            .primary_key
            .iter()
            .map(|pk| (pk.clone(), table.auto_increment))
            .collect();
        self.max_serial_position = table.max_serial_position;
        self.foreign_keys = table.foreign_keys.clone();
        self
    }

    pub fn build(self) -> Result<Table> {
        let name = match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => bail!("table name is not defined"),
        };
        let uuid = match self.uuid {
            Some(uuid) if !uuid.is_empty() => uuid,
            _ => generate_uuid(),
        };
        ensure!(!self.primary_key.is_empty(), "primary key is not defined");

        let mut seen = HashSet::new();
        for column in &self.columns {
            ensure!(!column.name.is_empty(), "column name is not defined");
            ensure!(
                column.serial_position >= 0,
                "column {} has invalid serial position {}",
                column.name,
                column.serial_position
            );
            ensure!(
                seen.insert(column.name.clone()),
                "column {} already exists",
                column.name
            );
        }

        let auto_increment_columns = self
            .primary_key
            .iter()
            .filter(|(_, auto)| *auto)
            .count();
        ensure!(
            auto_increment_columns <= 1,
            "auto_increment can be used only on one column"
        );
        let auto_increment = auto_increment_columns == 1;

        for (pk, _) in &self.primary_key {
            let column = self
                .columns
                .iter()
                .find(|c| c.name == *pk)
                .ok_or_else(|| eyre::eyre!("column {} is not defined in table", pk))?;
            ensure!(
                column_types::validate_primary_key_type(column.column_type),
                "primary key {} must be a string or long or integer or timestamp",
                pk
            );
        }

        let mut fk_names = HashSet::new();
        for fk in &self.foreign_keys {
            ensure!(
                fk_names.insert(fk.name.clone()),
                "duplicate foreign key names discovered"
            );
            ensure!(
                fk.columns.len() == fk.parent_table_columns.len(),
                "foreign key {} has mismatched column lists",
                fk.name
            );
        }

        let mut columns = self.columns;
        columns.sort_by_key(|c| c.serial_position);
        let max_serial_position = columns
            .iter()
            .map(|c| c.serial_position)
            .max()
            .unwrap_or(0)
            .max(self.max_serial_position);

        Ok(Table::assemble(
            uuid,
            name,
            self.tablespace,
            columns,
            self.primary_key.into_iter().map(|(pk, _)| pk).collect(),
            auto_increment,
            max_serial_position,
            self.foreign_keys,
        ))
    }
}

fn generate_uuid() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        nanos as u32,
        (nanos >> 32) as u16,
        (nanos >> 48) as u16,
        (seq & 0xFFFF) as u16,
        (nanos >> 64) as u64 & 0xFFFF_FFFF_FFFF
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AlterTableStatement;

    fn sample_table() -> Table {
        Table::builder()
            .name("customers")
            .tablespace("crm")
            .column("id", column_types::LONG)
            .column("name", column_types::STRING)
            .column_with_default("region", column_types::STRING, b"emea".to_vec())
            .primary_key("id")
            .build()
            .unwrap()
    }

    #[test]
    fn builder_produces_sorted_columns_and_projection() {
        let table = sample_table();
        assert_eq!(table.name, "customers");
        assert_eq!(
            table.column_names().collect::<Vec<_>>(),
            vec!["id", "name", "region"]
        );
        assert_eq!(table.primary_key_projection(), &[0, -1, -1]);
        assert!(table.is_primary_key_column("id"));
        assert!(!table.is_primary_key_column("name"));
        assert_eq!(table.primary_key_types(), vec![column_types::LONG]);
    }

    #[test]
    fn serialize_roundtrip() {
        let table = sample_table();
        let restored = Table::deserialize(&table.serialize()).unwrap();
        assert_eq!(restored, table);
    }

    #[test]
    fn serialize_roundtrip_with_foreign_keys() {
        let table = Table::builder()
            .name("orders")
            .column("id", column_types::LONG)
            .column("customer_id", column_types::LONG)
            .primary_key_column("id", true)
            .foreign_key(ForeignKeyDef {
                name: "fk_customer".to_string(),
                parent_table_id: "uuid-customers".to_string(),
                columns: vec!["customer_id".to_string()],
                parent_table_columns: vec!["id".to_string()],
                on_update_action: ForeignKeyDef::ACTION_NO_ACTION,
                on_delete_action: ForeignKeyDef::ACTION_CASCADE,
            })
            .build()
            .unwrap();
        let restored = Table::deserialize(&table.serialize()).unwrap();
        assert_eq!(restored, table);
        assert!(restored.auto_increment);
        assert!(restored.is_child_of_table("uuid-customers"));
    }

    #[test]
    fn deserialize_rejects_unknown_version() {
        let table = sample_table();
        let mut data = table.serialize();
        data[0] = 2; // version vlong
        let err = Table::deserialize(&data).unwrap_err();
        assert!(err.to_string().contains("corrupted table file"));
    }

    #[test]
    fn deserialize_rejects_unknown_column_flags() {
        let table = sample_table();
        let data = table.serialize();
        // corrupt the first column's flags vlong: it follows the column
        // version right after the column count
        let mut r = WireReader::new(&data);
        r.read_vlong("v").unwrap();
        r.read_vlong("f").unwrap();
        r.read_utf("ts").unwrap();
        r.read_utf("n").unwrap();
        r.read_utf("u").unwrap();
        r.read_u8("ai").unwrap();
        r.read_vint("msp").unwrap();
        let pks = r.read_u8("pkc").unwrap();
        for _ in 0..pks {
            r.read_utf("pk").unwrap();
        }
        r.read_vint("tf").unwrap();
        r.read_vint("cc").unwrap();
        r.read_vlong("cv").unwrap();
        let flags_offset = data.len() - r.remaining();
        let mut data = data;
        data[flags_offset] = 9;
        let err = Table::deserialize(&data).unwrap_err();
        assert!(err.to_string().contains("corrupted table file"));
    }

    #[test]
    fn build_rejects_missing_primary_key() {
        let err = Table::builder()
            .name("t")
            .column("a", column_types::STRING)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("primary key is not defined"));
    }

    #[test]
    fn build_rejects_unknown_primary_key_column() {
        let err = Table::builder()
            .name("t")
            .column("a", column_types::STRING)
            .primary_key("missing")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("is not defined in table"));
    }

    #[test]
    fn build_rejects_invalid_primary_key_type() {
        let err = Table::builder()
            .name("t")
            .column("flag", column_types::BOOLEAN)
            .primary_key("flag")
            .build()
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("must be a string or long or integer or timestamp"));
    }

    #[test]
    fn build_rejects_duplicate_columns() {
        let err = Table::builder()
            .name("t")
            .column("a", column_types::STRING)
            .column("A", column_types::LONG)
            .primary_key("a")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn build_rejects_auto_increment_on_multiple_columns() {
        let err = Table::builder()
            .name("t")
            .column("a", column_types::LONG)
            .column("b", column_types::LONG)
            .primary_key_column("a", true)
            .primary_key_column("b", true)
            .build()
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("auto_increment can be used only on one column"));
    }

    #[test]
    fn build_rejects_duplicate_foreign_key_names() {
        let fk = ForeignKeyDef {
            name: "fk1".to_string(),
            parent_table_id: "p".to_string(),
            columns: vec!["a".to_string()],
            parent_table_columns: vec!["x".to_string()],
            on_update_action: ForeignKeyDef::ACTION_NO_ACTION,
            on_delete_action: ForeignKeyDef::ACTION_NO_ACTION,
        };
        let err = Table::builder()
            .name("t")
            .column("a", column_types::LONG)
            .primary_key("a")
            .foreign_key(fk.clone())
            .foreign_key(ForeignKeyDef {
                name: "FK1".to_string(),
                ..fk
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate foreign key names"));
    }

    #[test]
    fn alter_drop_primary_key_column_rejected() {
        let table = sample_table();
        let err = table
            .apply_alter_table(&AlterTableStatement::new().drop_column("id"))
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("cannot be dropped because it is part of the primary key"));
        // the original definition is untouched
        assert!(table.get_column("id").is_some());
        assert_eq!(table.columns.len(), 3);
    }

    #[test]
    fn alter_drop_regular_column() {
        let table = sample_table();
        let altered = table
            .apply_alter_table(&AlterTableStatement::new().drop_column("region"))
            .unwrap();
        assert!(altered.get_column("region").is_none());
        assert_eq!(altered.columns.len(), 2);
        assert_eq!(table.columns.len(), 3);
    }

    #[test]
    fn alter_drop_unknown_column_rejected() {
        let table = sample_table();
        let err = table
            .apply_alter_table(&AlterTableStatement::new().drop_column("ghost"))
            .unwrap_err();
        assert!(err.to_string().contains("not found in table"));
    }

    #[test]
    fn alter_add_existing_column_rejected() {
        let table = sample_table();
        let statement = AlterTableStatement::new().add_column(Column::new(
            "name",
            column_types::STRING,
            0,
        ));
        let err = table.apply_alter_table(&statement).unwrap_err();
        assert!(err.to_string().contains("already found in table"));
    }

    #[test]
    fn alter_add_column_assigns_fresh_serial_position() {
        let table = sample_table();
        let altered = table
            .apply_alter_table(&AlterTableStatement::new().add_column(Column::new(
                "score",
                column_types::DOUBLE,
                0,
            )))
            .unwrap();
        let score = altered.get_column("score").unwrap();
        assert!(score.serial_position > table.max_serial_position);
        assert_eq!(altered.columns.len(), 4);
    }

    #[test]
    fn alter_modify_renames_primary_key_column() {
        let table = sample_table();
        let id_serial = table.get_column("id").unwrap().serial_position;
        let altered = table
            .apply_alter_table(&AlterTableStatement::new().modify_column(Column::new(
                "customer_id",
                column_types::LONG,
                id_serial,
            )))
            .unwrap();
        assert_eq!(altered.primary_key, vec!["customer_id".to_string()]);
        assert!(altered.get_column("customer_id").is_some());
        assert!(altered.get_column("id").is_none());
    }

    #[test]
    fn alter_change_auto_increment() {
        let table = sample_table();
        assert!(!table.auto_increment);
        let altered = table
            .apply_alter_table(&AlterTableStatement::new().change_auto_increment(true))
            .unwrap();
        assert!(altered.auto_increment);
    }

    #[test]
    fn alter_add_and_drop_foreign_keys() {
        let table = sample_table();
        let fk = ForeignKeyDef {
            name: "fk_region".to_string(),
            parent_table_id: "uuid-regions".to_string(),
            columns: vec!["region".to_string()],
            parent_table_columns: vec!["code".to_string()],
            on_update_action: ForeignKeyDef::ACTION_NO_ACTION,
            on_delete_action: ForeignKeyDef::ACTION_SETNULL,
        };
        let with_fk = table
            .apply_alter_table(&AlterTableStatement::new().add_foreign_key(fk))
            .unwrap();
        assert_eq!(with_fk.foreign_keys.len(), 1);

        let without_fk = with_fk
            .apply_alter_table(&AlterTableStatement::new().drop_foreign_key("FK_REGION"))
            .unwrap();
        assert!(without_fk.foreign_keys.is_empty());
    }

    #[test]
    fn alter_rename_table() {
        let table = sample_table();
        let renamed = table
            .apply_alter_table(&AlterTableStatement::new().rename_to("Clients"))
            .unwrap();
        assert_eq!(renamed.name, "clients");
        assert_eq!(renamed.uuid, table.uuid);
    }

    #[test]
    fn cloning_preserves_definition() {
        let table = sample_table();
        let cloned = Table::builder().cloning(&table).build().unwrap();
        assert_eq!(cloned, table);
    }
}
