//! # Table Metadata Integration Tests
//!
//! Round-trips table definitions through their binary form the way the
//! catalog layer does, and verifies ALTER TABLE keeps definitions immutable
//! and validated.

use brindb::schema::{column_types, AlterTableStatement, Column, ForeignKeyDef, Table};

fn orders_table() -> Table {
    Table::builder()
        .name("orders")
        .tablespace("sales")
        .column("id", column_types::LONG)
        .column("customer_id", column_types::LONG)
        .column("note", column_types::STRING)
        .column_with_default("status", column_types::STRING, b"open".to_vec())
        .primary_key_column("id", true)
        .foreign_key(ForeignKeyDef {
            name: "fk_customer".to_string(),
            parent_table_id: "customers-uuid".to_string(),
            columns: vec!["customer_id".to_string()],
            parent_table_columns: vec!["id".to_string()],
            on_update_action: ForeignKeyDef::ACTION_NO_ACTION,
            on_delete_action: ForeignKeyDef::ACTION_CASCADE,
        })
        .build()
        .unwrap()
}

#[test]
fn roundtrip_preserves_every_field() {
    let table = orders_table();
    let restored = Table::deserialize(&table.serialize()).unwrap();
    assert_eq!(restored, table);
    assert_eq!(restored.tablespace, "sales");
    assert!(restored.auto_increment);
    assert_eq!(restored.primary_key, vec!["id".to_string()]);
    assert_eq!(
        restored.get_column("status").unwrap().default_value,
        Some(b"open".to_vec())
    );
    assert_eq!(restored.foreign_keys.len(), 1);
    assert_eq!(
        restored.foreign_keys[0].on_delete_action,
        ForeignKeyDef::ACTION_CASCADE
    );
}

#[test]
fn roundtrip_survives_alter_cycle() {
    let table = orders_table();
    let altered = table
        .apply_alter_table(
            &AlterTableStatement::new()
                .add_column(Column::new("priority", column_types::INTEGER, 0))
                .drop_column("note"),
        )
        .unwrap();

    let restored = Table::deserialize(&altered.serialize()).unwrap();
    assert_eq!(restored, altered);
    assert!(restored.get_column("priority").is_some());
    assert!(restored.get_column("note").is_none());
    // the pre-alter definition still serializes on its own
    assert_eq!(Table::deserialize(&table.serialize()).unwrap(), table);
}

#[test]
fn dropping_a_primary_key_column_is_rejected_and_harmless() {
    let table = orders_table();
    let before = table.serialize();

    let err = table
        .apply_alter_table(&AlterTableStatement::new().drop_column("id"))
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("cannot be dropped because it is part of the primary key"));

    assert_eq!(table.serialize(), before);
}

#[test]
fn corrupted_metadata_is_rejected() {
    let mut data = orders_table().serialize();
    data[1] = 5; // table-level flags out of range
    let err = Table::deserialize(&data).unwrap_err();
    assert!(err.to_string().contains("corrupted table file"));

    assert!(Table::deserialize(&[]).is_err());
    let truncated = orders_table().serialize();
    assert!(Table::deserialize(&truncated[..truncated.len() / 2]).is_err());
}
