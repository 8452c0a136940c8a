//! Built-in sync configurations for common Service Layer entities.

use super::column::ColumnKind::{self, Boolean, Date, Decimal, Integer};
use super::config::SyncConfig;
use crate::error::Result;

/// Entities with a built-in configuration, in listing order.
pub const PRESET_ENTITIES: [&str; 10] = [
    "Items",
    "BusinessPartners",
    "Orders",
    "Invoices",
    "DeliveryNotes",
    "PurchaseOrders",
    "CreditNotes",
    "Quotations",
    "Warehouses",
    "ItemGroups",
];

const DOCUMENT_COLUMNS: [&str; 13] = [
    "DocEntry",
    "DocNum",
    "DocType",
    "CardCode",
    "CardName",
    "DocDate",
    "DocDueDate",
    "DocTotal",
    "DocCurrency",
    "DocumentStatus",
    "Cancelled",
    "Comments",
    "UpdateDate",
];

const DOCUMENT_KINDS: [(&str, ColumnKind); 8] = [
    ("DocEntry", Integer),
    ("DocNum", Integer),
    ("DocDate", Date),
    ("DocDueDate", Date),
    ("DocTotal", Decimal),
    ("Cancelled", Boolean),
    ("UpdateDate", Date),
    ("LineNum", Integer),
];

const LINE_COLUMNS: [&str; 10] = [
    "LineNum",
    "ItemCode",
    "ItemDescription",
    "Quantity",
    "Price",
    "DiscountPercent",
    "LineTotal",
    "WarehouseCode",
    "TaxCode",
    "LineStatus",
];

const LINE_KINDS: [(&str, ColumnKind); 4] = [
    ("Quantity", Decimal),
    ("Price", Decimal),
    ("DiscountPercent", Decimal),
    ("LineTotal", Decimal),
];

fn document(entity: &str, table: &str, lines_table: &str, batch_size: u32) -> Result<SyncConfig> {
    SyncConfig::builder(entity, table, "DocEntry")
        .columns(DOCUMENT_COLUMNS)
        .kinds(DOCUMENT_KINDS)
        .kinds(LINE_KINDS)
        .lines(lines_table, LINE_COLUMNS)
        .batch_size(batch_size)
        .build()
}

/// Built-in configuration for `entity`, if there is one.
pub fn preset(entity: &str, batch_size: u32) -> Option<SyncConfig> {
    let config = match entity {
        "Items" => SyncConfig::builder("Items", "sap_items", "ItemCode")
            .columns([
                "ItemCode",
                "ItemName",
                "ForeignName",
                "ItemsGroupCode",
                "ItemType",
                "InventoryItem",
                "SalesItem",
                "PurchaseItem",
                "QuantityOnStock",
                "Valid",
                "Frozen",
                "UpdateDate",
            ])
            .kinds([
                ("ItemsGroupCode", Integer),
                ("InventoryItem", Boolean),
                ("SalesItem", Boolean),
                ("PurchaseItem", Boolean),
                ("QuantityOnStock", Decimal),
                ("Valid", Boolean),
                ("Frozen", Boolean),
                ("UpdateDate", Date),
            ])
            .track_deletes(true)
            .batch_size(batch_size)
            .build(),
        "BusinessPartners" => SyncConfig::builder("BusinessPartners", "sap_business_partners", "CardCode")
            .columns([
                "CardCode",
                "CardName",
                "CardType",
                "GroupCode",
                "Phone1",
                "EmailAddress",
                "Currency",
                "CurrentAccountBalance",
                "Valid",
                "Frozen",
                "UpdateDate",
            ])
            .kinds([
                ("GroupCode", Integer),
                ("CurrentAccountBalance", Decimal),
                ("Valid", Boolean),
                ("Frozen", Boolean),
                ("UpdateDate", Date),
            ])
            .track_deletes(true)
            .batch_size(batch_size)
            .build(),
        "Orders" => document("Orders", "sap_orders", "sap_order_lines", batch_size),
        "Invoices" => document("Invoices", "sap_invoices", "sap_invoice_lines", batch_size),
        "DeliveryNotes" => document(
            "DeliveryNotes",
            "sap_delivery_notes",
            "sap_delivery_note_lines",
            batch_size,
        ),
        "PurchaseOrders" => document(
            "PurchaseOrders",
            "sap_purchase_orders",
            "sap_purchase_order_lines",
            batch_size,
        ),
        "CreditNotes" => document(
            "CreditNotes",
            "sap_credit_notes",
            "sap_credit_note_lines",
            batch_size,
        ),
        "Quotations" => document(
            "Quotations",
            "sap_quotations",
            "sap_quotation_lines",
            batch_size,
        ),
        // Master data without an update stamp is always fully synced.
        "Warehouses" => SyncConfig::builder("Warehouses", "sap_warehouses", "WarehouseCode")
            .columns([
                "WarehouseCode",
                "WarehouseName",
                "Street",
                "City",
                "Country",
                "Inactive",
            ])
            .kind("Inactive", Boolean)
            .update_date_field(None)
            .track_deletes(true)
            .batch_size(batch_size)
            .build(),
        "ItemGroups" => SyncConfig::builder("ItemGroups", "sap_item_groups", "Number")
            .columns(["Number", "GroupName"])
            .kind("Number", Integer)
            .update_date_field(None)
            .track_deletes(true)
            .batch_size(batch_size)
            .build(),
        _ => return None,
    };

    match config {
        Ok(config) => Some(config),
        Err(err) => {
            tracing::error!(entity, error = %err, "built-in sync configuration is invalid");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::config::DEFAULT_BATCH_SIZE;

    #[test]
    fn test_every_preset_builds() {
        for entity in PRESET_ENTITIES {
            let config = preset(entity, DEFAULT_BATCH_SIZE)
                .unwrap_or_else(|| panic!("missing preset for {entity}"));
            assert_eq!(config.entity(), entity);
            assert!(config.table().starts_with("sap_"));
        }
        assert!(preset("JournalEntries", DEFAULT_BATCH_SIZE).is_none());
    }

    #[test]
    fn test_documents_sync_lines_keyed_by_doc_entry() {
        let orders = preset("Orders", 100).unwrap();
        assert!(orders.sync_lines());
        assert_eq!(orders.lines_table(), Some("sap_order_lines"));
        assert_eq!(orders.primary_key(), "DocEntry");
        assert_eq!(orders.key_kind(), Integer);
        assert_eq!(orders.line_table_columns()[0], "DocEntry");
        assert_eq!(orders.batch_size(), 100);
    }

    #[test]
    fn test_master_data_without_update_stamp() {
        let warehouses = preset("Warehouses", DEFAULT_BATCH_SIZE).unwrap();
        assert_eq!(warehouses.update_date_field(), None);
        assert!(warehouses.track_deletes());
    }
}
