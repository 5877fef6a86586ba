//! The schema of the plant administration tool: equipment, its sensors and
//! their readings, maintenance history, failure predictions, and the small
//! products/sales ledger kept next to it.

use crate::error::Result;
use crate::schema::{ColumnDef, ColumnType, SchemaRegistry, TableDef};

pub fn plant() -> Result<SchemaRegistry> {
    SchemaRegistry::builder()
        .enumeration("sensor_type", ["temperature", "vibration", "pressure", "noise"])
        .enumeration("equipment_status", ["working", "maintenance", "broken"])
        .enumeration("maintenance_type", ["planned", "emergency", "predictive"])
        .enumeration("risk_level", ["low", "medium", "high"])
        .table(
            TableDef::new("equipment")
                .column(ColumnDef::new("equipment_id", ColumnType::Integer).primary_key())
                .column(ColumnDef::new("name", ColumnType::Text(Some(100))).not_null())
                .column(ColumnDef::new("location", ColumnType::Text(None)))
                .column(
                    ColumnDef::new("status", ColumnType::Enum("equipment_status".into()))
                        .not_null()
                        .default("working"),
                )
                .column(ColumnDef::new("installed_on", ColumnType::Date)),
        )
        .table(
            TableDef::new("sensors")
                .column(ColumnDef::new("sensor_id", ColumnType::Integer).primary_key())
                .column(
                    ColumnDef::new("equipment_id", ColumnType::Integer)
                        .references("equipment", "equipment_id"),
                )
                .column(
                    ColumnDef::new("sensor_type", ColumnType::Enum("sensor_type".into()))
                        .not_null()
                        .default("temperature"),
                )
                .column(ColumnDef::new("unit", ColumnType::Text(Some(10))).not_null())
                .column(ColumnDef::new("location", ColumnType::Text(None))),
        )
        .table(
            TableDef::new("sensor_readings")
                .column(ColumnDef::new("reading_id", ColumnType::Integer).primary_key())
                .column(
                    ColumnDef::new("sensor_id", ColumnType::Integer)
                        .not_null()
                        .references("sensors", "sensor_id"),
                )
                .column(ColumnDef::new("recorded_at", ColumnType::DateTime).not_null().default_now())
                .column(ColumnDef::new("value", ColumnType::Numeric).not_null())
                .check("value >= 0"),
        )
        .table(
            TableDef::new("maintenance_logs")
                .column(ColumnDef::new("log_id", ColumnType::Integer).primary_key())
                .column(
                    ColumnDef::new("equipment_id", ColumnType::Integer)
                        .not_null()
                        .references("equipment", "equipment_id"),
                )
                .column(
                    ColumnDef::new("maintenance_type", ColumnType::Enum("maintenance_type".into()))
                        .not_null(),
                )
                .column(ColumnDef::new("performed_at", ColumnType::DateTime).not_null())
                .column(ColumnDef::new("description", ColumnType::Text(None)))
                .column(ColumnDef::new("cost", ColumnType::Numeric))
                .check("cost >= 0"),
        )
        .table(
            TableDef::new("failure_predictions")
                .column(ColumnDef::new("prediction_id", ColumnType::Integer).primary_key())
                .column(
                    ColumnDef::new("equipment_id", ColumnType::Integer)
                        .not_null()
                        .references("equipment", "equipment_id"),
                )
                .column(ColumnDef::new("predicted_at", ColumnType::DateTime).not_null().default_now())
                .column(ColumnDef::new("risk_level", ColumnType::Enum("risk_level".into())).not_null())
                .column(ColumnDef::new("probability", ColumnType::Numeric))
                .check("probability >= 0 AND probability <= 1"),
        )
        .table(
            TableDef::new("products")
                .column(ColumnDef::new("product_id", ColumnType::Integer).primary_key())
                .column(ColumnDef::new("name", ColumnType::Text(None)).not_null())
                .column(ColumnDef::new("price", ColumnType::Numeric))
                .column(ColumnDef::new("tags", ColumnType::Array))
                .check("price > 0"),
        )
        .table(
            TableDef::new("sales")
                .column(ColumnDef::new("sale_id", ColumnType::Integer).primary_key())
                .column(
                    ColumnDef::new("product_id", ColumnType::Integer)
                        .not_null()
                        .references("products", "product_id"),
                )
                .column(ColumnDef::new("quantity", ColumnType::Integer).not_null())
                .column(ColumnDef::new("sold_at", ColumnType::DateTime).not_null().default_now())
                .column(ColumnDef::new("returned", ColumnType::Boolean).not_null().default(false))
                .check("quantity > 0"),
        )
        .build()
}
