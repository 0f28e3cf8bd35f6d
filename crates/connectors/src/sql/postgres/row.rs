use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use model::{
    core::value::Value,
    records::row::{Field, RowData},
};
use rust_decimal::Decimal as RustDecimal;
use std::str::FromStr;
use tokio_postgres::{Row as PgRow, types::Type};
use tracing::warn;

/// Decodes a row by its column types.
pub fn to_row_data(row: &PgRow, table: &str) -> RowData {
    let fields = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| Field {
            name: column.name().to_string(),
            value: get_value(row, idx, column.type_()),
        })
        .collect();
    RowData::new(table, fields)
}

fn get_value(row: &PgRow, idx: usize, ty: &Type) -> Value {
    let value = match *ty {
        Type::INT2 => get::<i16>(row, idx).map(|v| Value::Int(i64::from(v))),
        Type::INT4 => get::<i32>(row, idx).map(|v| Value::Int(i64::from(v))),
        Type::INT8 => get::<i64>(row, idx).map(Value::Int),
        Type::OID => get::<u32>(row, idx).map(|v| Value::Uint(u64::from(v))),
        Type::FLOAT4 => get::<f32>(row, idx).map(|v| Value::Float(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx).map(Value::Float),
        Type::NUMERIC => get::<RustDecimal>(row, idx)
            .and_then(|v| BigDecimal::from_str(&v.to_string()).ok())
            .map(Value::Decimal),
        Type::BOOL => get::<bool>(row, idx).map(Value::Boolean),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx).map(Value::Json),
        Type::UUID => get::<uuid::Uuid>(row, idx).map(Value::Uuid),
        Type::BYTEA => get::<Vec<u8>>(row, idx).map(Value::Bytes),
        Type::DATE => get::<NaiveDate>(row, idx).map(Value::Date),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx).map(|v| Value::Timestamp(v.and_utc())),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx).map(Value::Timestamp),
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => v.map(Value::String),
            Err(err) => {
                warn!(column = idx, column_type = %ty, %err, "Unsupported column type, reading as NULL");
                None
            }
        },
    };
    value.unwrap_or(Value::Null)
}

fn get<'a, T>(row: &'a PgRow, idx: usize) -> Option<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}
