use bigdecimal::ToPrimitive;
use bytes::BytesMut;
use model::core::value::Value;
use rust_decimal::{Decimal as RustDecimal, prelude::FromPrimitive as DecimalFromPrimitive};
use std::{error::Error, str::FromStr};
use tokio_postgres::types::{IsNull, Json as PgJson, ToSql, Type, to_sql_checked};

/// NULL that binds to a parameter of any type.
#[derive(Debug)]
struct PgNull;

impl ToSql for PgNull {
    fn to_sql(&self, _ty: &Type, _out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

pub struct PgParam(Box<dyn ToSql + Sync + Send>);

impl PgParam {
    /// Converts a value into a parameter the server accepts for `ty`, the
    /// type inferred when the statement was prepared.
    pub fn for_type(value: Value, ty: &Type) -> Self {
        match value {
            Value::Null => PgParam(Box::new(PgNull)),
            Value::Int(v) => Self::from_i64(v, ty),
            Value::Uint(v) => match i64::try_from(v) {
                Ok(v) => Self::from_i64(v, ty),
                Err(_) => PgParam(Box::new(RustDecimal::from(v))),
            },
            Value::Float(v) => match *ty {
                Type::FLOAT4 => PgParam(Box::new(v as f32)),
                Type::NUMERIC => PgParam(Box::new(
                    RustDecimal::from_f64_retain(v).unwrap_or_default(),
                )),
                Type::TEXT | Type::VARCHAR => PgParam(Box::new(v.to_string())),
                _ => PgParam(Box::new(v)),
            },
            Value::Decimal(v) => match *ty {
                Type::FLOAT8 => PgParam(Box::new(v.to_f64().unwrap_or_default())),
                Type::FLOAT4 => PgParam(Box::new(v.to_f32().unwrap_or_default())),
                Type::TEXT | Type::VARCHAR => PgParam(Box::new(v.to_string())),
                _ => {
                    let decimal = RustDecimal::from_str(&v.to_string()).unwrap_or_else(|_| {
                        DecimalFromPrimitive::from_f64(v.to_f64().unwrap_or(0.0))
                            .unwrap_or_default()
                    });
                    PgParam(Box::new(decimal))
                }
            },
            Value::String(v) => match *ty {
                Type::JSON | Type::JSONB => {
                    let json = serde_json::from_str(&v).unwrap_or(serde_json::Value::String(v));
                    PgParam(Box::new(PgJson(json)))
                }
                Type::UUID => match uuid::Uuid::parse_str(&v) {
                    Ok(id) => PgParam(Box::new(id)),
                    Err(_) => PgParam(Box::new(v)),
                },
                _ => PgParam(Box::new(v)),
            },
            Value::Boolean(v) => PgParam(Box::new(v)),
            Value::Json(v) => match *ty {
                Type::TEXT | Type::VARCHAR => PgParam(Box::new(v.to_string())),
                _ => PgParam(Box::new(PgJson(v))),
            },
            Value::Uuid(v) => match *ty {
                Type::TEXT | Type::VARCHAR => PgParam(Box::new(v.to_string())),
                _ => PgParam(Box::new(v)),
            },
            Value::Bytes(v) => PgParam(Box::new(v)),
            Value::Date(v) => PgParam(Box::new(v)),
            Value::Timestamp(v) => match *ty {
                Type::TIMESTAMP => PgParam(Box::new(v.naive_utc())),
                Type::DATE => PgParam(Box::new(v.date_naive())),
                _ => PgParam(Box::new(v)),
            },
        }
    }

    fn from_i64(v: i64, ty: &Type) -> Self {
        match *ty {
            Type::INT2 => match i16::try_from(v) {
                Ok(v) => PgParam(Box::new(v)),
                Err(_) => PgParam(Box::new(v)),
            },
            Type::INT4 => match i32::try_from(v) {
                Ok(v) => PgParam(Box::new(v)),
                Err(_) => PgParam(Box::new(v)),
            },
            Type::FLOAT4 => PgParam(Box::new(v as f32)),
            Type::FLOAT8 => PgParam(Box::new(v as f64)),
            Type::NUMERIC => PgParam(Box::new(RustDecimal::from(v))),
            Type::BOOL => PgParam(Box::new(v != 0)),
            Type::TEXT | Type::VARCHAR => PgParam(Box::new(v.to_string())),
            _ => PgParam(Box::new(v)),
        }
    }
}

impl AsRef<dyn ToSql + Sync> for PgParam {
    fn as_ref(&self) -> &(dyn ToSql + Sync + 'static) {
        &*self.0
    }
}

pub struct PgParamStore {
    pub params: Vec<PgParam>,
}

impl PgParamStore {
    /// Binds `values` against the parameter types of a prepared statement.
    pub fn for_types(values: Vec<Value>, types: &[Type]) -> Self {
        Self {
            params: values
                .into_iter()
                .enumerate()
                .map(|(i, value)| PgParam::for_type(value, types.get(i).unwrap_or(&Type::TEXT)))
                .collect(),
        }
    }

    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|param| param.as_ref())
            .collect::<Vec<_>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_binds_to_any_type() {
        assert!(<PgNull as ToSql>::accepts(&Type::INT4));
        assert!(<PgNull as ToSql>::accepts(&Type::JSONB));
    }

    #[test]
    fn store_binds_one_param_per_value() {
        let store = PgParamStore::for_types(
            vec![Value::Int(1), Value::from("a"), Value::Null],
            &[Type::INT4, Type::TEXT, Type::INT8],
        );
        assert_eq!(store.as_refs().len(), 3);
    }
}
