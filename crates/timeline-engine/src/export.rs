//! Wide-table export adapter.
//!
//! Projects the attribute map of each fact row into one named column per
//! schema attribute, in registry order. An attribute that was not defined
//! when the row was written exports as `null`.

use serde_json::{Map, Value};

use crate::schema::AttributeSchema;
use crate::types::FactRow;

pub fn wide_row(row: &FactRow, schema: &AttributeSchema) -> Value {
    let mut obj = Map::new();
    obj.insert("entity_id".into(), Value::from(row.entity_id));
    obj.insert("date".into(), Value::from(row.date.to_string()));
    obj.insert("price".into(), row.price.map_or(Value::Null, Value::from));
    obj.insert("revenue".into(), Value::from(row.revenue));
    obj.insert("is_occupied".into(), Value::from(row.is_occupied));
    for name in schema.iter() {
        let cell = row.attributes.get(name).map_or(Value::Null, Value::from);
        obj.insert(name.to_string(), cell);
    }
    Value::Object(obj)
}

pub fn wide_rows(rows: &[FactRow], schema: &AttributeSchema) -> Vec<Value> {
    rows.iter().map(|r| wide_row(r, schema)).collect()
}
