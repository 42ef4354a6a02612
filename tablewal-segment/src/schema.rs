//! Table schema.

use crate::error::SegmentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int,
    Float,
    String,
    Bool,
    /// Array of numbers.
    Vector,
    /// Any JSON value.
    Json,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::String => "string",
            FieldType::Bool => "bool",
            FieldType::Vector => "vector",
            FieldType::Json => "json",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::String => value.is_string(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Vector => value
                .as_array()
                .map(|items| items.iter().all(Value::is_number))
                .unwrap_or(false),
            FieldType::Json => true,
        }
    }
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub nullable: bool,
}

/// Column layout of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a required column.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            field_type,
            primary_key: false,
            nullable: false,
        });
        self
    }

    /// Adds a column that may be null or absent.
    pub fn nullable_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            field_type,
            primary_key: false,
            nullable: true,
        });
        self
    }

    /// Adds the primary key column.
    pub fn primary_key(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            field_type,
            primary_key: true,
            nullable: false,
        });
        self
    }

    /// Checks names are unique and there is at most one primary key of a
    /// keyable type.
    pub fn validate(&self) -> Result<(), SegmentError> {
        if self.name.is_empty() {
            return Err(SegmentError::InvalidSchema(
                "table name is empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SegmentError::InvalidSchema(format!(
                    "duplicate field '{}'",
                    field.name
                )));
            }
        }

        let keys: Vec<_> = self.fields.iter().filter(|f| f.primary_key).collect();
        if keys.len() > 1 {
            return Err(SegmentError::InvalidSchema(
                "more than one primary key".to_string(),
            ));
        }
        if let Some(key) = keys.first() {
            if !matches!(key.field_type, FieldType::Int | FieldType::String) {
                return Err(SegmentError::InvalidSchema(format!(
                    "primary key '{}' must be int or string",
                    key.name
                )));
            }
            if key.nullable {
                return Err(SegmentError::InvalidSchema(format!(
                    "primary key '{}' cannot be nullable",
                    key.name
                )));
            }
        }

        Ok(())
    }

    /// Returns the primary key column, if any.
    pub fn primary_key_field(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Checks a record against the columns.
    pub fn check_record(&self, record: &Value) -> Result<(), SegmentError> {
        let object = record.as_object().ok_or(SegmentError::NotAnObject)?;

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) if field.nullable => {}
                None | Some(Value::Null) => {
                    return Err(SegmentError::MissingField(field.name.clone()));
                }
                Some(value) if !field.field_type.accepts(value) => {
                    return Err(SegmentError::TypeMismatch {
                        field: field.name.clone(),
                        expected: field.field_type.as_str(),
                        actual: json_type(value),
                    });
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new("docs")
            .primary_key("id", FieldType::Int)
            .field("title", FieldType::String)
            .field("embedding", FieldType::Vector)
            .nullable_field("meta", FieldType::Json)
    }

    #[test]
    fn test_valid_record() {
        let s = schema();
        s.validate().unwrap();
        s.check_record(&json!({"id": 1, "title": "a", "embedding": [0.1, 2]}))
            .unwrap();
        s.check_record(&json!({"id": 1, "title": "a", "embedding": [], "meta": null}))
            .unwrap();
    }

    #[test]
    fn test_record_errors() {
        let s = schema();
        assert!(matches!(
            s.check_record(&json!([1, 2])),
            Err(SegmentError::NotAnObject)
        ));
        assert!(matches!(
            s.check_record(&json!({"id": 1, "embedding": []})),
            Err(SegmentError::MissingField(f)) if f == "title"
        ));
        match s.check_record(&json!({"id": 1.5, "title": "a", "embedding": []})) {
            Err(SegmentError::TypeMismatch {
                field,
                expected,
                actual,
            }) => {
                assert_eq!(field, "id");
                assert_eq!(expected, "int");
                assert_eq!(actual, "float");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            s.check_record(&json!({"id": 1, "title": "a", "embedding": ["x"]})),
            Err(SegmentError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_schemas() {
        let dup = TableSchema::new("t")
            .field("a", FieldType::Int)
            .field("a", FieldType::String);
        assert!(dup.validate().is_err());

        let two_keys = TableSchema::new("t")
            .primary_key("a", FieldType::Int)
            .primary_key("b", FieldType::Int);
        assert!(two_keys.validate().is_err());

        let float_key = TableSchema::new("t").primary_key("a", FieldType::Float);
        assert!(float_key.validate().is_err());

        assert!(TableSchema::new("").validate().is_err());
    }

    #[test]
    fn test_schema_yaml_shape() {
        let s: TableSchema = serde_json::from_value(json!({
            "name": "docs",
            "fields": [
                {"name": "id", "type": "int", "primary_key": true},
                {"name": "body", "type": "string"}
            ]
        }))
        .unwrap();
        assert_eq!(s.primary_key_field().unwrap().name, "id");
        assert!(!s.fields[1].nullable);
    }
}
