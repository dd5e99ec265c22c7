use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Server-assigned row identifier (`OBJECTID`).
pub type ObjectId = i64;

// ===== TABLES =====

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Categories,
    Templates,
    Layers,
    TemplateLayerRelationships,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Categories,
        Table::Templates,
        Table::Layers,
        Table::TemplateLayerRelationships,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Table::Categories => "Categories",
            Table::Templates => "Templates",
            Table::Layers => "Layers",
            Table::TemplateLayerRelationships => "Template Layer Relationships",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Attribute names used by the four tables.
pub mod fields {
    pub const OBJECTID: &str = "OBJECTID";
    pub const TITLE: &str = "TITLE";
    pub const URL: &str = "URL";
    pub const SCOPE: &str = "SCOPE";
    pub const CATEGORYID: &str = "CATEGORYID";
    pub const RENDERER: &str = "RENDERER";
    pub const FILTER: &str = "FILTER";
    pub const SOURCE: &str = "SOURCE";
    pub const DESCRIPTION: &str = "DESCRIPTION";
    pub const TEMPLATEID: &str = "TEMPLATEID";
    pub const LAYERID: &str = "LAYERID";
}

// ===== ROWS =====

/// One feature's attributes, as returned by a table query.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct Row {
    attributes: Map<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.attributes.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field).filter(|value| !value.is_null())
    }

    /// Integer attribute. Numeric strings are accepted because some services
    /// return identifiers as text.
    pub fn integer(&self, field: &str) -> Option<ObjectId> {
        match self.get(field)? {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text attribute; numbers and booleans are rendered as text, null is `None`.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }
}

impl From<Map<String, Value>> for Row {
    fn from(attributes: Map<String, Value>) -> Self {
        Self { attributes }
    }
}

// ===== QUERIES =====

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Query {
    pub where_clause: String,
    pub out_fields: Vec<String>,
    pub order_by: Vec<String>,
}

impl Query {
    /// Every row, every field, server order.
    pub fn all() -> Self {
        Self {
            where_clause: "1=1".to_string(),
            out_fields: vec!["*".to_string()],
            order_by: Vec::new(),
        }
    }

    /// Rows whose `field` equals `value` exactly.
    pub fn equals(field: &str, value: impl Into<Value>) -> Self {
        Self {
            where_clause: equality_clause(field, &value.into()),
            ..Self::all()
        }
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.out_fields = fields.iter().map(|field| field.to_string()).collect();
        self
    }

    pub fn order_by(mut self, fields: &[&str]) -> Self {
        self.order_by = fields.iter().map(|field| field.to_string()).collect();
        self
    }
}

/// `FIELD = 'text'` or `FIELD = 42`.
pub fn equality_clause(field: &str, value: &Value) -> String {
    match value {
        Value::Number(number) => format!("{field} = {number}"),
        Value::String(text) => format!("{field} = {}", sql_quote(text)),
        other => format!("{field} = {}", sql_quote(&other.to_string())),
    }
}

/// Quotes `text` as a SQL string literal, doubling embedded single quotes.
pub fn sql_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

// ===== EDITS =====

/// Per-row outcome of an insert or delete.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EditResult {
    pub object_id: Option<ObjectId>,
    pub success: bool,
    pub error: Option<String>,
}

impl EditResult {
    pub fn succeeded(object_id: ObjectId) -> Self {
        Self {
            object_id: Some(object_id),
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            object_id: None,
            success: false,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_accessors() {
        let row: Row = serde_json::from_value(json!({
            "OBJECTID": 7,
            "TITLE": "Parks",
            "CATEGORYID": "3",
            "FILTER": null
        }))
        .unwrap();

        assert_eq!(row.integer(fields::OBJECTID), Some(7));
        assert_eq!(row.integer(fields::CATEGORYID), Some(3));
        assert_eq!(row.text(fields::TITLE).as_deref(), Some("Parks"));
        assert_eq!(row.text(fields::FILTER), None);
        assert_eq!(row.integer(fields::TITLE), None);
    }

    #[test]
    fn test_sql_quote_escapes_single_quotes() {
        assert_eq!(sql_quote("Spring Event"), "'Spring Event'");
        assert_eq!(sql_quote("O'Hare"), "'O''Hare'");
        assert_eq!(
            Query::equals(fields::TITLE, "O'Hare").where_clause,
            "TITLE = 'O''Hare'"
        );
        assert_eq!(Query::equals(fields::OBJECTID, 12).where_clause, "OBJECTID = 12");
    }
}
