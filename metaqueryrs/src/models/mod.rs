//! Metadata model: tables, columns, views, filters and link requests.

mod column;
mod filter;
mod view;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use column::{
    AiFieldOptions, BarcodeOptions, ButtonOptions, ColOptions, Column, FormulaOptions, LinkOptions,
    LookupOptions, QrCodeOptions, RelationType, RollupFunction, RollupOptions, Uidt,
};
pub use filter::{
    ComparisonOp, ComparisonSubOp, Filter, FilterCondition, LogicalOp, Sort, SortDirection,
};
pub use view::{View, ViewColumn, ViewMeta, ViewType};

/// A table row as stored in the meta store, without its columns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TableMeta {
    pub id: String,
    pub base_id: String,
    #[serde(default)]
    pub title: String,
    pub table_name: String,
}

/// A table together with its ordered columns, cached as one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub id: String,
    pub base_id: String,
    pub title: String,
    pub table_name: String,
    pub columns: Vec<Column>,
}

impl Model {
    pub fn new(meta: TableMeta, columns: Vec<Column>) -> Self {
        Self {
            id: meta.id,
            base_id: meta.base_id,
            title: meta.title,
            table_name: meta.table_name,
            columns,
        }
    }

    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_by_title(&self, title: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.title == title)
    }

    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key)
    }

    /// The display-value column, falling back to the first non-key stored column.
    pub fn display_value(&self) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.display_value)
            .or_else(|| {
                self.columns
                    .iter()
                    .find(|c| !c.primary_key && !c.system && !c.uidt.is_virtual())
            })
            .or_else(|| self.primary_key())
    }
}

/// Primary-key value of a record as it appears in link requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    pub fn to_value(&self) -> Value {
        match self {
            RecordId::Int(i) => Value::from(*i),
            RecordId::Text(s) => Value::String(s.clone()),
        }
    }

    /// Converts a value read back from a driver. Numeric strings and
    /// integers compare equal through `key`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordId::Int),
            Value::String(s) => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }

    /// Normalized textual form used for set membership across drivers.
    pub fn key(&self) -> String {
        match self {
            RecordId::Int(i) => i.to_string(),
            RecordId::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Int(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

/// One row and the related records to link to or unlink from it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRow {
    pub row_id: RecordId,
    pub link_ids: Vec<RecordId>,
}

impl LinkRow {
    pub fn new(row_id: impl Into<RecordId>, link_ids: Vec<RecordId>) -> Self {
        Self {
            row_id: row_id.into(),
            link_ids,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub model_id: String,
    pub column_id: String,
    #[serde(default)]
    pub links: Vec<LinkRow>,
    #[serde(default)]
    pub unlinks: Vec<LinkRow>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn link_request_parses_camel_case() {
        let req: LinkRequest = serde_json::from_value(json!({
            "modelId": "m1",
            "columnId": "c1",
            "links": [{ "rowId": 1, "linkIds": [2, "abc"] }]
        }))
        .unwrap();
        assert_eq!(req.links[0].row_id, RecordId::Int(1));
        assert_eq!(req.links[0].link_ids[1], RecordId::Text("abc".into()));
        assert!(req.unlinks.is_empty());
    }

    #[test]
    fn display_value_falls_back_to_first_stored_column() {
        let model = Model {
            id: "m1".into(),
            base_id: "b1".into(),
            title: "Films".into(),
            table_name: "films".into(),
            columns: vec![
                Column::plain("c1", "m1", "Id", "id", Uidt::ID).primary(),
                Column::plain("c2", "m1", "Title", "title", Uidt::SingleLineText),
            ],
        };
        assert_eq!(model.display_value().map(|c| c.id.as_str()), Some("c2"));
    }
}
