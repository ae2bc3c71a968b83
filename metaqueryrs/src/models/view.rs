use serde::{Deserialize, Serialize};

use super::filter::{Filter, Sort};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewType {
    #[default]
    Grid,
    Gallery,
    Kanban,
    Form,
    Map,
    Calendar,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ViewMeta {
    pub id: String,
    #[serde(alias = "fk_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "type")]
    pub view_type: ViewType,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViewColumn {
    #[serde(alias = "fk_column_id")]
    pub column_id: String,
    #[serde(default = "default_show")]
    pub show: bool,
    #[serde(default)]
    pub width: Option<String>,
    #[serde(default)]
    pub order: f64,
    /// Footer aggregation chosen in the view, passed through to callers.
    #[serde(default)]
    pub aggregation: Option<String>,
}

fn default_show() -> bool {
    true
}

impl ViewColumn {
    pub fn new(column_id: impl Into<String>, order: f64) -> Self {
        Self {
            column_id: column_id.into(),
            show: true,
            width: None,
            order,
            aggregation: None,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.show = false;
        self
    }
}

/// A view with its columns, filters and sorts, cached as one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub meta: ViewMeta,
    pub columns: Vec<ViewColumn>,
    pub filters: Vec<Filter>,
    pub sorts: Vec<Sort>,
}

impl View {
    /// View columns sorted by their display order; ties keep stored order.
    pub fn ordered_columns(&self) -> Vec<&ViewColumn> {
        let mut cols: Vec<&ViewColumn> = self.columns.iter().collect();
        cols.sort_by(|a, b| a.order.total_cmp(&b.order));
        cols
    }

    pub fn view_column(&self, column_id: &str) -> Option<&ViewColumn> {
        self.columns.iter().find(|c| c.column_id == column_id)
    }
}
