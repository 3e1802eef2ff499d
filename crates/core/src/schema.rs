use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
}

/// Cached table/column metadata describing the queryable dataset.
///
/// Populated once at startup (or on explicit refresh) and shared
/// read-only across concurrent runs; nothing in an agent run mutates it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContext {
    pub tables: BTreeMap<String, Vec<ColumnInfo>>,
}

impl SchemaContext {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Compact one-table-per-line rendering used in prompts:
    /// `sales_transactions(transaction_id INTEGER, sale_date TEXT, ...)`.
    pub fn summary(&self) -> String {
        let mut lines = Vec::with_capacity(self.tables.len());
        for (table, columns) in &self.tables {
            let rendered = columns
                .iter()
                .map(|column| format!("{} {}", column.name, column.sql_type))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("{table}({rendered})"));
        }
        lines.join("\n")
    }
}
