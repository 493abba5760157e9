//! Graph Store: a Brick building graph held in an oxigraph RDF store.
//!
//! - **Store** ([`BrickStore`]): search, describe, property examples and SPARQL execution
//! - **Ingest** ([`ingest`]): Turtle schema loading and CSV timeseries observations
//!
//! Entities are addressed by their local name inside the building namespace
//! (`RM_TEMP`), by a prefixed name (`bldg:RM_TEMP`) or by a full IRI.

pub mod ingest;
pub mod store;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use store::{BrickStore, StoreConfig};

/// Brick schema namespace.
pub const BRICK_NS: &str = "https://brickschema.org/schema/Brick#";
/// Brick `ref` namespace used for timeseries observations.
pub const REF_NS: &str = "https://brickschema.org/schema/Brick/ref#";
pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RDFS_NS: &str = "http://www.w3.org/2000/01/rdf-schema#";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

/// Local part of an IRI: text after the last `#`, else after the last `/`.
pub fn local_name(iri: &str) -> &str {
    if let Some((_, local)) = iri.rsplit_once('#') {
        return local;
    }
    match iri.rsplit_once('/') {
        Some((_, local)) if !local.is_empty() => local,
        _ => iri,
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A related entity or a literal value on the object side of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Another node in the graph.
    Entity { id: String, iri: String },
    /// A literal with its datatype IRI.
    Literal { value: String, datatype: String },
}

impl PropertyValue {
    /// The value as shown to the proposer: local name for entities, lexical form for literals.
    pub fn display_value(&self) -> &str {
        match self {
            Self::Entity { id, .. } => id,
            Self::Literal { value, .. } => value,
        }
    }
}

/// Everything the store knows about one entity's outgoing edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDetail {
    /// Identifier as requested by the caller.
    pub id: String,
    /// Resolved IRI.
    pub iri: String,
    /// Local names of the entity's `rdf:type` tags.
    pub types: Vec<String>,
    /// Property local name to every value, in store order.
    pub properties: BTreeMap<String, Vec<PropertyValue>>,
}

/// One hit from [`BrickStore::search`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    /// Local name of the entity.
    pub id: String,
    pub iri: String,
    /// `rdfs:label`, when present.
    pub label: Option<String>,
    /// Local names of the entity's types.
    pub types: Vec<String>,
    /// Relevance score; higher is better.
    pub score: u32,
}

/// A (subject, property, object) usage of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyExample {
    pub subject: String,
    pub property: String,
    pub object: String,
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

/// One result row: output variable name to rendered value. Unbound variables are absent.
pub type Row = BTreeMap<String, String>;

/// Outcome class of a SPARQL execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStatus {
    Success,
    EmptyResult,
    SyntaxError,
    ExecutionError,
}

impl QueryStatus {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Success => "Query executed successfully",
            Self::EmptyResult => "Query returned no results",
            Self::SyntaxError => "Query has syntax error",
            Self::ExecutionError => "Query execution encountered an error",
        }
    }
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::EmptyResult => "empty_result",
            Self::SyntaxError => "syntax_error",
            Self::ExecutionError => "execution_error",
        };
        f.write_str(s)
    }
}

/// Structured outcome of executing a candidate query against the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Query text as submitted (before prefix injection).
    pub query: String,
    /// Output variables in projection order.
    pub variables: Vec<String>,
    pub rows: Vec<Row>,
    pub status: QueryStatus,
    /// Store error message for failed executions.
    pub error: Option<String>,
}

impl QueryResult {
    pub(crate) fn failed(query: &str, status: QueryStatus, error: String) -> Self {
        Self {
            query: query.to_string(),
            variables: Vec::new(),
            rows: Vec::new(),
            status,
            error: Some(error),
        }
    }

    /// Whether the query was executable. An empty result set still counts.
    pub fn succeeded(&self) -> bool {
        matches!(self.status, QueryStatus::Success | QueryStatus::EmptyResult)
    }

    /// Whether the query returned at least one row.
    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }

    /// Render the rows as a fixed-width text table.
    ///
    /// Beyond `max_rows`, the first and last halves are shown around an
    /// omission marker.
    pub fn to_table(&self, max_rows: usize) -> String {
        if self.rows.is_empty() {
            return "No results".into();
        }

        let columns: Vec<&str> = if self.variables.is_empty() {
            let mut seen: Vec<&str> = Vec::new();
            for row in &self.rows {
                for key in row.keys() {
                    if !seen.contains(&key.as_str()) {
                        seen.push(key.as_str());
                    }
                }
            }
            seen
        } else {
            self.variables.iter().map(|v| v.as_str()).collect()
        };

        let cell = |row: &Row, col: &str| row.get(col).cloned().unwrap_or_default();

        let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
        for row in &self.rows {
            for (i, col) in columns.iter().enumerate() {
                widths[i] = widths[i].max(cell(row, col).chars().count());
            }
        }

        let format_line = |values: Vec<String>| -> String {
            values
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{v:>w$}", w = *w))
                .collect::<Vec<_>>()
                .join(" ")
        };

        let mut lines = vec![format_line(columns.iter().map(|c| c.to_string()).collect())];
        let row_line = |row: &Row| format_line(columns.iter().map(|c| cell(row, c)).collect());

        let max_rows = max_rows.max(1);
        if self.rows.len() > max_rows {
            let head = max_rows / 2;
            let tail = max_rows - head;
            lines.extend(self.rows[..head].iter().map(&row_line));
            lines.push(format!("... ({} rows omitted) ...", self.rows.len() - max_rows));
            lines.extend(self.rows[self.rows.len() - tail..].iter().map(&row_line));
        } else {
            lines.extend(self.rows.iter().map(&row_line));
        }

        lines.join("\n")
    }
}
