//! Loading a Brick graph: Turtle schema documents and CSV timeseries.
//!
//! Schema IRIs that contain the configured rebase marker (for example
//! `file:///data/bldg-59#RM_TEMP`, produced by relative prefixes in the source
//! document) are rewritten into the building namespace so queries can address
//! them as `bldg:RM_TEMP`.
//!
//! Timeseries tables have a `Datetime` column followed by one column per
//! sensor. Each numeric cell becomes an observation node:
//!
//! ```text
//! bldg:RM_TEMP ref:hasObservation bldg:obs_RM_TEMP_42 .
//! bldg:obs_RM_TEMP_42 ref:hasTimestamp "2018-12-31T23:59:00"^^xsd:dateTime ;
//!                     ref:hasValue "71.5"^^xsd:float .
//! ```

use std::io::{BufReader, Read};
use std::path::Path;

use chrono::NaiveDateTime;
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::vocab::xsd;
use oxigraph::model::{GraphName, Literal, NamedNode, Quad};

use crate::error::{GraphError, GraphResult, IngestError, IngestResult};

use super::store::BrickStore;
use super::REF_NS;

/// Name of the timestamp column in timeseries tables.
pub const DATETIME_COLUMN: &str = "Datetime";

/// Base IRI relative references in schema documents are resolved against.
const SCHEMA_BASE_IRI: &str = "file:///";

/// Timestamp layouts accepted in timeseries tables, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &["%m/%d/%Y %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

impl BrickStore {
    /// Load a Turtle schema file and mark the store loaded.
    pub fn load_turtle_file(&self, path: &Path) -> GraphResult<usize> {
        let file = std::fs::File::open(path).map_err(|source| GraphError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.load_turtle(BufReader::new(file), &path.display().to_string())
    }

    /// Load a Turtle schema document from a string and mark the store loaded.
    pub fn load_turtle_str(&self, turtle: &str) -> GraphResult<usize> {
        self.load_turtle(turtle.as_bytes(), "<inline>")
    }

    fn load_turtle(&self, reader: impl Read, source_name: &str) -> GraphResult<usize> {
        let parser = RdfParser::from_format(RdfFormat::Turtle)
            .with_base_iri(SCHEMA_BASE_IRI)
            .map_err(|e| GraphError::SchemaLoad {
                source_name: source_name.to_string(),
                message: e.to_string(),
            })?;

        let before = self.len()?;
        self.store()
            .load_from_reader(parser, reader)
            .map_err(|e| GraphError::SchemaLoad {
                source_name: source_name.to_string(),
                message: e.to_string(),
            })?;
        self.rebase_building_iris()?;

        let added = self.len()?.saturating_sub(before);
        self.mark_loaded();
        tracing::info!(source = source_name, triples = added, "loaded schema");
        Ok(added)
    }

    /// Rewrite subject and object IRIs containing the rebase marker into the building namespace.
    fn rebase_building_iris(&self) -> GraphResult<()> {
        let config = self.config();
        if config.rebase_marker.is_empty() {
            return Ok(());
        }
        let marker = sparql_string(&config.rebase_marker);
        let ns = sparql_string(&config.building_namespace);
        let needs = |var: &str| {
            format!("(isIRI({var}) && CONTAINS(STR({var}), {marker}) && !STRSTARTS(STR({var}), {ns}))")
        };
        let rebased = |var: &str, out: &str| {
            format!(
                "BIND(IF({}, IRI(CONCAT({ns}, STRAFTER(STR({var}), {marker}))), {var}) AS {out})",
                needs(var)
            )
        };

        let update = format!(
            "DELETE {{ ?s ?p ?o }} INSERT {{ ?s2 ?p ?o2 }} WHERE {{ \
               ?s ?p ?o . FILTER({} || {}) {} {} }}",
            needs("?s"),
            needs("?o"),
            rebased("?s", "?s2"),
            rebased("?o", "?o2"),
        );

        self.store()
            .update(update.as_str())
            .map_err(|e| GraphError::Sparql {
                message: format!("namespace rebase failed: {e}"),
            })
    }

    /// Ingest a CSV timeseries file. Returns the number of observations added.
    pub fn ingest_timeseries_csv(&self, path: &Path) -> IngestResult<usize> {
        let content = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.ingest_timeseries_str(&content)
    }

    /// Ingest CSV timeseries text. Only the trailing `max_csv_rows` rows are kept.
    pub fn ingest_timeseries_str(&self, content: &str) -> IngestResult<usize> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header: Vec<String> = split_row(lines.next().ok_or(IngestError::EmptyTable)?);
        let time_col = header
            .iter()
            .position(|h| h == DATETIME_COLUMN)
            .ok_or_else(|| IngestError::MissingColumn {
                column: DATETIME_COLUMN.into(),
            })?;

        let rows: Vec<&str> = lines.collect();
        let skip = rows.len().saturating_sub(self.config().max_csv_rows);

        let has_observation = named_node(&format!("{REF_NS}hasObservation"))?;
        let has_timestamp = named_node(&format!("{REF_NS}hasTimestamp"))?;
        let has_value = named_node(&format!("{REF_NS}hasValue"))?;
        let ns = self.config().building_namespace.clone();

        let mut sensors: Vec<Option<NamedNode>> = Vec::with_capacity(header.len());
        for (i, column) in header.iter().enumerate() {
            if i == time_col {
                sensors.push(None);
                continue;
            }
            match NamedNode::new(format!("{ns}{column}")) {
                Ok(node) => sensors.push(Some(node)),
                Err(_) => {
                    tracing::warn!(column = %column, "skipping column that is not a valid IRI local name");
                    sensors.push(None);
                }
            }
        }

        let mut added = 0usize;
        for (row_idx, line) in rows.iter().enumerate().skip(skip) {
            let cells = split_row(line);
            let Some(raw_ts) = cells.get(time_col) else {
                continue;
            };
            let Some(timestamp) = normalize_timestamp(raw_ts) else {
                tracing::warn!(row = row_idx, timestamp = %raw_ts, "skipping row with unparseable timestamp");
                continue;
            };

            for (col, cell) in cells.iter().enumerate() {
                let (Some(Some(sensor)), Some(column)) = (sensors.get(col), header.get(col)) else {
                    continue;
                };
                let Ok(value) = cell.parse::<f64>() else {
                    continue;
                };
                if value.is_nan() {
                    continue;
                }

                let obs = named_node(&format!("{ns}obs_{column}_{row_idx}"))?;
                let quads = [
                    Quad::new(sensor.clone(), has_observation.clone(), obs.clone(), GraphName::DefaultGraph),
                    Quad::new(
                        obs.clone(),
                        has_timestamp.clone(),
                        Literal::new_typed_literal(timestamp.as_str(), xsd::DATE_TIME),
                        GraphName::DefaultGraph,
                    ),
                    Quad::new(
                        obs,
                        has_value.clone(),
                        Literal::new_typed_literal(value.to_string(), xsd::FLOAT),
                        GraphName::DefaultGraph,
                    ),
                ];
                for quad in &quads {
                    self.store().insert(quad).map_err(|e| GraphError::Sparql {
                        message: format!("insert failed: {e}"),
                    })?;
                }
                added += 1;
            }
        }

        tracing::info!(
            observations = added,
            rows = rows.len() - skip,
            total_rows = rows.len(),
            "ingested timeseries"
        );
        Ok(added)
    }
}

fn named_node(iri: &str) -> GraphResult<NamedNode> {
    NamedNode::new(iri).map_err(|_| GraphError::InvalidIri { iri: iri.to_string() })
}

fn split_row(line: &str) -> Vec<String> {
    line.split(',')
        .map(|f| f.trim().trim_matches('"').to_string())
        .collect()
}

/// Convert a table timestamp to ISO `YYYY-MM-DDTHH:MM:SS`.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
}

/// Quote a value as a SPARQL string literal.
fn sparql_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
