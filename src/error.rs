//! Rich diagnostic error types for brick-agent.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Only precondition and infrastructure
//! failures travel as errors: data-shape problems met while reasoning are turned
//! into observations by the agent layer instead.

use miette::Diagnostic;
use thiserror::Error;

use crate::agent::error::AgentError;
use crate::agent::llm::LlmError;
use crate::config::ConfigError;

/// Top-level error type for brick-agent.
#[derive(Debug, Error, Diagnostic)]
pub enum BrickError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Llm(#[from] LlmError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("failed to create the RDF store: {message}")]
    #[diagnostic(
        code(brick::graph::store_init),
        help("The embedded oxigraph store could not be created. This is usually an allocation problem.")
    )]
    StoreInit { message: String },

    #[error("failed to load schema \"{source_name}\": {message}")]
    #[diagnostic(
        code(brick::graph::schema_load),
        help(
            "The schema document must be valid Turtle. Relative IRIs are resolved \
             against `file:///` before building-namespace rebasing."
        )
    )]
    SchemaLoad { source_name: String, message: String },

    #[error("I/O error reading \"{path}\"")]
    #[diagnostic(
        code(brick::graph::io),
        help("Check that the file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid IRI: {iri}")]
    #[diagnostic(
        code(brick::graph::invalid_iri),
        help("Check the building namespace in the configuration; it must be an absolute IRI such as `urn:bldg-59#`.")
    )]
    InvalidIri { iri: String },

    #[error("SPARQL error: {message}")]
    #[diagnostic(
        code(brick::graph::sparql),
        help("An internal store query failed. This indicates a storage problem rather than a bad user query.")
    )]
    Sparql { message: String },
}

// ---------------------------------------------------------------------------
// Ingest errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("I/O error reading timeseries \"{path}\"")]
    #[diagnostic(
        code(brick::ingest::io),
        help("Check that the CSV file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timeseries table has no header row")]
    #[diagnostic(
        code(brick::ingest::empty),
        help("The first line of the CSV must name the columns, starting with `Datetime`.")
    )]
    EmptyTable,

    #[error("timeseries table is missing the \"{column}\" column")]
    #[diagnostic(
        code(brick::ingest::missing_column),
        help("Every row needs a timestamp. Rename the timestamp column to `{column}`.")
    )]
    MissingColumn { column: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

/// Convenience alias for top-level operations.
pub type BrickResult<T> = std::result::Result<T, BrickError>;

/// Convenience alias for graph store operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Convenience alias for ingestion.
pub type IngestResult<T> = std::result::Result<T, IngestError>;
