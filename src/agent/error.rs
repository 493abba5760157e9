//! Agent-specific error types with rich miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use super::action::ActionKind;
use super::controller::LoopStatus;

/// Errors that stop the reasoning loop from being driven at all.
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("the graph store has no schema loaded")]
    #[diagnostic(
        code(brick::agent::store_not_loaded),
        help("Load a Brick Turtle file with `BrickStore::load_turtle_file` before starting a run.")
    )]
    StoreNotLoaded,

    #[error("the run has already finished ({status})")]
    #[diagnostic(
        code(brick::agent::run_finished),
        help("Start a new run with `LoopController::start` to ask another question.")
    )]
    RunFinished { status: LoopStatus },
}

/// A proposal that names no known action or lacks a required argument.
///
/// Recorded as a rejected step rather than raised to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ProposalError {
    #[error("unknown action \"{name}\"")]
    #[diagnostic(
        code(brick::agent::unknown_action),
        help("Valid actions: search, describe-entity, describe-property, execute-query, stop.")
    )]
    UnknownActionKind { name: String },

    #[error("action {kind} needs an argument")]
    #[diagnostic(
        code(brick::agent::missing_argument),
        help("Only `stop` may be proposed with an empty argument.")
    )]
    MissingArgument { kind: ActionKind },
}

/// Failures of a proposer to produce any candidate action.
#[derive(Debug, Error, Diagnostic)]
pub enum ProposerError {
    #[error("proposer output could not be parsed: {message}")]
    #[diagnostic(
        code(brick::proposer::malformed),
        help("Expected `Thought: ...` followed by `Action: name(argument)`, or a JSON object with thought, action and argument.")
    )]
    Malformed { message: String },

    #[error("proposer unavailable: {message}")]
    #[diagnostic(
        code(brick::proposer::unavailable),
        help("Check that the language model backend is reachable, or run without `--llm`.")
    )]
    Unavailable { message: String },
}

impl From<super::llm::LlmError> for ProposerError {
    fn from(e: super::llm::LlmError) -> Self {
        match e {
            super::llm::LlmError::ParseError { message } => Self::Malformed { message },
            other => Self::Unavailable {
                message: other.to_string(),
            },
        }
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;

pub type ProposerResult<T> = std::result::Result<T, ProposerError>;
