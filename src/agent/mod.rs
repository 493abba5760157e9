//! Agent layer: the bounded reasoning loop that turns a question into a
//! verified SPARQL query.
//!
//! - **Action model** (`action`): closed set of actions, proposals, observations
//! - **Dispatch** (`dispatch`): runs an action against the graph store
//! - **Agent state** (`state`): append-only history and the best query so far
//! - **Proposers** (`proposer`): keyword fallback and Ollama-backed LLM
//! - **Loop controller** (`controller`): budget, duplicate guard, cancellation

pub mod action;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod proposer;
pub mod state;

pub use action::{Action, ActionKind, Observation, ObservationStatus, ProposedAction};
pub use controller::{LoopConfig, LoopController, LoopStatus, RunOutcome};
pub use error::{AgentError, AgentResult, ProposalError, ProposerError, ProposerResult};
pub use llm::{LlmError, OllamaClient, OllamaConfig};
pub use proposer::{FallbackProposer, LlmProposer, Proposer};
pub use state::AgentState;
