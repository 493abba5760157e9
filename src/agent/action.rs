//! Action model: the closed set of operations the reasoning loop may perform.
//!
//! A [`ProposedAction`] is what the proposer hands back: a rationale, a raw kind
//! name and an argument. Validation turns it into an [`ActionKind`], and only the
//! loop controller produces an observed [`Action`], so an action without an
//! observation never appears in history.

use serde::{Deserialize, Serialize};

use super::error::ProposalError;

/// The five operations available to the proposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Keyword search over entities.
    Search,
    /// Full property listing for one entity.
    DescribeEntity,
    /// Usage examples for one property.
    DescribeProperty,
    /// Run a SPARQL query.
    ExecuteQuery,
    /// Finish the run.
    Stop,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        Self::Search,
        Self::DescribeEntity,
        Self::DescribeProperty,
        Self::ExecuteQuery,
        Self::Stop,
    ];

    /// Canonical kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::DescribeEntity => "describe-entity",
            Self::DescribeProperty => "describe-property",
            Self::ExecuteQuery => "execute-query",
            Self::Stop => "stop",
        }
    }

    /// Resolve a kind name, accepting canonical names, underscore spellings and
    /// the Brick tool names (`search_brick`, `get_brick_entity`, ...). Case-insensitive.
    pub fn parse(name: &str) -> Result<Self, ProposalError> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "search" | "search-brick" => Ok(Self::Search),
            "describe-entity" | "get-brick-entity" | "get-entity" => Ok(Self::DescribeEntity),
            "describe-property" | "get-property-examples" | "property-examples" => {
                Ok(Self::DescribeProperty)
            }
            "execute-query" | "execute-sparql" | "sparql" => Ok(Self::ExecuteQuery),
            "stop" => Ok(Self::Stop),
            _ => Err(ProposalError::UnknownActionKind {
                name: name.trim().to_string(),
            }),
        }
    }

    /// Whether an empty argument makes the action meaningless.
    pub fn requires_argument(&self) -> bool {
        !matches!(self, Self::Stop)
    }

    /// One-line usage for prompts.
    pub fn usage(&self) -> &'static str {
        match self {
            Self::Search => "search(text): find entities (sensors, equipment) whose id, label or type matches the text",
            Self::DescribeEntity => "describe-entity(entity_id): list every property and relationship of an entity",
            Self::DescribeProperty => "describe-property(property_name): show example usages of a property",
            Self::ExecuteQuery => "execute-query(SPARQL): run a SPARQL query and see its results",
            Self::Stop => "stop(): accept the last successful query as the final answer",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate action from the proposer, not yet validated or executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedAction {
    /// Free-text rationale.
    pub thought: String,
    /// Kind name as proposed; may be outside the closed set.
    pub kind: String,
    pub argument: String,
}

impl ProposedAction {
    pub fn new(thought: impl Into<String>, kind: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            thought: thought.into(),
            kind: kind.into(),
            argument: argument.into(),
        }
    }

    /// Build a proposal for a known kind.
    pub fn of(kind: ActionKind, thought: impl Into<String>, argument: impl Into<String>) -> Self {
        Self::new(thought, kind.as_str(), argument)
    }

    /// Check the kind against the closed set and the argument against the kind.
    pub fn validate(&self) -> Result<ActionKind, ProposalError> {
        let kind = ActionKind::parse(&self.kind)?;
        if kind.requires_argument() && self.argument.trim().is_empty() {
            return Err(ProposalError::MissingArgument { kind });
        }
        Ok(kind)
    }
}

/// Status carried by every observation so proposers need not parse text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObservationStatus {
    /// Executed with a non-empty outcome.
    Ok,
    /// Executed, nothing matched (empty search or empty result set).
    Empty,
    /// The entity or property does not exist.
    NotFound,
    /// The query could not be parsed or evaluated.
    ExecutionError,
    /// The proposal was invalid and was not executed.
    Rejected,
    /// The proposal repeated a recent action and was not executed.
    Duplicate,
}

impl ObservationStatus {
    /// Whether the action reached the store (or the stop no-op).
    pub fn was_dispatched(&self) -> bool {
        !matches!(self, Self::Rejected | Self::Duplicate)
    }
}

impl std::fmt::Display for ObservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Empty => "empty",
            Self::NotFound => "not-found",
            Self::ExecutionError => "execution-error",
            Self::Rejected => "rejected",
            Self::Duplicate => "duplicate",
        };
        f.write_str(s)
    }
}

/// Result of executing (or refusing) an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub status: ObservationStatus,
    /// Text shown to the proposer.
    pub text: String,
    /// Entity identifiers the observation refers to, most relevant first.
    pub entities: Vec<String>,
}

impl Observation {
    pub fn new(status: ObservationStatus, text: impl Into<String>) -> Self {
        Self {
            status,
            text: text.into(),
            entities: Vec::new(),
        }
    }

    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = entities;
        self
    }
}

/// One observed step of reasoning, as stored in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub thought: String,
    /// Kind name as proposed.
    pub name: String,
    /// Validated kind; `None` when the proposal named no known kind.
    pub kind: Option<ActionKind>,
    pub argument: String,
    pub observation: Observation,
}

impl Action {
    pub(crate) fn observed(
        proposal: ProposedAction,
        kind: Option<ActionKind>,
        observation: Observation,
    ) -> Self {
        Self {
            thought: proposal.thought,
            name: kind.map(|k| k.as_str().to_string()).unwrap_or(proposal.kind),
            kind,
            argument: proposal.argument,
            observation,
        }
    }

    /// Whether this step was actually executed.
    pub fn was_dispatched(&self) -> bool {
        self.observation.status.was_dispatched()
    }

    /// Whether this is the same operation as a proposal of `kind` with `argument`.
    pub fn same_as(&self, kind: ActionKind, argument: &str) -> bool {
        self.kind == Some(kind) && self.argument == argument
    }

    /// `Thought / Action / Observation` transcript block.
    pub fn render(&self, include_observation: bool) -> String {
        let mut out = format!(
            "Thought: {}\nAction: {}({})\n",
            self.thought, self.name, self.argument
        );
        if include_observation {
            out.push_str(&format!(
                "Observation [{}]: {}\n",
                self.observation.status, self.observation.text
            ));
        }
        out
    }
}
