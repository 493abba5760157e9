//! Per-question agent state: the append-only history of observed actions and
//! the best executable query seen so far.

use serde::{Deserialize, Serialize};

use crate::graph::QueryResult;

use super::action::{Action, ActionKind};

/// Observations of search and describe steps older than this many steps are
/// elided from the rendered history.
const RECENT_OBSERVATIONS: usize = 2;

/// State of one reasoning run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub question: String,
    actions: Vec<Action>,
    generated_queries: Vec<QueryResult>,
    best: Option<QueryResult>,
}

impl AgentState {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    /// Every recorded step in order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Number of recorded steps, including rejected and duplicate ones.
    pub fn steps(&self) -> usize {
        self.actions.len()
    }

    /// Number of steps that reached the store.
    pub fn dispatched(&self) -> usize {
        self.actions.iter().filter(|a| a.was_dispatched()).count()
    }

    /// Every query executed so far, in order.
    pub fn generated_queries(&self) -> &[QueryResult] {
        &self.generated_queries
    }

    /// Most recent query that executed without error, if any.
    pub fn best(&self) -> Option<&QueryResult> {
        self.best.as_ref()
    }

    pub fn last_action(&self) -> Option<&Action> {
        self.actions.last()
    }

    pub(crate) fn record(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Record an executed query. Only an executable one can become the best.
    pub(crate) fn record_query(&mut self, result: QueryResult) {
        if result.succeeded() {
            self.best = Some(result.clone());
        }
        self.generated_queries.push(result);
    }

    /// The last `n` recorded steps.
    pub fn history_window(&self, n: usize) -> &[Action] {
        let start = self.actions.len().saturating_sub(n);
        &self.actions[start..]
    }

    /// Whether any of the last `window` steps has the same kind and argument.
    pub fn is_duplicate(&self, kind: ActionKind, argument: &str, window: usize) -> bool {
        self.history_window(window)
            .iter()
            .any(|a| a.same_as(kind, argument))
    }

    /// Transcript of the last `window` steps for prompting.
    pub fn render_history(&self, window: usize) -> String {
        render_actions(self.history_window(window))
    }
}

/// `Thought / Action / Observation` transcript of a run of steps.
///
/// Search and describe observations are only kept for the two most recent steps.
pub fn render_actions(actions: &[Action]) -> String {
    let cutoff = actions.len().saturating_sub(RECENT_OBSERVATIONS);
    actions
        .iter()
        .enumerate()
        .map(|(i, action)| {
            let elide = i < cutoff
                && matches!(
                    action.kind,
                    Some(ActionKind::Search | ActionKind::DescribeEntity)
                );
            action.render(!elide)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
