//! Loop Controller: drives propose → validate → dispatch → record until the
//! proposer stops, the iteration budget is spent, or the run is cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::graph::{BrickStore, QueryResult};

use super::action::{Action, ActionKind, Observation, ObservationStatus, ProposedAction};
use super::dispatch::dispatch;
use super::error::{AgentError, AgentResult};
use super::proposer::Proposer;
use super::state::AgentState;

/// Budgets and windows of the reasoning loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Maximum recorded steps per run, rejected and duplicate ones included.
    pub max_iterations: usize,
    /// Number of trailing steps searched by the duplicate guard.
    pub duplicate_window: usize,
    /// Number of trailing steps handed to the proposer.
    pub history_window: usize,
    /// Rows rendered into an execute-query observation.
    pub max_result_rows: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            duplicate_window: 5,
            history_window: 10,
            max_result_rows: 10,
        }
    }
}

impl LoopConfig {
    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_duplicate_window(mut self, n: usize) -> Self {
        self.duplicate_window = n;
        self
    }

    pub fn with_history_window(mut self, n: usize) -> Self {
        self.history_window = n;
        self
    }
}

/// Lifecycle of a run. Every state but `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopStatus {
    Running,
    StoppedByProposer,
    StoppedByBudget,
    Cancelled,
}

impl LoopStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::StoppedByProposer => "stopped by proposer",
            Self::StoppedByBudget => "stopped by budget",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A run: its state and where it is in the lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub state: AgentState,
    pub status: LoopStatus,
}

impl RunOutcome {
    /// Best executable query of the run, if any.
    pub fn best(&self) -> Option<&QueryResult> {
        self.state.best()
    }

    /// Whether the run produced a candidate answer.
    pub fn answered(&self) -> bool {
        self.best().is_some()
    }
}

/// Drives reasoning runs against one store with one proposer.
pub struct LoopController {
    store: Arc<BrickStore>,
    proposer: Box<dyn Proposer>,
    config: LoopConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl LoopController {
    pub fn new(store: Arc<BrickStore>, proposer: Box<dyn Proposer>, config: LoopConfig) -> Self {
        Self {
            store,
            proposer,
            config,
            cancel: None,
        }
    }

    /// Stop runs cooperatively when `flag` is raised. Checked before each step.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn store(&self) -> &BrickStore {
        &self.store
    }

    /// Begin a run for `question` without taking any step.
    pub fn start(&self, question: &str) -> AgentResult<RunOutcome> {
        if !self.store.is_loaded() {
            return Err(AgentError::StoreNotLoaded);
        }
        Ok(RunOutcome {
            state: AgentState::new(question),
            status: LoopStatus::Running,
        })
    }

    /// Answer `question`, stepping until a terminal state.
    pub fn run(&mut self, question: &str) -> AgentResult<RunOutcome> {
        let mut run = self.start(question)?;
        tracing::info!(
            question,
            proposer = self.proposer.name(),
            max_iterations = self.config.max_iterations,
            "run started"
        );
        while !run.status.is_terminal() {
            self.step(&mut run)?;
        }
        tracing::info!(
            status = %run.status,
            steps = run.state.steps(),
            dispatched = run.state.dispatched(),
            answered = run.answered(),
            "run finished"
        );
        Ok(run)
    }

    /// Ask the proposer for one action and execute it.
    ///
    /// Returns the step recorded by this call, or `None` when the budget or
    /// the cancel flag ended the run before a proposal was made.
    pub fn step<'r>(&mut self, run: &'r mut RunOutcome) -> AgentResult<Option<&'r Action>> {
        let before = run.state.steps();
        if !self.begin_iteration(run)? {
            self.propose_and_record(run);
        }
        Ok(run.state.actions().get(before))
    }

    /// Execute a caller-supplied action with the same validation and duplicate
    /// guard as [`step`](Self::step).
    pub fn execute_proposed<'r>(
        &mut self,
        run: &'r mut RunOutcome,
        proposal: ProposedAction,
    ) -> AgentResult<Option<&'r Action>> {
        let before = run.state.steps();
        if !self.begin_iteration(run)? {
            self.record_proposal(run, proposal);
        }
        Ok(run.state.actions().get(before))
    }

    fn propose_and_record(&mut self, run: &mut RunOutcome) -> LoopStatus {
        let window = run.state.history_window(self.config.history_window);
        match self.proposer.propose(&run.state.question, window) {
            Ok(proposal) => self.record_proposal(run, proposal),
            Err(e) => {
                tracing::warn!(
                    iteration = run.state.steps() + 1,
                    proposer = self.proposer.name(),
                    error = %e,
                    "proposer failed"
                );
                let observation = Observation::new(
                    ObservationStatus::Rejected,
                    format!("Rejected: {e}. Reply with one Thought and one Action."),
                );
                run.state.record(Action::observed(
                    ProposedAction::new("", "invalid", ""),
                    None,
                    observation,
                ));
                self.settle(run)
            }
        }
    }

    /// Refuse finished runs; returns `true` when the budget or the cancel flag
    /// ends the run before this iteration.
    fn begin_iteration(&self, run: &mut RunOutcome) -> AgentResult<bool> {
        if run.status.is_terminal() {
            return Err(AgentError::RunFinished { status: run.status });
        }
        if self
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            tracing::info!(steps = run.state.steps(), "run cancelled");
            run.status = LoopStatus::Cancelled;
            return Ok(true);
        }
        Ok(self.settle(run).is_terminal())
    }

    fn record_proposal(&mut self, run: &mut RunOutcome, mut proposal: ProposedAction) -> LoopStatus {
        let iteration = run.state.steps() + 1;
        proposal.argument = proposal.argument.trim().to_string();

        let kind = match proposal.validate() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!(iteration, kind = %proposal.kind, error = %e, "proposal rejected");
                let kind = ActionKind::parse(&proposal.kind).ok();
                let observation = Observation::new(
                    ObservationStatus::Rejected,
                    format!("Rejected: {e}. Valid actions: {}.", valid_actions()),
                );
                run.state.record(Action::observed(proposal, kind, observation));
                return self.settle(run);
            }
        };

        if run
            .state
            .is_duplicate(kind, &proposal.argument, self.config.duplicate_window)
        {
            tracing::warn!(iteration, kind = %kind, "duplicate action skipped");
            let observation = Observation::new(
                ObservationStatus::Duplicate,
                format!(
                    "Already tried {kind}({}) recently; the result would be the same. Try something different.",
                    proposal.argument
                ),
            );
            run.state.record(Action::observed(proposal, Some(kind), observation));
            return self.settle(run);
        }

        tracing::debug!(iteration, kind = %kind, argument = %proposal.argument, "dispatching action");
        let outcome = dispatch(
            &self.store,
            kind,
            &proposal.argument,
            self.config.max_result_rows,
        );
        tracing::debug!(iteration, status = %outcome.observation.status, "action observed");
        run.state
            .record(Action::observed(proposal, Some(kind), outcome.observation));
        if let Some(result) = outcome.query {
            run.state.record_query(result);
        }

        if kind == ActionKind::Stop {
            run.status = LoopStatus::StoppedByProposer;
            return run.status;
        }
        self.settle(run)
    }

    /// Apply the budget to a running run.
    fn settle(&self, run: &mut RunOutcome) -> LoopStatus {
        if !run.status.is_terminal() && run.state.steps() >= self.config.max_iterations {
            tracing::info!(max_iterations = self.config.max_iterations, "iteration budget exhausted");
            run.status = LoopStatus::StoppedByBudget;
        }
        run.status
    }
}

impl std::fmt::Debug for LoopController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopController")
            .field("proposer", &self.proposer.name())
            .field("config", &self.config)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

fn valid_actions() -> String {
    ActionKind::ALL
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
