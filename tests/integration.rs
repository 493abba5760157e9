//! End-to-end tests for the reasoning loop over a small Brick building.
//!
//! These load the fixture schema and timeseries through the public API and
//! drive the loop controller with the fallback proposer, an unreachable LLM
//! proposer and scripted proposers.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use brick_agent::agent::dispatch::dispatch;
use brick_agent::agent::{
    Action, ActionKind, AgentError, FallbackProposer, LlmProposer, LoopConfig, LoopController,
    LoopStatus, ObservationStatus, OllamaClient, OllamaConfig, ProposedAction, Proposer,
    ProposerResult,
};
use brick_agent::config::AppConfig;
use brick_agent::graph::{BrickStore, QueryStatus, StoreConfig};

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn building() -> Arc<BrickStore> {
    let store = BrickStore::in_memory(StoreConfig::default()).unwrap();
    store.load_turtle_file(&fixture("building.ttl")).unwrap();
    store.ingest_timeseries_csv(&fixture("fcu.csv")).unwrap();
    Arc::new(store)
}

fn fallback(store: Arc<BrickStore>, config: LoopConfig) -> LoopController {
    LoopController::new(store, Box::new(FallbackProposer::new()), config)
}

/// Replays proposals in order, then stops.
struct Scripted(VecDeque<ProposedAction>);

impl Scripted {
    fn boxed(script: Vec<ProposedAction>) -> Box<Self> {
        Box::new(Self(script.into()))
    }
}

impl Proposer for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn propose(&mut self, _: &str, _: &[Action]) -> ProposerResult<ProposedAction> {
        Ok(self
            .0
            .pop_front()
            .unwrap_or_else(|| ProposedAction::of(ActionKind::Stop, "done", "")))
    }
}

/// Keeps searching for new terms and never stops.
struct Endless(usize);

impl Proposer for Endless {
    fn name(&self) -> &str {
        "endless"
    }

    fn propose(&mut self, _: &str, _: &[Action]) -> ProposerResult<ProposedAction> {
        self.0 += 1;
        Ok(ProposedAction::of(ActionKind::Search, "again", format!("term {}", self.0)))
    }
}

fn search(arg: &str) -> ProposedAction {
    ProposedAction::of(ActionKind::Search, "look", arg)
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[test]
fn fixture_loads_into_building_namespace() {
    let store = building();
    assert!(store.is_loaded());
    let detail = store.describe("bldg:RM_TEMP").unwrap().unwrap();
    assert_eq!(detail.iri, "urn:bldg-59#RM_TEMP");
    assert!(detail.properties.contains_key("hasObservation"));
    assert_eq!(
        store.sensor_types().unwrap(),
        vec![
            "Discharge_Air_Temperature_Sensor",
            "Outside_Air_Temperature_Sensor",
            "Zone_Air_Temperature_Sensor",
        ]
    );
}

#[test]
fn csv_table_counts_numeric_cells() {
    let store = BrickStore::in_memory(StoreConfig::default()).unwrap();
    store.load_turtle_file(&fixture("building.ttl")).unwrap();
    // 4 RM_TEMP + 4 FCU_OAT + 5 RMCLGSPT; one empty cell and one NaN are skipped
    assert_eq!(store.ingest_timeseries_csv(&fixture("fcu.csv")).unwrap(), 13);
}

#[test]
fn csv_on_disk_respects_row_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.csv");
    std::fs::write(
        &path,
        "Datetime,RM_TEMP\n01/01/2019 00:00,70.0\n01/01/2019 00:01,70.5\n01/01/2019 00:02,71.0\n",
    )
    .unwrap();

    let store = BrickStore::in_memory(StoreConfig {
        max_csv_rows: 2,
        ..Default::default()
    })
    .unwrap();
    store.load_turtle_file(&fixture("building.ttl")).unwrap();
    assert_eq!(store.ingest_timeseries_csv(&path).unwrap(), 2);

    let result = store.execute(
        "SELECT ?ts WHERE { bldg:RM_TEMP ref:hasObservation ?o . ?o ref:hasTimestamp ?ts } ORDER BY ?ts",
    );
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0]["ts"], "2019-01-01T00:01:00");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn happy_path_room_temperature() {
    let mut controller = fallback(building(), LoopConfig::default());
    let outcome = controller.run("What is the room temperature?").unwrap();

    assert_eq!(outcome.status, LoopStatus::StoppedByProposer);
    let kinds: Vec<_> = outcome.state.actions().iter().map(|a| a.kind).collect();
    assert_eq!(
        kinds,
        vec![
            Some(ActionKind::Search),
            Some(ActionKind::DescribeEntity),
            Some(ActionKind::ExecuteQuery),
            Some(ActionKind::Stop),
        ]
    );
    assert_eq!(outcome.state.actions()[0].argument, "room temperature");
    assert_eq!(outcome.state.actions()[1].argument, "RM_TEMP");

    let best = outcome.best().expect("an answer");
    assert_eq!(best.status, QueryStatus::Success);
    assert_eq!(best.rows.len(), 4);
    assert_eq!(best.rows[0]["timestamp"], "2018-12-31T23:54:00");
    assert_eq!(best.rows[0]["value"], "71.6");
}

#[test]
fn unknown_sensor_exhausts_budget() {
    let mut controller = fallback(building(), LoopConfig::default());
    let outcome = controller.run("Where is the flux capacitor?").unwrap();

    assert_eq!(outcome.status, LoopStatus::StoppedByBudget);
    assert!(!outcome.answered());
    assert_eq!(outcome.state.steps(), 15);
    // "flux capacitor", "flux", "capacitor"; every later repeat is intercepted
    assert_eq!(outcome.state.dispatched(), 3);
    assert!(outcome.state.actions()[3..]
        .iter()
        .all(|a| a.observation.status == ObservationStatus::Duplicate));
}

#[test]
fn unknown_sensor_with_narrow_history_never_redispatches() {
    let config = LoopConfig::default()
        .with_history_window(2)
        .with_max_iterations(20);
    let mut controller = fallback(building(), config);
    let outcome = controller.run("Where is the flux capacitor?").unwrap();

    assert_eq!(outcome.status, LoopStatus::StoppedByBudget);
    let dispatched: Vec<&str> = outcome
        .state
        .actions()
        .iter()
        .filter(|a| a.was_dispatched())
        .map(|a| a.argument.as_str())
        .collect();
    assert_eq!(dispatched, vec!["flux capacitor", "flux", "capacitor"]);
}

#[test]
fn malformed_query_is_observed_not_raised() {
    let script = vec![
        ProposedAction::of(ActionKind::ExecuteQuery, "try", "SELECT ?x WHERE { ?x brick:hasPoint"),
        ProposedAction::of(ActionKind::Search, "recover", "fan coil"),
    ];
    let mut controller = LoopController::new(building(), Scripted::boxed(script), LoopConfig::default());
    let outcome = controller.run("Which points does the fan coil unit have?").unwrap();

    let first = &outcome.state.actions()[0];
    assert_eq!(first.observation.status, ObservationStatus::ExecutionError);
    assert!(first.observation.text.starts_with("Query has syntax error"));
    assert_eq!(outcome.state.generated_queries()[0].status, QueryStatus::SyntaxError);
    assert_eq!(outcome.state.actions()[1].observation.status, ObservationStatus::Ok);
    assert_eq!(outcome.status, LoopStatus::StoppedByProposer);
    assert!(outcome.best().is_none());
}

#[test]
fn repeated_search_executes_once() {
    let mut controller =
        LoopController::new(building(), Scripted::boxed(vec![]), LoopConfig::default());
    let mut run = controller.start("q").unwrap();
    let mut statuses = Vec::new();
    for _ in 0..3 {
        let action = controller.execute_proposed(&mut run, search("x")).unwrap().unwrap();
        statuses.push(action.observation.status);
    }
    assert_eq!(
        statuses,
        vec![ObservationStatus::Empty, ObservationStatus::Duplicate, ObservationStatus::Duplicate]
    );
    let actions = run.state.actions();
    assert_eq!(actions.len(), 3);
    assert!(actions[0].was_dispatched());
    assert_eq!(actions[1].observation.status, ObservationStatus::Duplicate);
    assert_eq!(actions[2].observation.status, ObservationStatus::Duplicate);
    assert_eq!(run.state.dispatched(), 1);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn dispatched_never_exceeds_budget() {
    let store = building();
    for budget in 0..8 {
        let config = LoopConfig::default().with_max_iterations(budget);
        let mut controller = LoopController::new(store.clone(), Box::new(Endless(0)), config);
        let outcome = controller.run("anything").unwrap();
        assert_eq!(outcome.status, LoopStatus::StoppedByBudget);
        assert!(outcome.state.dispatched() <= budget);
        assert_eq!(outcome.state.steps(), budget);
    }
}

#[test]
fn nothing_dispatched_after_stop() {
    let script = vec![
        search("room"),
        ProposedAction::of(ActionKind::Stop, "enough", ""),
        search("never"),
    ];
    let mut controller = LoopController::new(building(), Scripted::boxed(script), LoopConfig::default());
    let mut run = controller.run("q").unwrap();
    assert_eq!(run.state.steps(), 2);
    assert_eq!(run.state.last_action().unwrap().kind, Some(ActionKind::Stop));

    assert!(matches!(
        controller.step(&mut run),
        Err(AgentError::RunFinished { .. })
    ));
    assert_eq!(run.state.steps(), 2);
}

#[test]
fn describe_is_idempotent() {
    let store = building();
    let first = dispatch(&store, ActionKind::DescribeEntity, "FCU", 10);
    let second = dispatch(&store, ActionKind::DescribeEntity, "FCU", 10);
    assert_eq!(first.observation, second.observation);
    assert!(first.observation.text.contains("hasPoint"));
}

#[test]
fn describe_marks_pruned_property_values() {
    let store = building();
    // FCU has five points; RM_TEMP has four observations after ingestion
    let fcu = dispatch(&store, ActionKind::DescribeEntity, "FCU", 10);
    let points: Vec<&str> = fcu
        .observation
        .text
        .lines()
        .skip_while(|l| *l != "  hasPoint:")
        .skip(1)
        .take_while(|l| l.starts_with("    "))
        .collect();
    assert_eq!(points.len(), 4);
    assert_eq!(points[3], "    (+2 more)");

    let sensor = dispatch(&store, ActionKind::DescribeEntity, "RM_TEMP", 10);
    assert!(sensor.observation.text.contains("    (+1 more)"));
}

#[test]
fn search_and_describe_round_trip() {
    let store = building();
    for id in ["BLDG59", "FLOOR1", "ZONE_101", "FCU", "RM_TEMP", "FCU_OAT", "RMHTGSPT"] {
        let hits = store.search(id).unwrap();
        assert!(hits.iter().any(|h| h.id == id), "search({id}) misses {id}");
        assert!(store.describe(id).unwrap().is_some(), "describe({id}) not found");
    }
}

#[test]
fn property_examples_teach_usage() {
    let store = building();
    let out = dispatch(&store, ActionKind::DescribeProperty, "isPointOf", 10);
    let lines: Vec<&str> = out.observation.text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], "FCU_DAT -- isPointOf --> FCU");
}

// ---------------------------------------------------------------------------
// Preconditions and control
// ---------------------------------------------------------------------------

#[test]
fn unloaded_store_is_a_distinct_error() {
    let store = Arc::new(BrickStore::in_memory(StoreConfig::default()).unwrap());
    let mut controller = fallback(store, LoopConfig::default());
    let err = controller.run("What is the room temperature?").unwrap_err();
    assert!(matches!(err, AgentError::StoreNotLoaded));
}

#[test]
fn manual_stepping_matches_automatic_run() {
    let mut controller = fallback(building(), LoopConfig::default());
    let mut run = controller.start("What is the room temperature?").unwrap();
    let mut kinds = Vec::new();
    while !run.status.is_terminal() {
        let action = controller.step(&mut run).unwrap().expect("a recorded step");
        kinds.push(action.kind);
    }
    assert_eq!(
        kinds,
        vec![
            Some(ActionKind::Search),
            Some(ActionKind::DescribeEntity),
            Some(ActionKind::ExecuteQuery),
            Some(ActionKind::Stop),
        ]
    );
    assert_eq!(run.status, LoopStatus::StoppedByProposer);
    assert!(run.answered());
}

/// Raises the cancel flag while proposing its first action.
struct Cancelling(Arc<AtomicBool>);

impl Proposer for Cancelling {
    fn name(&self) -> &str {
        "cancelling"
    }

    fn propose(&mut self, _: &str, _: &[Action]) -> ProposerResult<ProposedAction> {
        self.0.store(true, Ordering::Relaxed);
        Ok(search("room"))
    }
}

#[test]
fn cancel_flag_stops_between_steps() {
    let flag = Arc::new(AtomicBool::new(false));
    let mut controller = LoopController::new(
        building(),
        Box::new(Cancelling(flag.clone())),
        LoopConfig::default(),
    )
    .with_cancel_flag(flag);
    let outcome = controller.run("q").unwrap();
    assert_eq!(outcome.status, LoopStatus::Cancelled);
    assert_eq!(outcome.state.steps(), 1);
    assert!(outcome.state.actions()[0].was_dispatched());
}

#[test]
fn unreachable_llm_degrades_to_rejected_steps() {
    let client = OllamaClient::new(OllamaConfig {
        base_url: "http://127.0.0.1:1".into(),
        ..Default::default()
    });
    let config = LoopConfig::default().with_max_iterations(3);
    let mut controller = LoopController::new(building(), Box::new(LlmProposer::new(client)), config);
    let outcome = controller.run("What is the room temperature?").unwrap();
    assert_eq!(outcome.status, LoopStatus::StoppedByBudget);
    assert_eq!(outcome.state.dispatched(), 0);
    assert!(outcome
        .state
        .actions()
        .iter()
        .all(|a| a.observation.status == ObservationStatus::Rejected));
}

#[test]
fn config_file_drives_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brick-agent.toml");
    std::fs::write(&path, "[agent]\nmax_iterations = 2\n").unwrap();

    let config = AppConfig::load(&path).unwrap();
    let mut controller = fallback(building(), config.agent);
    let outcome = controller.run("What is the room temperature?").unwrap();
    assert_eq!(outcome.status, LoopStatus::StoppedByBudget);
    assert_eq!(outcome.state.steps(), 2);
    assert!(!outcome.answered());
}
