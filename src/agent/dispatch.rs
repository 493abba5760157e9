//! Action dispatch: route a validated action to the graph store and turn the
//! outcome into an [`Observation`].
//!
//! Store failures never escape: they become `ExecutionError` observations so
//! the proposer can react to them on the next step.

use crate::graph::{BrickStore, EntityDetail, PropertyExample, QueryResult, QueryStatus, SearchMatch};

use super::action::{ActionKind, Observation, ObservationStatus};

/// Values shown per property in an entity description.
const DESCRIBE_VALUES_PER_PROPERTY: usize = 3;

/// Outcome of one dispatch.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub observation: Observation,
    /// Present only for `execute-query`.
    pub query: Option<QueryResult>,
}

impl Dispatched {
    fn observed(observation: Observation) -> Self {
        Self {
            observation,
            query: None,
        }
    }
}

/// Execute `kind` with `argument` against the store.
pub fn dispatch(
    store: &BrickStore,
    kind: ActionKind,
    argument: &str,
    max_result_rows: usize,
) -> Dispatched {
    let argument = argument.trim();
    match kind {
        ActionKind::Search => Dispatched::observed(match store.search(argument) {
            Ok(hits) => search_observation(&hits),
            Err(e) => store_failure(kind, &e),
        }),
        ActionKind::DescribeEntity => Dispatched::observed(match store.describe(argument) {
            Ok(Some(detail)) => entity_observation(&detail),
            Ok(None) => Observation::new(
                ObservationStatus::NotFound,
                format!("Entity not found: {argument}"),
            ),
            Err(e) => store_failure(kind, &e),
        }),
        ActionKind::DescribeProperty => {
            Dispatched::observed(match store.describe_property(argument) {
                Ok(examples) => property_observation(&examples),
                Err(e) => store_failure(kind, &e),
            })
        }
        ActionKind::ExecuteQuery => {
            let result = store.execute(argument);
            let observation = query_observation(&result, max_result_rows);
            Dispatched {
                observation,
                query: Some(result),
            }
        }
        ActionKind::Stop => {
            Dispatched::observed(Observation::new(ObservationStatus::Ok, "Stopping execution"))
        }
    }
}

fn store_failure(kind: ActionKind, error: &crate::error::GraphError) -> Observation {
    tracing::warn!(action = %kind, error = %error, "store failure during dispatch");
    Observation::new(
        ObservationStatus::ExecutionError,
        format!("Error executing action: {error}"),
    )
}

fn search_observation(hits: &[SearchMatch]) -> Observation {
    if hits.is_empty() {
        return Observation::new(ObservationStatus::Empty, "No results found.");
    }
    let mut lines = Vec::with_capacity(hits.len() * 2);
    for hit in hits {
        let label = hit.label.as_deref().unwrap_or(&hit.id);
        lines.push(format!("{label} ({})", hit.id));
        if !hit.types.is_empty() {
            lines.push(format!("  Type: {}", hit.types.join(", ")));
        }
    }
    Observation::new(ObservationStatus::Ok, lines.join("\n"))
        .with_entities(hits.iter().map(|h| h.id.clone()).collect())
}

fn entity_observation(detail: &EntityDetail) -> Observation {
    let mut lines = vec![format!("Entity: {}", detail.id)];
    if !detail.types.is_empty() {
        lines.push(format!("Types: {}", detail.types.join(", ")));
    }
    lines.push(String::new());
    lines.push("Properties:".into());

    let mut related = Vec::new();
    for (name, values) in &detail.properties {
        lines.push(format!("  {name}:"));
        for value in values.iter().take(DESCRIBE_VALUES_PER_PROPERTY) {
            match value {
                crate::graph::PropertyValue::Entity { id, .. } => {
                    lines.push(format!("    -> {id}"));
                    if !related.contains(id) {
                        related.push(id.clone());
                    }
                }
                crate::graph::PropertyValue::Literal { value, .. } => {
                    lines.push(format!("    = {value}"));
                }
            }
        }
        if values.len() > DESCRIBE_VALUES_PER_PROPERTY {
            lines.push(format!("    (+{} more)", values.len() - DESCRIBE_VALUES_PER_PROPERTY));
        }
    }

    let mut entities = vec![detail.id.clone()];
    entities.extend(related.into_iter().filter(|id| *id != detail.id));
    Observation::new(ObservationStatus::Ok, lines.join("\n")).with_entities(entities)
}

fn property_observation(examples: &[PropertyExample]) -> Observation {
    if examples.is_empty() {
        return Observation::new(ObservationStatus::NotFound, "No examples found");
    }
    let text = examples
        .iter()
        .map(|e| format!("{} -- {} --> {}", e.subject, e.property, e.object))
        .collect::<Vec<_>>()
        .join("\n");
    Observation::new(ObservationStatus::Ok, text)
}

fn query_observation(result: &QueryResult, max_rows: usize) -> Observation {
    match result.status {
        QueryStatus::Success => {
            Observation::new(ObservationStatus::Ok, result.to_table(max_rows))
        }
        QueryStatus::EmptyResult => Observation::new(
            ObservationStatus::Empty,
            format!("Query returned no results. Status: {}", result.status),
        ),
        QueryStatus::SyntaxError | QueryStatus::ExecutionError => Observation::new(
            ObservationStatus::ExecutionError,
            format!(
                "{}: {}",
                result.status.message(),
                result.error.as_deref().unwrap_or("unknown error")
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StoreConfig;

    const TTL: &str = r#"
@prefix brick: <https://brickschema.org/schema/Brick#> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix bldg: <urn:bldg-59#> .

bldg:FCU a brick:Fan_Coil_Unit ;
    brick:hasPoint bldg:RM_TEMP .

bldg:RM_TEMP a brick:Zone_Air_Temperature_Sensor ;
    rdfs:label "Room Temperature" ;
    brick:isPointOf bldg:FCU .
"#;

    fn store() -> BrickStore {
        let store = BrickStore::in_memory(StoreConfig::default()).unwrap();
        store.load_turtle_str(TTL).unwrap();
        store
    }

    #[test]
    fn search_lists_hits_with_entities() {
        let out = dispatch(&store(), ActionKind::Search, "room temperature", 10);
        assert_eq!(out.observation.status, ObservationStatus::Ok);
        assert!(out.observation.text.starts_with("Room Temperature (RM_TEMP)"));
        assert_eq!(out.observation.entities[0], "RM_TEMP");
        assert!(out.query.is_none());
    }

    #[test]
    fn empty_search_is_empty_not_error() {
        let out = dispatch(&store(), ActionKind::Search, "flux capacitor", 10);
        assert_eq!(out.observation.status, ObservationStatus::Empty);
        assert_eq!(out.observation.text, "No results found.");
    }

    #[test]
    fn describe_unknown_entity_is_not_found() {
        let out = dispatch(&store(), ActionKind::DescribeEntity, "NOPE", 10);
        assert_eq!(out.observation.status, ObservationStatus::NotFound);
    }

    #[test]
    fn describe_lists_related_entities() {
        let out = dispatch(&store(), ActionKind::DescribeEntity, "RM_TEMP", 10);
        assert_eq!(out.observation.status, ObservationStatus::Ok);
        assert!(out.observation.text.contains("Types: Zone_Air_Temperature_Sensor"));
        assert!(out.observation.text.contains("    -> FCU"));
        assert_eq!(out.observation.entities, vec!["RM_TEMP", "FCU"]);
    }

    #[test]
    fn property_examples_rendered_as_arrows() {
        let out = dispatch(&store(), ActionKind::DescribeProperty, "hasPoint", 10);
        assert_eq!(out.observation.text, "FCU -- hasPoint --> RM_TEMP");
        let missing = dispatch(&store(), ActionKind::DescribeProperty, "hasNothing", 10);
        assert_eq!(missing.observation.status, ObservationStatus::NotFound);
    }

    #[test]
    fn query_outcomes_map_to_statuses() {
        let s = store();
        let ok = dispatch(
            &s,
            ActionKind::ExecuteQuery,
            "SELECT ?p WHERE { bldg:FCU brick:hasPoint ?p }",
            10,
        );
        assert_eq!(ok.observation.status, ObservationStatus::Ok);
        assert_eq!(ok.query.as_ref().unwrap().status, QueryStatus::Success);

        let empty = dispatch(
            &s,
            ActionKind::ExecuteQuery,
            "SELECT ?p WHERE { bldg:RM_TEMP brick:hasPoint ?p }",
            10,
        );
        assert_eq!(empty.observation.status, ObservationStatus::Empty);
        assert!(empty.query.as_ref().unwrap().succeeded());

        let broken = dispatch(&s, ActionKind::ExecuteQuery, "SELEC ?x WHERE {", 10);
        assert_eq!(broken.observation.status, ObservationStatus::ExecutionError);
        assert_eq!(broken.query.as_ref().unwrap().status, QueryStatus::SyntaxError);
    }

    #[test]
    fn stop_is_a_no_op() {
        let out = dispatch(&store(), ActionKind::Stop, "", 10);
        assert_eq!(out.observation.text, "Stopping execution");
        assert!(out.query.is_none());
    }
}
