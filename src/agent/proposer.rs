//! Reasoning Proposer boundary: given the question and a trailing window of
//! observed steps, choose the next action.
//!
//! Two implementations share the [`Proposer`] trait:
//!
//! - [`FallbackProposer`]: deterministic keyword script, no model required
//! - [`LlmProposer`]: prompts an Ollama model and parses its reply

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::graph::store::keywords;

use super::action::{Action, ActionKind, ObservationStatus, ProposedAction};
use super::error::{ProposerError, ProposerResult};
use super::llm::OllamaClient;
use super::state::render_actions;

/// Chooses the next action of a run.
pub trait Proposer {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Propose the next action for `question` given the trailing `history`.
    fn propose(&mut self, question: &str, history: &[Action]) -> ProposerResult<ProposedAction>;
}

// ---------------------------------------------------------------------------
// Fallback proposer
// ---------------------------------------------------------------------------

/// Deterministic script: search, describe the first hit, query its latest
/// observations, stop.
///
/// Every decision is derived from the history alone, so the proposer itself is
/// stateless. When nothing matches it searches the phrase, then each keyword,
/// then repeats the phrase and never stops on its own; the iteration budget
/// ends the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackProposer;

impl FallbackProposer {
    pub fn new() -> Self {
        Self
    }

    /// SPARQL fetching the ten latest observations of an entity.
    pub fn observation_query(entity: &str) -> String {
        format!(
            "SELECT ?timestamp ?value WHERE {{ {} ref:hasObservation ?obs . \
             ?obs ref:hasTimestamp ?timestamp . ?obs ref:hasValue ?value }} \
             ORDER BY DESC(?timestamp) LIMIT 10",
            entity_term(entity)
        )
    }

    fn search_terms(question: &str) -> Vec<String> {
        let words = keywords(question);
        let phrase = if words.is_empty() {
            question.trim().to_string()
        } else {
            words.join(" ")
        };
        let mut terms = vec![phrase];
        if words.len() > 1 {
            terms.extend(words);
        }
        terms
    }
}

impl Proposer for FallbackProposer {
    fn name(&self) -> &str {
        "fallback"
    }

    fn propose(&mut self, question: &str, history: &[Action]) -> ProposerResult<ProposedAction> {
        if history
            .iter()
            .filter(of_kind(ActionKind::ExecuteQuery))
            .any(|a| a.was_dispatched())
        {
            return Ok(ProposedAction::of(
                ActionKind::Stop,
                "The retrieval query has been executed; accept it as the answer.",
                "",
            ));
        }

        if let Some(described) = history
            .iter()
            .rev()
            .filter(of_kind(ActionKind::DescribeEntity))
            .find(|a| a.observation.status == ObservationStatus::Ok)
        {
            return Ok(ProposedAction::of(
                ActionKind::ExecuteQuery,
                format!("Fetch the latest observations of {}.", described.argument),
                Self::observation_query(&described.argument),
            ));
        }

        if let Some(hit) = history
            .iter()
            .rev()
            .filter(of_kind(ActionKind::Search))
            .filter(|a| a.observation.status == ObservationStatus::Ok)
            .find_map(|a| a.observation.entities.first())
        {
            return Ok(ProposedAction::of(
                ActionKind::DescribeEntity,
                format!("{hit} looks relevant; inspect its properties."),
                hit.clone(),
            ));
        }

        // After an intercepted repeat the keywords may have left the window;
        // stay on the phrase.
        let terms = Self::search_terms(question);
        let repeating = history
            .iter()
            .filter(of_kind(ActionKind::Search))
            .any(|a| a.observation.status == ObservationStatus::Duplicate);
        let next = terms
            .iter()
            .filter(|_| !repeating)
            .find(|t| !history.iter().any(|a| a.same_as(ActionKind::Search, t.as_str())))
            .unwrap_or(&terms[0]);
        Ok(ProposedAction::of(
            ActionKind::Search,
            "Find entities related to the question.",
            next.clone(),
        ))
    }
}

fn of_kind(kind: ActionKind) -> impl Fn(&&Action) -> bool {
    move |a| a.kind == Some(kind)
}

/// SPARQL term for an entity identifier as the store's `describe` accepts it.
fn entity_term(entity: &str) -> String {
    let entity = entity.trim();
    if entity.starts_with('<') {
        entity.to_string()
    } else if entity.contains("://") || entity.starts_with("urn:") {
        format!("<{entity}>")
    } else if entity.contains(':') {
        entity.to_string()
    } else {
        format!("bldg:{entity}")
    }
}

// ---------------------------------------------------------------------------
// LLM proposer
// ---------------------------------------------------------------------------

const SYSTEM_PROMPT: &str = "You are an expert in the Brick building schema and SPARQL. \
    You answer questions about a building by exploring its knowledge graph one action at a time.";

static THOUGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Thought:\s*(.*)$").expect("valid regex"));

static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Action:\s*([A-Za-z_\-]+)\s*\((.*)\)").expect("valid regex")
});

#[derive(Debug, Deserialize)]
struct JsonReply {
    #[serde(default)]
    thought: String,
    action: String,
    #[serde(default)]
    argument: String,
}

/// Proposer backed by an Ollama model.
#[derive(Debug)]
pub struct LlmProposer {
    client: OllamaClient,
    /// Extra context placed before the question, e.g. the store's prefix block.
    context: Option<String>,
}

impl LlmProposer {
    pub fn new(client: OllamaClient) -> Self {
        Self {
            client,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Full prompt for one step.
    pub fn build_prompt(&self, question: &str, history: &[Action]) -> String {
        let mut prompt = String::from(
            "Your task is to write a Brick SPARQL query to answer the given question. \
             Follow a step-by-step process:\n\n\
             1. Start by constructing very simple fragments of the SPARQL query.\n\
             2. Execute each fragment to verify its correctness. Adjust as needed based on observations.\n\
             3. Confirm all your assumptions about the Brick schema structure before proceeding.\n\
             4. Gradually build the complete SPARQL query by adding one piece at a time.\n\
             5. Do NOT repeat the same action, as the results will be the same.\n\
             6. Continue until you find the answer, then stop.\n\n\
             Form exactly one \"Thought\" and perform exactly one \"Action\", then wait for the \"Observation\".\n\n\
             Possible actions:\n",
        );
        for kind in ActionKind::ALL {
            prompt.push_str("- ");
            prompt.push_str(kind.usage());
            prompt.push('\n');
        }
        if let Some(context) = &self.context {
            prompt.push_str("\nPrefixes available in queries:\n");
            prompt.push_str(context);
        }
        prompt.push_str(&format!("\nUser Question: {question}\n\n"));
        if !history.is_empty() {
            prompt.push_str(&render_actions(history));
            prompt.push('\n');
        }
        prompt.push_str(
            "Output one \"Thought\" and one \"Action\" in the form:\n\
             Thought: <reasoning>\nAction: <action>(<argument>)\n",
        );
        prompt
    }
}

impl Proposer for LlmProposer {
    fn name(&self) -> &str {
        self.client.model()
    }

    fn propose(&mut self, question: &str, history: &[Action]) -> ProposerResult<ProposedAction> {
        let prompt = self.build_prompt(question, history);
        let reply = self.client.generate(&prompt, Some(SYSTEM_PROMPT))?;
        tracing::debug!(chars = reply.len(), "model reply received");
        parse_reply(&reply)
    }
}

/// Parse a model reply as a JSON object or a `Thought: / Action:` block.
pub fn parse_reply(reply: &str) -> ProposerResult<ProposedAction> {
    let trimmed = reply.trim();

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            if let Ok(json) = serde_json::from_str::<JsonReply>(&trimmed[start..=end]) {
                return Ok(ProposedAction::new(
                    json.thought.trim(),
                    json.action.trim(),
                    clean_argument(&json.argument),
                ));
            }
        }
    }

    // The model sometimes continues with an invented observation.
    let block = trimmed
        .find("\nObservation")
        .map_or(trimmed, |i| &trimmed[..i]);

    let Some(action) = ACTION_RE.captures(block) else {
        return Err(ProposerError::Malformed {
            message: format!("no action found in reply: {}", preview(trimmed)),
        });
    };
    let thought = THOUGHT_RE
        .captures(block)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default();
    Ok(ProposedAction::new(
        thought,
        action[1].trim(),
        clean_argument(&action[2]),
    ))
}

/// Strip code fences and one level of matching quotes.
fn clean_argument(raw: &str) -> String {
    let mut arg = raw.trim();
    if let Some(rest) = arg.strip_prefix("```") {
        let rest = rest.split_once('\n').map_or("", |(_, body)| body);
        arg = rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
    }
    for quote in ['"', '\''] {
        if arg.len() >= 2 && arg.starts_with(quote) && arg.ends_with(quote) {
            arg = &arg[1..arg.len() - 1];
            break;
        }
    }
    arg.trim().to_string()
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(80).collect();
    if text.chars().count() > 80 {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::action::Observation;
    use crate::agent::llm::OllamaConfig;

    fn observed(kind: ActionKind, arg: &str, status: ObservationStatus, entities: &[&str]) -> Action {
        Action::observed(
            ProposedAction::of(kind, "t", arg),
            Some(kind),
            Observation::new(status, "obs")
                .with_entities(entities.iter().map(|e| e.to_string()).collect()),
        )
    }

    #[test]
    fn fallback_script_happy_path() {
        let mut p = FallbackProposer::new();
        let q = "What is the room temperature?";

        let first = p.propose(q, &[]).unwrap();
        assert_eq!(first.validate().unwrap(), ActionKind::Search);
        assert_eq!(first.argument, "room temperature");

        let mut history = vec![observed(
            ActionKind::Search,
            "room temperature",
            ObservationStatus::Ok,
            &["RM_TEMP", "FCU_OAT"],
        )];
        let second = p.propose(q, &history).unwrap();
        assert_eq!(second.validate().unwrap(), ActionKind::DescribeEntity);
        assert_eq!(second.argument, "RM_TEMP");

        history.push(observed(ActionKind::DescribeEntity, "RM_TEMP", ObservationStatus::Ok, &["RM_TEMP"]));
        let third = p.propose(q, &history).unwrap();
        assert_eq!(third.validate().unwrap(), ActionKind::ExecuteQuery);
        assert!(third.argument.contains("bldg:RM_TEMP ref:hasObservation ?obs"));

        history.push(observed(ActionKind::ExecuteQuery, &third.argument, ObservationStatus::Ok, &[]));
        assert_eq!(p.propose(q, &history).unwrap().validate().unwrap(), ActionKind::Stop);
    }

    #[test]
    fn fallback_tries_each_keyword_then_repeats() {
        let mut p = FallbackProposer::new();
        let q = "flux capacitor reading";
        let mut history = Vec::new();
        let mut args = Vec::new();
        for _ in 0..4 {
            let next = p.propose(q, &history).unwrap();
            args.push(next.argument.clone());
            history.push(observed(ActionKind::Search, &next.argument, ObservationStatus::Empty, &[]));
        }
        assert_eq!(args[0], "flux capacitor reading");
        assert_eq!(&args[1..4], &["flux", "capacitor", "reading"]);
        assert_eq!(p.propose(q, &history).unwrap().argument, "flux capacitor reading");
    }

    #[test]
    fn fallback_keeps_repeating_once_keywords_left_the_window() {
        let mut p = FallbackProposer::new();
        let q = "flux capacitor";
        let history: Vec<_> = (0..3)
            .map(|_| observed(ActionKind::Search, "flux capacitor", ObservationStatus::Duplicate, &[]))
            .collect();
        assert_eq!(p.propose(q, &history).unwrap().argument, "flux capacitor");
    }

    #[test]
    fn fallback_stops_after_failed_query_too() {
        let mut p = FallbackProposer::new();
        let history = vec![observed(ActionKind::ExecuteQuery, "SELEC", ObservationStatus::ExecutionError, &[])];
        assert_eq!(p.propose("q", &history).unwrap().kind, "stop");
    }

    #[test]
    fn entity_terms() {
        assert_eq!(entity_term("RM_TEMP"), "bldg:RM_TEMP");
        assert_eq!(entity_term("brick:Sensor"), "brick:Sensor");
        assert_eq!(entity_term("urn:bldg-59#X"), "<urn:bldg-59#X>");
        assert_eq!(entity_term("<http://a/b>"), "<http://a/b>");
    }

    #[test]
    fn parse_text_reply() {
        let reply = "Thought: I should look for temperature sensors\n\
                     Action: search_brick(temperature)\n\
                     Observation: (made up)";
        let p = parse_reply(reply).unwrap();
        assert_eq!(p.thought, "I should look for temperature sensors");
        assert_eq!(p.validate().unwrap(), ActionKind::Search);
        assert_eq!(p.argument, "temperature");
    }

    #[test]
    fn parse_multiline_query_reply() {
        let reply = "Thought: run it\nAction: execute_sparql(```sparql\n\
                     SELECT ?v WHERE { bldg:RM_TEMP ref:hasObservation ?o . ?o ref:hasValue ?v }\n```)";
        let p = parse_reply(reply).unwrap();
        assert_eq!(p.validate().unwrap(), ActionKind::ExecuteQuery);
        assert!(p.argument.starts_with("SELECT ?v WHERE {"));
        assert!(p.argument.ends_with('}'));
    }

    #[test]
    fn parse_json_reply() {
        let reply = "Here you go:\n{\"thought\": \"done\", \"action\": \"stop\", \"argument\": \"\"}";
        let p = parse_reply(reply).unwrap();
        assert_eq!(p.kind, "stop");
        assert_eq!(p.thought, "done");
    }

    #[test]
    fn parse_quoted_argument() {
        let p = parse_reply("Action: get_brick_entity(\"RM_TEMP\")").unwrap();
        assert_eq!(p.argument, "RM_TEMP");
        assert_eq!(p.thought, "");
    }

    #[test]
    fn unparseable_reply_is_malformed() {
        let err = parse_reply("I am not sure what to do.").unwrap_err();
        assert!(matches!(err, ProposerError::Malformed { .. }));
    }

    #[test]
    fn prompt_lists_actions_and_history() {
        let proposer = LlmProposer::new(OllamaClient::new(OllamaConfig::default()))
            .with_context("PREFIX bldg: <urn:bldg-59#>\n");
        let history = vec![observed(ActionKind::Search, "room", ObservationStatus::Empty, &[])];
        let prompt = proposer.build_prompt("What is the room temperature?", &history);
        for kind in ActionKind::ALL {
            assert!(prompt.contains(kind.usage()));
        }
        assert!(prompt.contains("User Question: What is the room temperature?"));
        assert!(prompt.contains("Action: search(room)"));
        assert!(prompt.contains("PREFIX bldg:"));
    }

    #[test]
    fn unavailable_model_is_a_proposer_error() {
        let mut proposer = LlmProposer::new(OllamaClient::new(OllamaConfig::default()));
        let err = proposer.propose("q", &[]).unwrap_err();
        assert!(matches!(err, ProposerError::Unavailable { .. }));
    }
}
