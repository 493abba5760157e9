//! SPARQL-capable Brick graph backed by oxigraph.
//!
//! The store answers the four read primitives the reasoning loop relies on
//! (`search`, `describe`, `describe_property`, `execute`) against a snapshot
//! that is loaded once and only appended to by timeseries ingestion.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

use oxigraph::model::{NamedNode, Term};
use oxigraph::sparql::{Query, QueryResults};
use oxigraph::store::Store;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult};

use super::{
    local_name, EntityDetail, PropertyExample, PropertyValue, QueryResult, QueryStatus, Row,
    SearchMatch, BRICK_NS, RDFS_NS, RDF_NS, REF_NS, XSD_NS,
};

/// A `PREFIX name: <iri>` declaration; captures the prefix name.
static PREFIX_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bPREFIX\s+([A-Za-z][\w.\-]*)?\s*:\s*<").expect("valid regex")
});

/// Words ignored when turning free text into search keywords.
const STOPWORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "at", "by", "do", "does", "for", "from", "give", "how",
    "in", "is", "it", "list", "me", "of", "on", "or", "show", "tell", "that", "the", "there",
    "these", "this", "to", "was", "were", "what", "when", "where", "which", "who", "with",
];

/// Static configuration of a [`BrickStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Namespace building entities live in; bound to the `bldg:` prefix.
    pub building_namespace: String,
    /// IRIs containing this marker are rebased into `building_namespace` on load.
    pub rebase_marker: String,
    /// Maximum number of search matches returned.
    pub search_limit: usize,
    /// Maximum number of usage examples returned per property.
    pub property_example_limit: usize,
    /// Trailing timeseries rows ingested from a CSV table.
    pub max_csv_rows: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            building_namespace: "urn:bldg-59#".into(),
            rebase_marker: "bldg-59#".into(),
            search_limit: 8,
            property_example_limit: 5,
            max_csv_rows: 100,
        }
    }
}

/// Brick knowledge graph with SPARQL query capabilities.
pub struct BrickStore {
    store: Store,
    config: StoreConfig,
    loaded: AtomicBool,
}

impl BrickStore {
    /// Create a new, empty in-memory store. It is not loaded until a schema is.
    pub fn in_memory(config: StoreConfig) -> GraphResult<Self> {
        NamedNode::new(config.building_namespace.as_str()).map_err(|_| GraphError::InvalidIri {
            iri: config.building_namespace.clone(),
        })?;
        let store = Store::new().map_err(|e| GraphError::StoreInit {
            message: format!("failed to create oxigraph store: {e}"),
        })?;
        Ok(Self {
            store,
            config,
            loaded: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Whether a schema has been loaded (or the store was explicitly marked ready).
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Mark a programmatically populated store as ready for querying.
    pub fn mark_loaded(&self) {
        self.loaded.store(true, Ordering::Release);
    }

    /// Number of triples in the store.
    pub fn len(&self) -> GraphResult<usize> {
        self.store.len().map_err(|e| GraphError::Sparql {
            message: format!("failed to count triples: {e}"),
        })
    }

    /// Whether the store holds no triples.
    pub fn is_empty(&self) -> GraphResult<bool> {
        self.len().map(|n| n == 0)
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    /// Standard `PREFIX` block with `bldg:` bound to the building namespace.
    pub fn prefixes(&self) -> String {
        self.standard_prefixes()
            .iter()
            .map(|(name, ns)| format!("PREFIX {name}: <{ns}>\n"))
            .collect()
    }

    fn standard_prefixes(&self) -> [(&'static str, &str); 6] {
        [
            ("brick", BRICK_NS),
            ("bldg", self.config.building_namespace.as_str()),
            ("ref", REF_NS),
            ("rdf", RDF_NS),
            ("rdfs", RDFS_NS),
            ("xsd", XSD_NS),
        ]
    }

    /// Prepend the standard prefixes the query does not declare itself.
    fn with_prefixes(&self, query: &str) -> String {
        let declared: BTreeSet<&str> = PREFIX_DECL_RE
            .captures_iter(query)
            .map(|c| c.get(1).map_or("", |m| m.as_str()))
            .collect();
        let mut text: String = self
            .standard_prefixes()
            .iter()
            .filter(|(name, _)| !declared.contains(name))
            .map(|(name, ns)| format!("PREFIX {name}: <{ns}>\n"))
            .collect();
        text.push_str(query);
        text
    }

    fn expand_prefixed(&self, name: &str) -> Option<String> {
        let (prefix, local) = name.split_once(':')?;
        let ns = match prefix {
            "brick" => BRICK_NS,
            "bldg" => self.config.building_namespace.as_str(),
            "ref" => REF_NS,
            "rdf" => RDF_NS,
            "rdfs" => RDFS_NS,
            "xsd" => XSD_NS,
            _ => return None,
        };
        Some(format!("{ns}{local}"))
    }

    /// Resolve an entity identifier to a valid IRI, if it can name one.
    pub fn entity_iri(&self, id: &str) -> Option<NamedNode> {
        let id = id.trim().trim_start_matches('<').trim_end_matches('>');
        if id.is_empty() {
            return None;
        }
        let iri = if id.contains("://") || id.starts_with("urn:") {
            id.to_string()
        } else if let Some(expanded) = self.expand_prefixed(id) {
            expanded
        } else {
            format!("{}{id}", self.config.building_namespace)
        };
        NamedNode::new(iri).ok()
    }

    fn property_candidates(&self, name: &str) -> Vec<NamedNode> {
        let name = name.trim().trim_start_matches('<').trim_end_matches('>');
        if name.is_empty() {
            return Vec::new();
        }
        let iris: Vec<String> = if name.contains("://") || name.starts_with("urn:") {
            vec![name.to_string()]
        } else if let Some(expanded) = self.expand_prefixed(name) {
            vec![expanded]
        } else {
            [REF_NS, BRICK_NS, RDFS_NS, RDF_NS]
                .iter()
                .map(|ns| format!("{ns}{name}"))
                .collect()
        };
        iris.into_iter().filter_map(|iri| NamedNode::new(iri).ok()).collect()
    }

    /// Run an internal SELECT and collect rows as raw terms.
    fn select_terms(&self, sparql: &str) -> GraphResult<Vec<BTreeMap<String, Term>>> {
        let results = self.store.query(sparql).map_err(|e| GraphError::Sparql {
            message: format!("SPARQL query failed: {e}"),
        })?;

        match results {
            QueryResults::Solutions(solutions) => {
                let mut rows = Vec::new();
                for solution in solutions {
                    let solution = solution.map_err(|e| GraphError::Sparql {
                        message: format!("solution error: {e}"),
                    })?;
                    let row = solution
                        .iter()
                        .map(|(var, term)| (var.as_str().to_string(), term.clone()))
                        .collect();
                    rows.push(row);
                }
                Ok(rows)
            }
            _ => Err(GraphError::Sparql {
                message: "expected solutions from internal SELECT".into(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // search
    // -----------------------------------------------------------------------

    /// Keyword search over entity identifiers, labels and type tags.
    ///
    /// Matches are ordered by descending score, ties broken by identifier.
    /// An empty match set is a normal outcome.
    pub fn search(&self, text: &str) -> GraphResult<Vec<SearchMatch>> {
        let needle = text.trim();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let sparql = format!(
            "{}SELECT ?entity ?type ?label WHERE {{ \
               {{ SELECT DISTINCT ?entity WHERE {{ ?entity ?p ?o . FILTER(isIRI(?entity)) }} }} \
               OPTIONAL {{ ?entity rdf:type ?type }} \
               OPTIONAL {{ ?entity rdfs:label ?label }} \
             }}",
            self.prefixes()
        );

        let mut candidates: BTreeMap<String, SearchMatch> = BTreeMap::new();
        for row in self.select_terms(&sparql)? {
            let Some(Term::NamedNode(entity)) = row.get("entity") else {
                continue;
            };
            let entry = candidates
                .entry(entity.as_str().to_string())
                .or_insert_with(|| SearchMatch {
                    id: local_name(entity.as_str()).to_string(),
                    iri: entity.as_str().to_string(),
                    label: None,
                    types: Vec::new(),
                    score: 0,
                });
            if let Some(Term::NamedNode(ty)) = row.get("type") {
                let ty = local_name(ty.as_str()).to_string();
                if !entry.types.contains(&ty) {
                    entry.types.push(ty);
                }
            }
            if entry.label.is_none() {
                if let Some(Term::Literal(label)) = row.get("label") {
                    entry.label = Some(label.value().to_string());
                }
            }
        }

        let phrase = normalize(needle);
        let keywords = keywords(needle);
        let mut matches: Vec<SearchMatch> = candidates
            .into_values()
            .filter_map(|mut m| {
                m.score = score_match(&m, needle, &phrase, &keywords);
                (m.score > 0).then_some(m)
            })
            .collect();

        matches.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(self.config.search_limit);
        Ok(matches)
    }

    // -----------------------------------------------------------------------
    // describe
    // -----------------------------------------------------------------------

    /// All outgoing edges of an entity, or `None` when the entity is unknown.
    pub fn describe(&self, entity_id: &str) -> GraphResult<Option<EntityDetail>> {
        let Some(mut iri) = self.entity_iri(entity_id) else {
            return Ok(None);
        };

        let mut rows = self.outgoing(&iri)?;
        if rows.is_empty() && is_bare_name(entity_id) {
            // Not in the building namespace: accept any IRI with that local name.
            if let Some(found) = self.find_by_local_name(entity_id.trim())? {
                rows = self.outgoing(&found)?;
                iri = found;
            }
        }
        if rows.is_empty() {
            return Ok(None);
        }

        let rdf_type = format!("{RDF_NS}type");
        let mut types = Vec::new();
        let mut properties: BTreeMap<String, Vec<PropertyValue>> = BTreeMap::new();
        for row in rows {
            let (Some(Term::NamedNode(pred)), Some(object)) = (row.get("p"), row.get("o")) else {
                continue;
            };
            let value = property_value(object);
            if pred.as_str() == rdf_type {
                types.push(value.display_value().to_string());
                continue;
            }
            properties
                .entry(local_name(pred.as_str()).to_string())
                .or_default()
                .push(value);
        }

        Ok(Some(EntityDetail {
            id: entity_id.trim().to_string(),
            iri: iri.as_str().to_string(),
            types,
            properties,
        }))
    }

    fn outgoing(&self, iri: &NamedNode) -> GraphResult<Vec<BTreeMap<String, Term>>> {
        self.select_terms(&format!(
            "SELECT ?p ?o WHERE {{ <{}> ?p ?o }} ORDER BY ?p ?o",
            iri.as_str()
        ))
    }

    fn find_by_local_name(&self, name: &str) -> GraphResult<Option<NamedNode>> {
        let sparql = format!(
            "SELECT DISTINCT ?s WHERE {{ ?s ?p ?o . \
               FILTER(isIRI(?s) && (STRENDS(STR(?s), \"#{name}\") || STRENDS(STR(?s), \"/{name}\"))) \
             }} ORDER BY ?s LIMIT 1"
        );
        let rows = self.select_terms(&sparql)?;
        Ok(rows.into_iter().find_map(|row| match row.get("s") {
            Some(Term::NamedNode(n)) => Some(n.clone()),
            _ => None,
        }))
    }

    // -----------------------------------------------------------------------
    // describe_property
    // -----------------------------------------------------------------------

    /// Up to `property_example_limit` usages of a property, ordered by subject then object.
    ///
    /// A bare name is tried in the `ref:`, `brick:`, `rdfs:` and `rdf:` namespaces;
    /// the first namespace with any usage wins. Unknown properties yield an empty list.
    pub fn describe_property(&self, name: &str) -> GraphResult<Vec<PropertyExample>> {
        let property = name.trim();
        for candidate in self.property_candidates(property) {
            let sparql = format!(
                "SELECT ?s ?o WHERE {{ ?s <{}> ?o }} ORDER BY ?s ?o LIMIT {}",
                candidate.as_str(),
                self.config.property_example_limit
            );
            let examples: Vec<PropertyExample> = self
                .select_terms(&sparql)?
                .iter()
                .filter_map(|row| {
                    let subject = row.get("s")?;
                    let object = row.get("o")?;
                    Some(PropertyExample {
                        subject: property_value(subject).display_value().to_string(),
                        property: property.to_string(),
                        object: property_value(object).display_value().to_string(),
                    })
                })
                .collect();
            if !examples.is_empty() {
                return Ok(examples);
            }
        }
        Ok(Vec::new())
    }

    // -----------------------------------------------------------------------
    // execute
    // -----------------------------------------------------------------------

    /// Execute a user or proposer query.
    ///
    /// Never fails: malformed syntax and evaluation errors are reported
    /// through [`QueryResult::status`] with the store's message.
    pub fn execute(&self, query: &str) -> QueryResult {
        let text = self.with_prefixes(query);
        if let Err(e) = Query::parse(&text, None) {
            tracing::debug!(error = %e, "query rejected by parser");
            return QueryResult::failed(query, QueryStatus::SyntaxError, e.to_string());
        }
        let results = match self.store.query(text.as_str()) {
            Ok(results) => results,
            Err(e) => {
                tracing::debug!(error = %e, "query evaluation failed");
                return QueryResult::failed(query, QueryStatus::ExecutionError, e.to_string());
            }
        };

        let collected = match results {
            QueryResults::Solutions(solutions) => {
                let variables: Vec<String> = solutions
                    .variables()
                    .iter()
                    .map(|v| v.as_str().to_string())
                    .collect();
                let mut rows = Vec::new();
                let mut failure = None;
                for solution in solutions {
                    match solution {
                        Ok(solution) => rows.push(
                            solution
                                .iter()
                                .map(|(var, term)| (var.as_str().to_string(), term_value(term)))
                                .collect::<Row>(),
                        ),
                        Err(e) => {
                            failure = Some(e.to_string());
                            break;
                        }
                    }
                }
                failure.map_or(Ok((variables, rows)), Err)
            }
            QueryResults::Boolean(b) => Ok((
                vec!["result".to_string()],
                vec![Row::from([("result".to_string(), b.to_string())])],
            )),
            QueryResults::Graph(triples) => {
                let mut rows = Vec::new();
                let mut failure = None;
                for triple in triples {
                    match triple {
                        Ok(t) => rows.push(Row::from([
                            ("subject".to_string(), term_value(&Term::from(t.subject))),
                            ("predicate".to_string(), t.predicate.as_str().to_string()),
                            ("object".to_string(), term_value(&t.object)),
                        ])),
                        Err(e) => {
                            failure = Some(e.to_string());
                            break;
                        }
                    }
                }
                let variables = ["subject", "predicate", "object"].map(String::from).to_vec();
                failure.map_or(Ok((variables, rows)), Err)
            }
        };

        match collected {
            Ok((variables, rows)) => {
                let status = if rows.is_empty() {
                    QueryStatus::EmptyResult
                } else {
                    QueryStatus::Success
                };
                QueryResult {
                    query: query.to_string(),
                    variables,
                    rows,
                    status,
                    error: None,
                }
            }
            Err(message) => QueryResult::failed(query, QueryStatus::ExecutionError, message),
        }
    }

    /// Distinct sensor and point types present in the graph, sorted.
    pub fn sensor_types(&self) -> GraphResult<Vec<String>> {
        let rows = self.select_terms(&format!(
            "{}SELECT DISTINCT ?t WHERE {{ ?s rdf:type ?t }}",
            self.prefixes()
        ))?;
        let mut types: Vec<String> = rows
            .iter()
            .filter_map(|row| match row.get("t") {
                Some(Term::NamedNode(t)) => Some(local_name(t.as_str()).to_string()),
                _ => None,
            })
            .filter(|t| t.contains("Sensor") || t.contains("Point"))
            .collect();
        types.sort();
        types.dedup();
        Ok(types)
    }
}

impl std::fmt::Debug for BrickStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrickStore")
            .field("building_namespace", &self.config.building_namespace)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Term and text helpers
// ---------------------------------------------------------------------------

fn property_value(term: &Term) -> PropertyValue {
    match term {
        Term::NamedNode(n) => PropertyValue::Entity {
            id: local_name(n.as_str()).to_string(),
            iri: n.as_str().to_string(),
        },
        Term::Literal(l) => PropertyValue::Literal {
            value: l.value().to_string(),
            datatype: l.datatype().as_str().to_string(),
        },
        other => PropertyValue::Entity {
            id: other.to_string(),
            iri: other.to_string(),
        },
    }
}

/// Rendered value of a result term: full IRI, blank node id or literal lexical form.
fn term_value(term: &Term) -> String {
    match term {
        Term::NamedNode(n) => n.as_str().to_string(),
        Term::BlankNode(b) => format!("_:{}", b.as_str()),
        Term::Literal(l) => l.value().to_string(),
        other => other.to_string(),
    }
}

/// A plain local name: no prefix, no IRI syntax, nothing that needs escaping.
fn is_bare_name(id: &str) -> bool {
    let id = id.trim();
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Lowercase, with every non-alphanumeric run collapsed to one space.
pub(crate) fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Content words of a free-text query. Falls back to every token when all are stopwords.
pub fn keywords(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
    let content: Vec<String> = tokens
        .iter()
        .copied()
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect();
    if content.is_empty() {
        tokens.into_iter().map(String::from).collect()
    } else {
        content
    }
}

fn score_match(m: &SearchMatch, raw: &str, phrase: &str, keywords: &[String]) -> u32 {
    let id = normalize(&m.id);
    let label = m.label.as_deref().map(normalize).unwrap_or_default();
    let types = normalize(&m.types.join(" "));

    let mut score = 0;
    if m.id.eq_ignore_ascii_case(raw) || m.iri == raw {
        score += 100;
    }
    if !phrase.is_empty() && (id.contains(phrase) || label.contains(phrase)) {
        score += 20;
    }
    for kw in keywords {
        if id.contains(kw.as_str()) || label.contains(kw.as_str()) {
            score += 5;
        }
        if types.contains(kw.as_str()) {
            score += 3;
        }
    }
    if score > 0 && !m.types.is_empty() {
        score += 1;
    }
    score
}
