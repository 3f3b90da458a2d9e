//! SPARQL text and result parsing for the triple-store backend.
//!
//! Entries use the same vocabulary as the N-Triples backup codec: one
//! `semem:Interaction` subject per entry, embeddings and metadata as JSON
//! literals. Every statement lives in one named graph.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use semem_core::backup::BackupEntry;
use semem_core::backup::rdf::{SEMEM_NS, Term, entry_from_properties, entry_iri, entry_statements};
use semem_types::entry::MemoryEntry;
use semem_types::error::MemoryError;
use serde::Deserialize;
use uuid::Uuid;

fn semem(local: &str) -> String {
    format!("<{SEMEM_NS}{local}>")
}

fn interaction() -> String {
    semem("Interaction")
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// Replace every statement about `entry` with its current fields.
pub fn upsert_entry(graph: &str, entry: &MemoryEntry) -> Result<String, MemoryError> {
    let subject = format!("<{}>", entry_iri(&entry.id));
    let statements = entry_statements(&BackupEntry::from_entry(entry, true))?
        .into_iter()
        .map(|(predicate, object)| {
            format!("    {subject} <{predicate}> {} .", object.to_ntriples())
        })
        .collect::<Vec<_>>()
        .join("\n");
    Ok(format!(
        "DELETE WHERE {{ GRAPH <{graph}> {{ {subject} ?p ?o }} }};\n\
         INSERT DATA {{ GRAPH <{graph}> {{\n{statements}\n}} }}"
    ))
}

pub fn delete_entry(graph: &str, id: &Uuid) -> String {
    format!(
        "DELETE WHERE {{ GRAPH <{graph}> {{ <{}> ?p ?o }} }}",
        entry_iri(id)
    )
}

/// Remove every interaction in the graph, leaving unrelated statements.
pub fn delete_all(graph: &str) -> String {
    format!(
        "DELETE {{ GRAPH <{graph}> {{ ?s ?p ?o }} }}\n\
         WHERE {{ GRAPH <{graph}> {{ ?s a {} ; ?p ?o }} }}",
        interaction()
    )
}

/// Increment the access counter and stamp the access time.
pub fn record_access(graph: &str, id: &Uuid, at: &DateTime<Utc>) -> String {
    let subject = format!("<{}>", entry_iri(id));
    let count = semem("accessCount");
    let last = semem("lastAccessed");
    format!(
        "DELETE {{ GRAPH <{graph}> {{ {subject} {count} ?count . {subject} {last} ?last }} }}\n\
         INSERT {{ GRAPH <{graph}> {{ {subject} {count} ?next . {subject} {last} {at} }} }}\n\
         WHERE {{ GRAPH <{graph}> {{\n\
             {subject} {count} ?count .\n\
             OPTIONAL {{ {subject} {last} ?last }}\n\
             BIND(?count + 1 AS ?next)\n\
         }} }}",
        at = Term::date_time(at).to_ntriples()
    )
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub fn select_entry(graph: &str, id: &Uuid) -> String {
    format!(
        "SELECT ?s ?p ?o WHERE {{ GRAPH <{graph}> {{ BIND(<{}> AS ?s) ?s ?p ?o }} }}",
        entry_iri(id)
    )
}

pub fn ask_entry(graph: &str, id: &Uuid) -> String {
    format!(
        "ASK {{ GRAPH <{graph}> {{ <{}> a {} }} }}",
        entry_iri(id),
        interaction()
    )
}

/// All statements of the entries on one page, in ascending id order.
///
/// `page` is `(offset, limit)`; `None` selects every entry.
pub fn select_entries(graph: &str, page: Option<(usize, usize)>) -> String {
    let window = match page {
        Some((offset, limit)) => format!(" LIMIT {limit} OFFSET {offset}"),
        None => String::new(),
    };
    format!(
        "SELECT ?s ?p ?o WHERE {{ GRAPH <{graph}> {{\n\
             {{ SELECT ?s WHERE {{ ?s a {interaction} ; {id} ?id }} ORDER BY ?id{window} }}\n\
             ?s ?p ?o\n\
         }} }} ORDER BY ?s",
        interaction = interaction(),
        id = semem("id"),
    )
}

pub fn count_entries(graph: &str) -> String {
    format!(
        "SELECT (COUNT(DISTINCT ?s) AS ?count) WHERE {{ GRAPH <{graph}> {{ ?s a {} }} }}",
        interaction()
    )
}

/// Connectivity probe.
pub const HEALTH_PROBE: &str = "ASK {}";

// ---------------------------------------------------------------------------
// Results (application/sparql-results+json)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SelectResults {
    results: Bindings,
}

#[derive(Debug, Deserialize)]
struct Bindings {
    bindings: Vec<HashMap<String, BoundTerm>>,
}

#[derive(Debug, Deserialize)]
struct BoundTerm {
    value: String,
}

fn select_rows(
    response: serde_json::Value,
) -> Result<Vec<HashMap<String, BoundTerm>>, MemoryError> {
    let parsed: SelectResults = serde_json::from_value(response)
        .map_err(|e| MemoryError::Serialization(format!("malformed SPARQL results: {e}")))?;
    Ok(parsed.results.bindings)
}

/// Value of an `ASK` response.
pub fn parse_ask(response: &serde_json::Value) -> Result<bool, MemoryError> {
    response
        .get("boolean")
        .and_then(|b| b.as_bool())
        .ok_or_else(|| MemoryError::Serialization("ASK response without a boolean".into()))
}

/// Value of the `?count` binding of a count query.
pub fn parse_count(response: serde_json::Value) -> Result<u64, MemoryError> {
    let rows = select_rows(response)?;
    let Some(term) = rows.first().and_then(|row| row.get("count")) else {
        return Ok(0);
    };
    term.value
        .parse()
        .map_err(|e| MemoryError::Serialization(format!("bad count '{}': {e}", term.value)))
}

/// Group `?s ?p ?o` rows into entries, keeping first-seen subject order.
///
/// Each item is the subject IRI and either the entry or the reason it could
/// not be rebuilt, so callers decide whether a bad subject is fatal.
pub fn parse_entries(
    response: serde_json::Value,
) -> Result<Vec<(String, Result<MemoryEntry, MemoryError>)>, MemoryError> {
    let mut order: Vec<String> = Vec::new();
    let mut subjects: HashMap<String, HashMap<String, String>> = HashMap::new();
    for mut row in select_rows(response)? {
        let (Some(s), Some(p), Some(o)) = (row.remove("s"), row.remove("p"), row.remove("o"))
        else {
            continue;
        };
        let Some(local) = p.value.strip_prefix(SEMEM_NS) else {
            continue;
        };
        let props = subjects.entry(s.value.clone()).or_insert_with(|| {
            order.push(s.value.clone());
            HashMap::new()
        });
        props.insert(local.to_string(), o.value);
    }

    Ok(order
        .into_iter()
        .map(|subject| {
            let props = subjects.remove(&subject).unwrap_or_default();
            let entry = entry_from_properties(&subject, &props).and_then(|backup| {
                let Some(embedding) = backup.embedding.clone() else {
                    return Err(MemoryError::Serialization(format!(
                        "entry <{subject}> has no embedding"
                    )));
                };
                Ok(backup.into_entry(embedding))
            });
            (subject, entry)
        })
        .collect())
}
