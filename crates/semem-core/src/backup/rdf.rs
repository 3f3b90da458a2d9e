//! N-Triples backup encoding.
//!
//! Each entry becomes a `semem:Interaction` subject; the backup header is a
//! single `semem:Backup` subject. Embeddings and metadata are JSON literals so
//! that they survive the trip through a triple store unchanged. Decoding keeps
//! subjects in first-seen order, which keeps the entry checksum stable.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use semem_types::backend::BackendKind;
use semem_types::error::MemoryError;
use uuid::Uuid;

use super::{BackupDocument, BackupEntry};

pub const SEMEM_NS: &str = "http://purl.org/stuff/semem/";
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

/// IRI of the subject holding an entry's statements.
pub fn entry_iri(id: &Uuid) -> String {
    format!("{SEMEM_NS}entry/{id}")
}

fn backup_iri() -> String {
    format!("{SEMEM_NS}backup")
}

/// RDF term in object position.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Iri(String),
    Literal {
        value: String,
        datatype: Option<String>,
    },
}

impl Term {
    pub fn plain(value: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
        }
    }

    pub fn typed(value: impl Into<String>, xsd_type: &str) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: Some(format!("{XSD_NS}{xsd_type}")),
        }
    }

    pub fn date_time(at: &DateTime<Utc>) -> Self {
        Term::typed(at.to_rfc3339_opts(SecondsFormat::AutoSi, true), "dateTime")
    }

    /// N-Triples / SPARQL surface syntax.
    pub fn to_ntriples(&self) -> String {
        match self {
            Term::Iri(iri) => format!("<{iri}>"),
            Term::Literal {
                value,
                datatype: None,
            } => format!("\"{}\"", escape_literal(value)),
            Term::Literal {
                value,
                datatype: Some(dt),
            } => format!("\"{}\"^^<{dt}>", escape_literal(value)),
        }
    }

    fn lexical(&self) -> &str {
        match self {
            Term::Iri(iri) => iri,
            Term::Literal { value, .. } => value,
        }
    }
}

/// Statements describing one entry, as `(predicate IRI, object)` pairs.
///
/// Shared with the triple-store backend so both paths use the same vocabulary.
pub fn entry_statements(entry: &BackupEntry) -> Result<Vec<(String, Term)>, MemoryError> {
    let p = |local: &str| format!("{SEMEM_NS}{local}");
    let mut statements = vec![
        (RDF_TYPE.to_string(), Term::Iri(p("Interaction"))),
        (p("id"), Term::plain(entry.id.to_string())),
        (p("prompt"), Term::plain(entry.prompt.clone())),
        (p("response"), Term::plain(entry.response.clone())),
        (
            p("metadata"),
            Term::plain(serde_json::to_string(&entry.metadata)?),
        ),
        (p("timestamp"), Term::date_time(&entry.created_at)),
        (
            p("accessCount"),
            Term::typed(entry.access_count.to_string(), "integer"),
        ),
    ];
    if let Some(embedding) = &entry.embedding {
        statements.push((p("embedding"), Term::plain(serde_json::to_string(embedding)?)));
    }
    if let Some(at) = &entry.last_accessed_at {
        statements.push((p("lastAccessed"), Term::date_time(at)));
    }
    Ok(statements)
}

/// Rebuild an entry from `local name -> lexical value` pairs.
pub fn entry_from_properties(
    subject: &str,
    props: &HashMap<String, String>,
) -> Result<BackupEntry, MemoryError> {
    let required = |key: &str| {
        props.get(key).ok_or_else(|| {
            MemoryError::Serialization(format!("entry <{subject}> is missing semem:{key}"))
        })
    };
    let id_text = match props.get("id") {
        Some(id) => id.as_str(),
        None => subject.rsplit('/').next().unwrap_or_default(),
    };
    let id = Uuid::parse_str(id_text)
        .map_err(|e| MemoryError::Serialization(format!("bad entry id '{id_text}': {e}")))?;

    let embedding = props
        .get("embedding")
        .map(|json| serde_json::from_str::<Vec<f32>>(json))
        .transpose()?;
    let metadata = match props.get("metadata") {
        Some(json) => serde_json::from_str(json)?,
        None => Default::default(),
    };
    let access_count = match props.get("accessCount") {
        Some(n) => n
            .parse()
            .map_err(|e| MemoryError::Serialization(format!("bad accessCount '{n}': {e}")))?,
        None => 0,
    };
    let last_accessed_at = props.get("lastAccessed").map(|t| parse_time(t)).transpose()?;

    Ok(BackupEntry {
        id,
        prompt: required("prompt")?.clone(),
        response: required("response")?.clone(),
        embedding,
        metadata,
        created_at: parse_time(required("timestamp")?)?,
        access_count,
        last_accessed_at,
    })
}

pub fn encode(document: &BackupDocument) -> Result<String, MemoryError> {
    let mut out = String::new();
    let header = backup_iri();
    let p = |local: &str| format!("{SEMEM_NS}{local}");
    let header_statements = [
        (RDF_TYPE.to_string(), Term::Iri(p("Backup"))),
        (p("format"), Term::plain(document.format.clone())),
        (p("version"), Term::typed(document.version.to_string(), "integer")),
        (p("createdAt"), Term::date_time(&document.created_at)),
        (p("source"), Term::plain(document.source.to_string())),
        (p("dimension"), Term::typed(document.dimension.to_string(), "integer")),
        (
            p("includeEmbeddings"),
            Term::typed(document.include_embeddings.to_string(), "boolean"),
        ),
        (p("checksum"), Term::plain(document.checksum.clone())),
    ];
    for (predicate, object) in &header_statements {
        push_triple(&mut out, &header, predicate, object);
    }
    for entry in &document.entries {
        let subject = entry_iri(&entry.id);
        for (predicate, object) in entry_statements(entry)? {
            push_triple(&mut out, &subject, &predicate, &object);
        }
    }
    Ok(out)
}

/// Parse an N-Triples backup without verifying its checksum.
pub fn decode(text: &str) -> Result<BackupDocument, MemoryError> {
    let header_subject = backup_iri();
    let mut header: HashMap<String, String> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut subjects: HashMap<String, HashMap<String, String>> = HashMap::new();

    for (number, line) in text.lines().enumerate() {
        let Some(triple) = parse_line(line)
            .map_err(|e| MemoryError::Serialization(format!("line {}: {e}", number + 1)))?
        else {
            continue;
        };
        let Some(local) = triple.predicate.strip_prefix(SEMEM_NS) else {
            continue;
        };
        let value = triple.object.lexical().to_string();
        if triple.subject == header_subject {
            header.insert(local.to_string(), value);
            continue;
        }
        let props = subjects.entry(triple.subject.clone()).or_insert_with(|| {
            order.push(triple.subject.clone());
            HashMap::new()
        });
        props.insert(local.to_string(), value);
    }

    let field = |key: &str| {
        header.get(key).ok_or_else(|| {
            MemoryError::Validation(format!("not a semem backup: header has no semem:{key}"))
        })
    };
    let format = field("format")?.clone();
    if format != super::BACKUP_FORMAT {
        return Err(MemoryError::Validation(format!(
            "unsupported backup format '{format}'"
        )));
    }
    let version = parse_number(field("version")?, "version")?;
    let dimension = parse_number(field("dimension")?, "dimension")?;
    let source: BackendKind = field("source")?
        .parse()
        .map_err(MemoryError::Serialization)?;
    let include_embeddings = field("includeEmbeddings")? == "true";

    let entries = order
        .iter()
        .map(|subject| entry_from_properties(subject, &subjects[subject]))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BackupDocument {
        format,
        version,
        created_at: parse_time(field("createdAt")?)?,
        source,
        dimension,
        include_embeddings,
        checksum: field("checksum")?.clone(),
        entries,
    })
}

fn push_triple(out: &mut String, subject: &str, predicate: &str, object: &Term) {
    out.push_str(&format!(
        "<{subject}> <{predicate}> {} .\n",
        object.to_ntriples()
    ));
}

fn parse_time(text: &str) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MemoryError::Serialization(format!("bad timestamp '{text}': {e}")))
}

fn parse_number<T: std::str::FromStr>(text: &str, what: &str) -> Result<T, MemoryError>
where
    T::Err: std::fmt::Display,
{
    text.parse()
        .map_err(|e| MemoryError::Serialization(format!("bad {what} '{text}': {e}")))
}

// ---------------------------------------------------------------------------
// Literal escaping
// ---------------------------------------------------------------------------

/// Escape a string for a double-quoted N-Triples or SPARQL literal.
pub fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse of [`escape_literal`], also accepting `\uXXXX` and `\UXXXXXXXX`.
pub fn unescape_literal(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some(u @ ('u' | 'U')) => {
                let width = if u == 'u' { 4 } else { 8 };
                let hex: String = chars.by_ref().take(width).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .filter(|_| hex.len() == width)
                    .and_then(char::from_u32)
                    .ok_or_else(|| format!("invalid unicode escape \\{u}{hex}"))?;
                out.push(code);
            }
            Some(other) => return Err(format!("invalid escape \\{other}")),
            None => return Err("dangling backslash".to_string()),
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Line parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: Term,
}

/// Parse one N-Triples line; blank lines and comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Triple>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut cursor = Cursor { rest: line };
    let subject = cursor.iri()?;
    let predicate = cursor.iri()?;
    let object = cursor.object()?;
    if cursor.rest.trim() != "." {
        return Err(format!("expected '.' but found '{}'", cursor.rest.trim()));
    }
    Ok(Some(Triple {
        subject,
        predicate,
        object,
    }))
}

struct Cursor<'a> {
    rest: &'a str,
}

impl Cursor<'_> {
    fn iri(&mut self) -> Result<String, String> {
        let body = self
            .rest
            .trim_start()
            .strip_prefix('<')
            .ok_or_else(|| format!("expected IRI at '{}'", self.rest.trim_start()))?;
        let end = body.find('>').ok_or("unterminated IRI")?;
        self.rest = &body[end + 1..];
        Ok(body[..end].to_string())
    }

    fn object(&mut self) -> Result<Term, String> {
        self.rest = self.rest.trim_start();
        if self.rest.starts_with('<') {
            return self.iri().map(Term::Iri);
        }
        let body = self
            .rest
            .strip_prefix('"')
            .ok_or_else(|| format!("expected literal at '{}'", self.rest))?;

        let mut escaped = false;
        let mut end = None;
        for (i, c) in body.char_indices() {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                end = Some(i);
                break;
            }
        }
        let end = end.ok_or("unterminated literal")?;
        let value = unescape_literal(&body[..end])?;
        self.rest = &body[end + 1..];

        let mut datatype = None;
        if let Some(after) = self.rest.strip_prefix("^^") {
            self.rest = after;
            datatype = Some(self.iri()?);
        } else if let Some(after) = self.rest.strip_prefix('@') {
            let tag_end = after.find(char::is_whitespace).unwrap_or(after.len());
            self.rest = &after[tag_end..];
        }
        Ok(Term::Literal { value, datatype })
    }
}
