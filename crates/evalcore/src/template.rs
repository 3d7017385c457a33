//! `${root.path}` interpolation.
//!
//! A parameter value is scanned recursively (strings, arrays, objects). Inside a
//! string every `${...}` marker names a root (a node id or a variable) followed by
//! an optional dotted path into that value. Rules:
//!
//! - a string that is exactly one marker is replaced by the referenced value with
//!   its type preserved, or `null` when nothing is found;
//! - markers embedded in longer text are rendered as text, missing ones as `""`;
//! - `$${` produces a literal `${`;
//! - an unterminated `${` or an empty marker is kept verbatim.
//!
//! Resolution never raises: unresolved references degrade to empty values.

use crate::Value;

/// Anything that can answer `${root.path}` lookups.
pub trait ReferenceSource {
    fn lookup(&self, reference: &Reference) -> Option<Value>;
}

/// Parsed form of a single `${...}` marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub root: String,
    pub path: Vec<String>,
}

impl Reference {
    pub fn parse(expr: &str) -> Option<Self> {
        let mut parts = expr.trim().split('.').map(str::trim);
        let root = parts.next().filter(|r| !r.is_empty())?;
        let path: Vec<String> = parts.map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return None;
        }
        Some(Self {
            root: root.to_string(),
            path,
        })
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.root)?;
        for segment in &self.path {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Reference(Reference),
}

/// Split a template string into literal text and references.
pub fn parse(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        literal.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("$${") {
            literal.push_str("${");
            rest = after;
            continue;
        }

        let Some(body) = tail.strip_prefix("${") else {
            literal.push('$');
            rest = &tail[1..];
            continue;
        };

        let Some(end) = body.find('}') else {
            // unterminated, keep the rest as text
            literal.push_str(tail);
            rest = "";
            break;
        };

        match Reference::parse(&body[..end]) {
            Some(reference) => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Reference(reference));
            }
            None => literal.push_str(&tail[..end + 3]),
        }
        rest = &body[end + 1..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

/// All references appearing anywhere inside `value`.
pub fn references(value: &Value) -> Vec<Reference> {
    let mut found = Vec::new();
    collect_references(value, &mut found);
    found
}

fn collect_references(value: &Value, found: &mut Vec<Reference>) {
    match value {
        Value::String(s) => found.extend(parse(s).into_iter().filter_map(|seg| match seg {
            Segment::Reference(r) => Some(r),
            Segment::Literal(_) => None,
        })),
        Value::Array(items) => items.iter().for_each(|v| collect_references(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect_references(v, found)),
        _ => {}
    }
}

/// Resolve every marker inside `value`, returning a new value.
pub fn resolve_value<S: ReferenceSource + ?Sized>(value: &Value, source: &S) -> Value {
    match value {
        Value::String(s) => resolve_str(s, source),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, source)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, source)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn lookup_or_trace<S: ReferenceSource + ?Sized>(source: &S, reference: &Reference) -> Option<Value> {
    let found = source.lookup(reference);
    if found.is_none() {
        tracing::debug!(reference = %reference, "Unresolved reference");
    }
    found
}

pub fn resolve_str<S: ReferenceSource + ?Sized>(template: &str, source: &S) -> Value {
    if !template.contains('$') {
        return Value::String(template.to_string());
    }

    let segments = parse(template);
    if let [Segment::Reference(reference)] = segments.as_slice() {
        return lookup_or_trace(source, reference).unwrap_or(Value::Null);
    }

    let mut out = String::with_capacity(template.len());
    for segment in &segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Reference(reference) => {
                if let Some(value) = lookup_or_trace(source, reference) {
                    out.push_str(&value.render());
                }
            }
        }
    }
    Value::String(out)
}
