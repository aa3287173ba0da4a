//! Metadata filter grammar: a tree of logical combinators over leaf
//! operators, compiled once into a predicate safely shared across
//! concurrent queries (§4.2).

pub mod regex_safety;

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// The wire-format filter tree, `$`-prefixed MongoDB-style JSON (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    /// All children must match.
    And(AndNode),
    /// At least one child must match.
    Or(OrNode),
    /// The child must not match.
    Not(NotNode),
    /// A field-path leaf test.
    Leaf(LeafNode),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AndNode {
    #[serde(rename = "$and")]
    pub children: Vec<Filter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrNode {
    #[serde(rename = "$or")]
    pub children: Vec<Filter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotNode {
    #[serde(rename = "$not")]
    pub child: Box<Filter>,
}

/// A single `field: test` pair. `test` is either a bare literal (equality
/// shorthand) or an object of `$operator: value` entries, all of which must
/// hold (implicit AND across operators on the same field).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafNode {
    #[serde(flatten)]
    pub fields: serde_json::Map<String, JsonValue>,
}

/// A compiled, concurrency-safe predicate over a record's metadata mapping.
#[derive(Clone)]
pub struct CompiledFilter {
    predicate: Arc<dyn Fn(&serde_json::Map<String, JsonValue>) -> bool + Send + Sync>,
}

impl CompiledFilter {
    /// Evaluates the predicate against `metadata`.
    #[must_use]
    pub fn matches(&self, metadata: &serde_json::Map<String, JsonValue>) -> bool {
        (self.predicate)(metadata)
    }
}

impl std::fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CompiledFilter(..)")
    }
}

/// Compiles `filter` into a [`CompiledFilter`] (§4.2 "Compilation").
///
/// # Errors
///
/// Returns [`Error::BadFilter`] for an unknown operator or an unsafe regex
/// pattern.
pub fn compile(filter: &Filter) -> Result<CompiledFilter> {
    let node = compile_node(filter)?;
    Ok(CompiledFilter {
        predicate: Arc::new(move |metadata| node.eval(metadata)),
    })
}

/// The compiled, evaluable form of a [`Filter`] tree.
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Leaf { path: String, tests: Vec<LeafTest> },
}

enum LeafTest {
    Eq(JsonValue),
    Ne(JsonValue),
    Gt(f64),
    Gte(f64),
    Lt(f64),
    Lte(f64),
    In(Vec<JsonValue>),
    Nin(Vec<JsonValue>),
    Exists(bool),
    Type(String),
    Size(SizeTest),
    All(Vec<JsonValue>),
    ElemMatch(Box<Node>),
    Regex(Regex),
}

enum SizeTest {
    Exact(usize),
    Range(usize, usize),
}

impl Node {
    fn eval(&self, metadata: &serde_json::Map<String, JsonValue>) -> bool {
        match self {
            Self::And(children) => children.iter().all(|c| c.eval(metadata)),
            Self::Or(children) => children.iter().any(|c| c.eval(metadata)),
            Self::Not(child) => !child.eval(metadata),
            Self::Leaf { path, tests } => {
                let value = get_path(metadata, path);
                tests.iter().all(|t| eval_leaf_test(t, value))
            }
        }
    }
}

fn compile_node(filter: &Filter) -> Result<Node> {
    match filter {
        Filter::And(node) => Ok(Node::And(
            node.children.iter().map(compile_node).collect::<Result<_>>()?,
        )),
        Filter::Or(node) => Ok(Node::Or(
            node.children.iter().map(compile_node).collect::<Result<_>>()?,
        )),
        Filter::Not(node) => Ok(Node::Not(Box::new(compile_node(&node.child)?))),
        Filter::Leaf(node) => compile_leaf(node),
    }
}

fn compile_leaf(node: &LeafNode) -> Result<Node> {
    if node.fields.len() != 1 {
        return Err(Error::BadFilter(
            "a filter leaf must bind exactly one field path".into(),
        ));
    }
    let (path, test_value) = node.fields.iter().next().unwrap();

    let tests = match test_value {
        JsonValue::Object(ops) if ops.keys().all(|k| k.starts_with('$')) => ops
            .iter()
            .map(|(op, v)| compile_operator(op, v))
            .collect::<Result<Vec<_>>>()?,
        other => vec![LeafTest::Eq(other.clone())],
    };

    Ok(Node::Leaf {
        path: path.clone(),
        tests,
    })
}

fn as_f64(v: &JsonValue) -> Option<f64> {
    v.as_f64()
}

fn compile_operator(op: &str, value: &JsonValue) -> Result<LeafTest> {
    match op {
        "$eq" => Ok(LeafTest::Eq(value.clone())),
        "$ne" => Ok(LeafTest::Ne(value.clone())),
        "$gt" => Ok(LeafTest::Gt(require_number(value)?)),
        "$gte" => Ok(LeafTest::Gte(require_number(value)?)),
        "$lt" => Ok(LeafTest::Lt(require_number(value)?)),
        "$lte" => Ok(LeafTest::Lte(require_number(value)?)),
        "$in" => Ok(LeafTest::In(require_array(value)?)),
        "$nin" => Ok(LeafTest::Nin(require_array(value)?)),
        "$exists" => Ok(LeafTest::Exists(value.as_bool().ok_or_else(|| {
            Error::BadFilter("$exists requires a boolean value".into())
        })?)),
        "$type" => {
            let t = value
                .as_str()
                .ok_or_else(|| Error::BadFilter("$type requires a string value".into()))?;
            if !["null", "boolean", "number", "string", "array", "object"].contains(&t) {
                return Err(Error::BadFilter(format!("unknown $type value '{t}'")));
            }
            Ok(LeafTest::Type(t.to_string()))
        }
        "$size" => Ok(LeafTest::Size(compile_size(value)?)),
        "$all" => Ok(LeafTest::All(require_array(value)?)),
        "$elemMatch" => {
            let sub: Filter = serde_json::from_value(value.clone())
                .map_err(|e| Error::BadFilter(format!("invalid $elemMatch subfilter: {e}")))?;
            Ok(LeafTest::ElemMatch(Box::new(compile_node(&sub)?)))
        }
        "$regex" => {
            let pattern = value
                .as_str()
                .ok_or_else(|| Error::BadFilter("$regex requires a string pattern".into()))?;
            let re = regex_safety::compile_safe(pattern, "")?;
            Ok(LeafTest::Regex(re))
        }
        other => Err(Error::BadFilter(format!("unknown filter operator '{other}'"))),
    }
}

fn require_number(value: &JsonValue) -> Result<f64> {
    as_f64(value).ok_or_else(|| Error::BadFilter("comparison operator requires a numeric value".into()))
}

fn require_array(value: &JsonValue) -> Result<Vec<JsonValue>> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| Error::BadFilter("operator requires an array value".into()))
}

fn compile_size(value: &JsonValue) -> Result<SizeTest> {
    if let Some(n) = value.as_u64() {
        return Ok(SizeTest::Exact(n as usize));
    }
    if let Some(arr) = value.as_array() {
        if arr.len() == 2 {
            if let (Some(lo), Some(hi)) = (arr[0].as_u64(), arr[1].as_u64()) {
                return Ok(SizeTest::Range(lo as usize, hi as usize));
            }
        }
    }
    Err(Error::BadFilter(
        "$size requires an integer or a [min, max] range".into(),
    ))
}

/// Resolves a dot-separated path against a metadata mapping.
fn get_path<'a>(metadata: &'a serde_json::Map<String, JsonValue>, path: &str) -> Option<&'a JsonValue> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = metadata.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn deep_eq(a: &JsonValue, b: &JsonValue) -> bool {
    a == b
}

fn eval_leaf_test(test: &LeafTest, value: Option<&JsonValue>) -> bool {
    match test {
        LeafTest::Exists(expected) => value.is_some() == *expected,
        _ if value.is_none() => false,
        LeafTest::Eq(expected) => deep_eq(value.unwrap(), expected),
        LeafTest::Ne(expected) => !deep_eq(value.unwrap(), expected),
        LeafTest::Gt(n) => as_f64(value.unwrap()).is_some_and(|x| x > *n),
        LeafTest::Gte(n) => as_f64(value.unwrap()).is_some_and(|x| x >= *n),
        LeafTest::Lt(n) => as_f64(value.unwrap()).is_some_and(|x| x < *n),
        LeafTest::Lte(n) => as_f64(value.unwrap()).is_some_and(|x| x <= *n),
        LeafTest::In(options) => options.iter().any(|o| deep_eq(value.unwrap(), o)),
        LeafTest::Nin(options) => !options.iter().any(|o| deep_eq(value.unwrap(), o)),
        LeafTest::Type(t) => json_type_name(value.unwrap()) == t,
        LeafTest::Size(size_test) => {
            let len = match value.unwrap() {
                JsonValue::Array(arr) => arr.len(),
                JsonValue::String(s) => s.chars().count(),
                JsonValue::Object(map) => map.len(),
                _ => return false,
            };
            match size_test {
                SizeTest::Exact(n) => len == *n,
                SizeTest::Range(lo, hi) => len >= *lo && len <= *hi,
            }
        }
        LeafTest::All(required) => match value.unwrap() {
            JsonValue::Array(arr) => required.iter().all(|r| arr.iter().any(|x| deep_eq(x, r))),
            _ => false,
        },
        LeafTest::ElemMatch(sub) => match value.unwrap() {
            JsonValue::Array(arr) => arr.iter().any(|item| {
                let Some(obj) = item.as_object() else {
                    return false;
                };
                sub.eval(obj)
            }),
            _ => false,
        },
        LeafTest::Regex(re) => match value.unwrap() {
            JsonValue::String(s) => re.is_match(s),
            _ => false,
        },
    }
}

fn json_type_name(v: &JsonValue) -> &'static str {
    match v {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
