//! TTL rules: validation, YAML loading and first-match evaluation against resources.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use janitor_core::{parse_ttl, Facts, FormatError, JanitorError, Resource, Ttl, CONTEXT_KEY};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub mod predicate;

pub use predicate::{Expression, PredicateError};

/// Resource-type entry matching every type.
pub const ANY_RESOURCE: &str = "*";

static RULE_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("rule id pattern is valid"));

/// One rule record as written in the rules document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(alias = "jmespath")]
    pub predicate: String,
    pub ttl: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesDocument {
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid rule id {0:?}: must match ^[a-z][a-z0-9-]*$")]
    InvalidId(String),
    #[error("rule {id}: invalid ttl {ttl:?}")]
    InvalidTtl {
        id: String,
        ttl: String,
        #[source]
        source: FormatError,
    },
    #[error("rule {id}: invalid predicate")]
    InvalidPredicate {
        id: String,
        #[source]
        source: PredicateError,
    },
    #[error("rule #{index}")]
    InvalidRule {
        index: usize,
        #[source]
        source: Box<RuleError>,
    },
    #[error("malformed rules document: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("cannot read rules file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<RuleError> for JanitorError {
    fn from(err: RuleError) -> Self {
        let predicate = match &err {
            RuleError::InvalidPredicate { .. } => true,
            RuleError::InvalidRule { source, .. } => matches!(**source, RuleError::InvalidPredicate { .. }),
            _ => false,
        };
        if predicate {
            JanitorError::Predicate(error_chain(&err))
        } else {
            JanitorError::Config(error_chain(&err))
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut cur = err.source();
    while let Some(e) = cur {
        out.push_str(": ");
        out.push_str(&e.to_string());
        cur = e.source();
    }
    out
}

/// A validated rule with its predicate compiled and TTL parsed.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub resources: Vec<String>,
    expression: Expression,
    ttl: Ttl,
    ttl_raw: String,
}

impl Rule {
    /// Check id, TTL and predicate in that order; the first failure is returned.
    pub fn validate(spec: &RuleSpec) -> Result<(), RuleError> {
        Self::compile(spec.clone()).map(|_| ())
    }

    pub fn compile(spec: RuleSpec) -> Result<Self, RuleError> {
        if !RULE_ID_PATTERN.is_match(&spec.id) {
            return Err(RuleError::InvalidId(spec.id));
        }
        let ttl = parse_ttl(&spec.ttl).map_err(|source| RuleError::InvalidTtl {
            id: spec.id.clone(),
            ttl: spec.ttl.clone(),
            source,
        })?;
        let expression = Expression::compile(&spec.predicate).map_err(|source| RuleError::InvalidPredicate {
            id: spec.id.clone(),
            source,
        })?;
        Ok(Self { id: spec.id, resources: spec.resources, expression, ttl, ttl_raw: spec.ttl })
    }

    pub fn ttl(&self) -> Ttl {
        self.ttl
    }

    pub fn ttl_raw(&self) -> &str {
        &self.ttl_raw
    }

    pub fn predicate(&self) -> &str {
        self.expression.source()
    }

    /// Resource-type gate: the plural type name is listed or the list holds `*`.
    pub fn applies_to(&self, type_name: &str) -> bool {
        self.resources.iter().any(|r| r == ANY_RESOURCE || r == type_name)
    }

    pub fn matches(&self, resource: &Resource, context: &Facts) -> bool {
        if !self.applies_to(&resource.type_name()) {
            return false;
        }
        self.matches_document(&evaluation_document(resource, context))
    }

    /// Evaluate the predicate against a prepared document; errors count as no match.
    pub fn matches_document(&self, doc: &Value) -> bool {
        match self.expression.search(doc) {
            Ok(v) => coerce_match(&v),
            Err(e) => {
                debug!(rule = %self.id, error = %e, "predicate evaluation failed");
                false
            }
        }
    }
}

/// Booleans as-is; strings, lists and maps by non-emptiness; everything else is no match.
fn coerce_match(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Null | Value::Number(_) => false,
    }
}

/// The resource's JSON tree with the context facts under `_context`.
pub fn evaluation_document(resource: &Resource, context: &Facts) -> Value {
    let mut doc = resource.raw.clone();
    if let Some(obj) = doc.as_object_mut() {
        obj.insert(CONTEXT_KEY.to_string(), Value::Object(context.clone()));
    }
    doc
}

/// Ordered, immutable rule list.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile every spec; any invalid entry fails the whole set.
    pub fn new(specs: Vec<RuleSpec>) -> Result<Self, RuleError> {
        let rules = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                Rule::compile(spec).map_err(|e| RuleError::InvalidRule { index, source: Box::new(e) })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Parse a YAML rules document (`rules: [...]`). An empty document yields no rules.
    pub fn load(source: &str) -> Result<Self, RuleError> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        let doc: Option<RulesDocument> = serde_yaml::from_str(source)?;
        Self::new(doc.unwrap_or_default().rules)
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| RuleError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::load(&source)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// First rule, in document order, whose gate and predicate match.
    pub fn first_match(&self, resource: &Resource, context: &Facts) -> Option<&Rule> {
        let type_name = resource.type_name();
        let mut candidates = self.rules.iter().filter(|r| r.applies_to(&type_name)).peekable();
        candidates.peek()?;
        let doc = evaluation_document(resource, context);
        candidates.find(|r| r.matches_document(&doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use janitor_core::ResourceType;
    use serde_json::json;
    use std::sync::Arc;

    fn spec(id: &str, resources: &[&str], predicate: &str, ttl: &str) -> RuleSpec {
        RuleSpec {
            id: id.into(),
            resources: resources.iter().map(|s| s.to_string()).collect(),
            predicate: predicate.into(),
            ttl: ttl.into(),
        }
    }

    fn pod(labels: Value) -> Resource {
        let raw = json!({"metadata": {"name": "web", "namespace": "default", "labels": labels}});
        Resource::from_object(raw, Arc::new(ResourceType::new("", "v1", "Pod", "pods", true))).unwrap()
    }

    #[test]
    fn validate_rejects_each_field() {
        assert!(matches!(
            Rule::validate(&spec("Bad-Id", &["*"], "true", "1h")),
            Err(RuleError::InvalidId(_))
        ));
        assert!(matches!(
            Rule::validate(&spec("ok", &["*"], "`true`", "7x")),
            Err(RuleError::InvalidTtl { .. })
        ));
        assert!(matches!(
            Rule::validate(&spec("ok", &["*"], "[invalid", "1h")),
            Err(RuleError::InvalidPredicate { .. })
        ));
        assert!(Rule::validate(&spec("temp-pods-2", &["pods"], "metadata.name", "forever")).is_ok());
    }

    #[test]
    fn first_match_wins() {
        let rules = RuleSet::new(vec![
            spec("test-pods", &["pods"], "metadata.labels.env == 'test'", "1h"),
            spec("everything", &["*"], "metadata.name", "7d"),
        ])
        .unwrap();
        let test_pod = pod(json!({"env": "test"}));
        let matched = rules.first_match(&test_pod, &Facts::new()).unwrap();
        assert_eq!(matched.id, "test-pods");
        assert_eq!(matched.ttl_raw(), "1h");

        let prod_pod = pod(json!({"env": "prod"}));
        assert_eq!(rules.first_match(&prod_pod, &Facts::new()).unwrap().id, "everything");
    }

    #[test]
    fn type_gate_blocks_other_types() {
        let rule = Rule::compile(spec("deploys", &["deployments"], "`true`", "1h")).unwrap();
        assert!(!rule.matches(&pod(json!({})), &Facts::new()));
        assert!(rule.applies_to("deployments"));
    }

    #[test]
    fn result_coercion() {
        let r = pod(json!({"app": "web", "count": "3"}));
        let cases = [
            ("metadata.labels.app", true),
            ("metadata.labels.missing", false),
            ("metadata.labels", true),
            ("`[]`", false),
            ("`{}`", false),
            ("''", false),
            ("`5`", false),
            ("`false`", false),
            ("length(metadata.name)", false),
            ("length(`1`)", false),
        ];
        for (predicate, expected) in cases {
            let rule = Rule::compile(spec("r", &["*"], predicate, "1h")).unwrap();
            assert_eq!(rule.matches(&r, &Facts::new()), expected, "{predicate}");
        }
    }

    #[test]
    fn context_is_visible_under_reserved_key() {
        let rule = Rule::compile(spec("dice", &["*"], "_context.random_dice > `3`", "1h")).unwrap();
        let mut facts = Facts::new();
        facts.insert("random_dice".into(), json!(5));
        assert!(rule.matches(&pod(json!({})), &facts));
        facts.insert("random_dice".into(), json!(2));
        assert!(!rule.matches(&pod(json!({})), &facts));
    }

    #[test]
    fn load_yaml_with_jmespath_alias() {
        let rules = RuleSet::load(
            r#"
rules:
  - id: require-app-label
    resources: [deployments, statefulsets]
    jmespath: "!(spec.template.metadata.labels.app)"
    ttl: 4d
  - id: unused-pvcs
    resources: [persistentvolumeclaims]
    predicate: "_context.pvc_is_not_mounted && _context.pvc_is_not_referenced"
    ttl: 24h
"#,
        )
        .unwrap();
        assert_eq!(rules.len(), 2);
        let ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["require-app-label", "unused-pvcs"]);
    }

    #[test]
    fn one_bad_rule_fails_the_whole_load() {
        let err = RuleSet::load(
            r#"
rules:
  - {id: good, resources: ["*"], predicate: "metadata.name", ttl: 1h}
  - {id: bad, resources: ["*"], predicate: "metadata.name", ttl: 7x}
"#,
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::InvalidRule { index: 1, .. }));
        assert!(matches!(JanitorError::from(err), JanitorError::Config(msg) if msg.contains("7x")));
    }

    #[test]
    fn empty_document_has_no_rules() {
        assert!(RuleSet::load("").unwrap().is_empty());
        assert!(RuleSet::load("rules: []").unwrap().is_empty());
        assert!(RuleSet::load("rules: {}").is_err());
    }
}
