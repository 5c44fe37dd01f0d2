//! Local evaluation of Datatracker query parameters.
//!
//! Each query parameter becomes one [`Predicate`]. A parameter is classified by
//! its full name first: names listed as trim fields compare the id suffix of a
//! reference, names listed as deref fields compare a field of the referenced
//! object. Anything else is split into a field name and a comparison suffix
//! (`__contains`, `__gte`, `__gt`, `__lte`, `__lt`), defaulting to equality.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;

use crate::hints::CacheHints;
use crate::{CacheError, ResourceUri};

/// Parameters that control paging and presentation rather than selection.
pub const RESERVED_PARAMS: &[&str] = &["limit", "offset", "order_by", "format"];

/// Comparison applied to a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Contains,
    Gte,
    Gt,
    Lte,
    Lt,
}

impl FilterOp {
    const SUFFIXES: [(&'static str, FilterOp); 5] = [
        ("__contains", FilterOp::Contains),
        ("__gte", FilterOp::Gte),
        ("__gt", FilterOp::Gt),
        ("__lte", FilterOp::Lte),
        ("__lt", FilterOp::Lt),
    ];

    /// Split a parameter name into its field and operator.
    ///
    /// ```
    /// use datatracker_cache::filter::FilterOp;
    ///
    /// assert_eq!(FilterOp::split("time__gte"), ("time", FilterOp::Gte));
    /// assert_eq!(FilterOp::split("name"), ("name", FilterOp::Eq));
    /// ```
    pub fn split(param: &str) -> (&str, FilterOp) {
        for (suffix, op) in Self::SUFFIXES {
            if let Some(field) = param.strip_suffix(suffix)
                && !field.is_empty()
            {
                return (field, op);
            }
        }
        (param, FilterOp::Eq)
    }
}

/// One selection condition from a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// The id suffix of the reference in `field` equals `value`.
    Trim { field: String, value: String },
    /// The object referenced by `field` has `remote_field` equal to `value`.
    Deref {
        field: String,
        remote_field: String,
        value: String,
    },
    /// `field` compares to `value` under `op`.
    Compare {
        field: String,
        op: FilterOp,
        value: String,
    },
}

/// Resolves references to other resources during matching.
#[async_trait]
pub trait Dereferencer: Send + Sync {
    /// Fetch the object at `uri`, or `None` if it does not exist.
    async fn deref(&self, uri: &str) -> Result<Option<Value>, CacheError>;
}

/// A conjunction of predicates parsed from a query URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    /// Build the filter for `query` under the given type hints.
    pub fn parse(query: &ResourceUri, hints: &CacheHints) -> Self {
        let predicates = query
            .params()
            .iter()
            .filter(|(name, _)| !RESERVED_PARAMS.contains(&name.as_str()))
            .map(|(name, value)| {
                if hints.trim.contains(name) {
                    Predicate::Trim {
                        field: name.clone(),
                        value: value.clone(),
                    }
                } else if let Some(remote_field) = hints.deref.get(name) {
                    Predicate::Deref {
                        field: name.clone(),
                        remote_field: remote_field.clone(),
                        value: value.clone(),
                    }
                } else {
                    let (field, op) = FilterOp::split(name);
                    Predicate::Compare {
                        field: field.to_string(),
                        op,
                        value: value.clone(),
                    }
                }
            })
            .collect();
        Self { predicates }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Whether the filter selects every object.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Whether `object` satisfies every predicate.
    pub async fn matches(
        &self,
        object: &Value,
        resolver: &dyn Dereferencer,
    ) -> Result<bool, CacheError> {
        for predicate in &self.predicates {
            if !predicate.matches(object, resolver).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Predicate {
    async fn matches(&self, object: &Value, resolver: &dyn Dereferencer) -> Result<bool, CacheError> {
        match self {
            Predicate::Trim { field, value } => Ok(references(object.get(field))
                .iter()
                .any(|r| ResourceUri::id_suffix(r) == value)),
            Predicate::Deref {
                field,
                remote_field,
                value,
            } => {
                for reference in references(object.get(field)) {
                    let Some(remote) = resolver.deref(reference).await? else {
                        continue;
                    };
                    if remote
                        .get(remote_field)
                        .is_some_and(|v| compare(v, FilterOp::Eq, value))
                    {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Compare { field, op, value } => {
                Ok(object.get(field).is_some_and(|v| compare(v, *op, value)))
            }
        }
    }
}

/// Reference strings held by a field: a single URI or a list of them.
fn references(value: Option<&Value>) -> Vec<&str> {
    match value {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Compare a JSON field value against a query parameter string.
///
/// Null fields never match.
pub fn compare(field: &Value, op: FilterOp, param: &str) -> bool {
    match (field, op) {
        (Value::Null, _) => false,
        (Value::Array(items), FilterOp::Contains | FilterOp::Eq) => {
            items.iter().any(|item| scalar_eq(item, param))
        }
        (Value::String(s), FilterOp::Contains) => s.contains(param),
        (_, FilterOp::Contains) => false,
        (_, FilterOp::Eq) => scalar_eq(field, param),
        (_, op) => match scalar_cmp(field, param) {
            Some(ordering) => match op {
                FilterOp::Gte => ordering != Ordering::Less,
                FilterOp::Gt => ordering == Ordering::Greater,
                FilterOp::Lte => ordering != Ordering::Greater,
                FilterOp::Lt => ordering == Ordering::Less,
                FilterOp::Eq | FilterOp::Contains => false,
            },
            None => false,
        },
    }
}

fn scalar_eq(field: &Value, param: &str) -> bool {
    scalar_cmp(field, param) == Some(Ordering::Equal)
}

/// Order a scalar field relative to a parameter string.
///
/// Numbers compare numerically, strings lexically (which orders ISO-8601
/// timestamps chronologically), booleans accept `true`/`false` and `1`/`0`.
fn scalar_cmp(field: &Value, param: &str) -> Option<Ordering> {
    match field {
        Value::String(s) => Some(s.as_str().cmp(param)),
        Value::Number(n) => {
            if let (Some(a), Ok(b)) = (n.as_i64(), param.parse::<i64>()) {
                Some(a.cmp(&b))
            } else {
                let a = n.as_f64()?;
                let b = param.parse::<f64>().ok()?;
                a.partial_cmp(&b)
            }
        }
        Value::Bool(b) => {
            let p = match param.to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => return None,
            };
            Some(b.cmp(&p))
        }
        _ => None,
    }
}
