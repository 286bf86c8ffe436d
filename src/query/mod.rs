// Predicate model - represents filter intent without evaluating it

pub mod cache;
pub mod executor;
pub mod result;

use crate::error::{Result, ShelfDbError};
use crate::value;
use serde_json::Value;
use std::fmt;

/// A comparison operator recognized by the query engine.
///
/// Operators are parsed and validated when a predicate clause is appended;
/// once a predicate holds an `Operator` there is no unknown-operator case
/// left to handle at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `==` loose equality (numeric coercion).
    Eq,
    /// `===` strict value equality.
    StrictEq,
    /// `!=` loose inequality.
    Ne,
    /// `!==` strict inequality.
    StrictNe,
    Gt,
    Ge,
    Lt,
    Le,
    /// Membership of the document value in the predicate value.
    In,
    /// Array membership, or word-boundary substring match on strings.
    Contains,
}

impl Operator {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "==" => Ok(Operator::Eq),
            "===" => Ok(Operator::StrictEq),
            "!=" => Ok(Operator::Ne),
            "!==" => Ok(Operator::StrictNe),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            "IN" => Ok(Operator::In),
            "CONTAINS" => Ok(Operator::Contains),
            other => Err(ShelfDbError::InvalidArgument(format!(
                "unknown operator `{other}`"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::StrictEq => "===",
            Operator::Ne => "!=",
            Operator::StrictNe => "!==",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::In => "IN",
            Operator::Contains => "CONTAINS",
        }
    }

    /// Evaluate this operator against a resolved document value.
    pub(crate) fn matches(&self, doc_value: &Value, predicate_value: &Value) -> bool {
        use std::cmp::Ordering;

        match self {
            Operator::Eq => value::loose_eq(doc_value, predicate_value),
            Operator::Ne => !value::loose_eq(doc_value, predicate_value),
            Operator::StrictEq => doc_value == predicate_value,
            Operator::StrictNe => doc_value != predicate_value,
            Operator::Gt => value::compare(doc_value, predicate_value) == Ordering::Greater,
            Operator::Ge => value::compare(doc_value, predicate_value) != Ordering::Less,
            Operator::Lt => value::compare(doc_value, predicate_value) == Ordering::Less,
            Operator::Le => value::compare(doc_value, predicate_value) != Ordering::Greater,
            Operator::In => match predicate_value {
                Value::Array(items) => items.iter().any(|item| value::loose_eq(doc_value, item)),
                single => value::loose_eq(doc_value, single),
            },
            Operator::Contains => match doc_value {
                Value::Array(items) => {
                    items.iter().any(|item| value::loose_eq(item, predicate_value))
                }
                Value::String(haystack) => {
                    let needle = match predicate_value {
                        Value::String(s) => s.clone(),
                        other => value::key_string(other),
                    };
                    word_boundary_match(haystack, &needle)
                }
                _ => false,
            },
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the needle appears in the haystack anchored at word boundaries.
/// `"Northern"` matches `"Northern Europe"`, `"orth"` does not.
fn word_boundary_match(haystack: &str, needle: &str) -> bool {
    let pattern = format!(r"\b{}\b", regex::escape(needle));
    regex::Regex::new(&pattern)
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

/// How a clause combines with the running result of the clauses before it.
/// The first clause's combinator is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

/// One node of a predicate tree: a single condition, or a nested group.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf {
        combinator: Combinator,
        field: String,
        operator: Operator,
        value: Value,
    },
    Group {
        combinator: Combinator,
        nodes: Vec<Node>,
    },
}

impl Node {
    pub fn combinator(&self) -> Combinator {
        match self {
            Node::Leaf { combinator, .. } | Node::Group { combinator, .. } => *combinator,
        }
    }
}

/// An ordered tree of filter conditions combined with AND/OR.
///
/// Built append-only; clause order is significant for evaluation (see the
/// executor's AND/OR combination rules). Sub-groups are explicit `Predicate`
/// values composed by the caller:
///
/// ```
/// use shelfdb::query::Predicate;
///
/// let sub = Predicate::new()
///     .where_("lang", "==", "Italian")?
///     .or_where("lang", "==", "English")?;
/// let pred = Predicate::new()
///     .where_("region", "==", "Europe")?
///     .and_group(sub);
/// # Ok::<(), shelfdb::ShelfDbError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    nodes: Vec<Node>,
}

impl Predicate {
    pub fn new() -> Self {
        Predicate::default()
    }

    /// Append an AND clause. Alias of [`and_where`](Self::and_where).
    pub fn where_(self, field: &str, operator: &str, value: impl Into<Value>) -> Result<Self> {
        self.and_where(field, operator, value)
    }

    /// Append an AND clause. Fails if the field is empty after trimming or
    /// the operator is unrecognized.
    pub fn and_where(
        mut self,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<Self> {
        self.push_leaf(Combinator::And, field, operator, value.into())?;
        Ok(self)
    }

    /// Append an OR clause.
    pub fn or_where(
        mut self,
        field: &str,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<Self> {
        self.push_leaf(Combinator::Or, field, operator, value.into())?;
        Ok(self)
    }

    /// Append a nested sub-group, AND-combined.
    pub fn and_group(mut self, sub: Predicate) -> Self {
        self.nodes.push(Node::Group {
            combinator: Combinator::And,
            nodes: sub.nodes,
        });
        self
    }

    /// Append a nested sub-group, OR-combined.
    pub fn or_group(mut self, sub: Predicate) -> Self {
        self.nodes.push(Node::Group {
            combinator: Combinator::Or,
            nodes: sub.nodes,
        });
        self
    }

    /// The ordered top-level nodes, exactly as built.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push_leaf(
        &mut self,
        combinator: Combinator,
        field: &str,
        operator: &str,
        value: Value,
    ) -> Result<()> {
        let field = field.trim();
        if field.is_empty() {
            return Err(ShelfDbError::InvalidArgument(
                "field name cannot be empty".to_string(),
            ));
        }

        self.nodes.push(Node::Leaf {
            combinator,
            field: field.to_string(),
            operator: Operator::parse(operator)?,
            value,
        });
        Ok(())
    }
}
