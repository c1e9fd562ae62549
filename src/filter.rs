// SPDX-License-Identifier: Apache-2.0

//! Filter condition model
//!
//! A condition is either a structured (operator, operand) pair that can be
//! rendered to a backend-native condition string, or an opaque test closure
//! that only ever runs in-process. The two forms are a tagged variant so the
//! "cannot translate" path is a visible branch, not a runtime surprise.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{QueryEngineResult, QueryError};
use crate::types::{FieldValue, Record, SchemaRef};

/// The closed set of comparison operators translatable to a condition string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Between,
    Contains,
    StartsWith,
    EndsWith,
}

impl Operator {
    /// The fixed symbol used in the rendered condition string
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
            Operator::Between => "BETWEEN",
            Operator::Contains => "CONTAINS",
            Operator::StartsWith => "STARTS WITH",
            Operator::EndsWith => "ENDS WITH",
        }
    }

    /// Whether the rendered form carries an operand segment
    pub fn takes_operand(&self) -> bool {
        !matches!(self, Operator::IsNull | Operator::IsNotNull)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Opaque in-process test over a record
pub type TestFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;

/// The two forms a condition can take
#[derive(Clone)]
pub enum ConditionKind {
    /// Structured operator + operand; the test is derived from the operand
    Operator { op: Operator, operand: FieldValue },
    /// Custom closure; evaluable in-process but never serializable
    Custom(TestFn),
}

impl fmt::Debug for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionKind::Operator { op, operand } => f
                .debug_struct("Operator")
                .field("op", op)
                .field("operand", operand)
                .finish(),
            ConditionKind::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// One field-level test scoped to one schema. Immutable after construction.
#[derive(Debug, Clone)]
pub struct FilterCondition {
    field: String,
    schema: SchemaRef,
    kind: ConditionKind,
}

impl FilterCondition {
    /// Builds a structured condition from an operator and operand.
    ///
    /// For `IsNull`/`IsNotNull` pass `FieldValue::Null`; the operand is
    /// ignored during evaluation and omitted from the rendered string.
    pub fn with_operator(
        schema: SchemaRef,
        field: impl Into<String>,
        op: Operator,
        operand: FieldValue,
    ) -> Self {
        Self {
            field: field.into(),
            schema,
            kind: ConditionKind::Operator { op, operand },
        }
    }

    /// Builds a condition from a custom test closure.
    ///
    /// Such a condition has no backend-translatable form:
    /// [`FilterCondition::to_condition_string`] fails for it.
    pub fn with_test(
        schema: SchemaRef,
        field: impl Into<String>,
        test: impl Fn(&Record) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            field: field.into(),
            schema,
            kind: ConditionKind::Custom(Arc::new(test)),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn kind(&self) -> &ConditionKind {
        &self.kind
    }

    /// The operator, when this is a structured condition
    pub fn operator(&self) -> Option<Operator> {
        match &self.kind {
            ConditionKind::Operator { op, .. } => Some(*op),
            ConditionKind::Custom(_) => None,
        }
    }

    /// True iff this condition was built from an operator and can be
    /// rendered to the fixed condition-string format
    pub fn is_backend_translatable(&self) -> bool {
        matches!(self.kind, ConditionKind::Operator { .. })
    }

    /// Evaluates the condition against a record.
    ///
    /// Type mismatches never panic: an operator applied to operands it
    /// cannot compare evaluates to false. A missing field counts as null.
    pub fn matches(&self, record: &Record) -> bool {
        match &self.kind {
            ConditionKind::Custom(test) => test(record),
            ConditionKind::Operator { op, operand } => {
                let value = record.get(&self.field).unwrap_or(&FieldValue::Null);
                eval_operator(*op, value, operand)
            }
        }
    }

    /// Renders the condition in the fixed format
    /// `<field> <symbol> '<operand>'` (operand omitted for IS NULL /
    /// IS NOT NULL). Fails with [`QueryError::Unsupported`] for custom
    /// test conditions.
    pub fn to_condition_string(&self) -> QueryEngineResult<String> {
        match &self.kind {
            ConditionKind::Custom(_) => Err(QueryError::unsupported(format!(
                "condition on '{}' uses a custom test function and cannot be \
                 rendered to a condition string",
                self.field
            ))),
            ConditionKind::Operator { op, operand } => {
                if op.takes_operand() {
                    Ok(format!("{} {} '{}'", self.field, op.symbol(), operand))
                } else {
                    Ok(format!("{} {}", self.field, op.symbol()))
                }
            }
        }
    }
}

fn eval_operator(op: Operator, value: &FieldValue, operand: &FieldValue) -> bool {
    match op {
        Operator::Eq => value.null_safe_eq(operand),
        Operator::NotEq => !value.null_safe_eq(operand),
        Operator::Gt => ordered(value, operand, |o| o.is_gt()),
        Operator::Gte => ordered(value, operand, |o| o.is_ge()),
        Operator::Lt => ordered(value, operand, |o| o.is_lt()),
        Operator::Lte => ordered(value, operand, |o| o.is_le()),
        Operator::Like => text_pair(value, operand)
            .map(|(v, p)| like_match(v, p))
            .unwrap_or(false),
        Operator::NotLike => text_pair(value, operand)
            .map(|(v, p)| !like_match(v, p))
            .unwrap_or(false),
        Operator::In => match operand {
            FieldValue::Array(items) => items.iter().any(|i| value.null_safe_eq(i)),
            _ => false,
        },
        Operator::NotIn => match operand {
            FieldValue::Array(items) => !items.iter().any(|i| value.null_safe_eq(i)),
            _ => false,
        },
        Operator::IsNull => value.is_null(),
        Operator::IsNotNull => !value.is_null(),
        Operator::Between => match operand {
            FieldValue::Array(bounds) if bounds.len() == 2 => {
                ordered(value, &bounds[0], |o| o.is_ge())
                    && ordered(value, &bounds[1], |o| o.is_le())
            }
            _ => false,
        },
        Operator::Contains => text_pair(value, operand)
            .map(|(v, n)| v.contains(n))
            .unwrap_or(false),
        Operator::StartsWith => text_pair(value, operand)
            .map(|(v, n)| v.starts_with(n))
            .unwrap_or(false),
        Operator::EndsWith => text_pair(value, operand)
            .map(|(v, n)| v.ends_with(n))
            .unwrap_or(false),
    }
}

fn ordered(
    value: &FieldValue,
    operand: &FieldValue,
    pred: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    value.natural_cmp(operand).map(pred).unwrap_or(false)
}

fn text_pair<'a>(value: &'a FieldValue, operand: &'a FieldValue) -> Option<(&'a str, &'a str)> {
    Some((value.as_text()?, operand.as_text()?))
}

/// SQL-style LIKE matching: `%` matches any run of characters, `_` matches
/// exactly one.
fn like_match(value: &str, pattern: &str) -> bool {
    fn rec(v: &[char], p: &[char]) -> bool {
        match p.split_first() {
            None => v.is_empty(),
            Some(('%', rest)) => (0..=v.len()).any(|i| rec(&v[i..], rest)),
            Some(('_', rest)) => !v.is_empty() && rec(&v[1..], rest),
            Some((c, rest)) => v.first() == Some(c) && rec(&v[1..], rest),
        }
    }
    let v: Vec<char> = value.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    rec(&v, &p)
}

/// Per-condition entry in a [`TranslationReport`]
#[derive(Debug, Clone, Serialize)]
pub struct TranslationEntry {
    pub field: String,
    pub schema: SchemaRef,
    pub translatable: bool,
    pub reason: String,
    pub suggestion: Option<String>,
}

/// Diagnostic report over a list of conditions: which can be pushed down
/// to a backend and which must run in-process, with a suggested fix for
/// each custom condition.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationReport {
    pub translatable_count: usize,
    pub custom_count: usize,
    pub entries: Vec<TranslationEntry>,
}

impl TranslationReport {
    pub fn render(&self) -> String {
        let mut out = format!(
            "{} of {} condition(s) are backend-translatable\n",
            self.translatable_count,
            self.translatable_count + self.custom_count
        );
        for entry in &self.entries {
            out.push_str(&format!(
                "  [{}] {}.{}: {}\n",
                if entry.translatable { "ok" } else { "!!" },
                entry.schema,
                entry.field,
                entry.reason
            ));
            if let Some(ref suggestion) = entry.suggestion {
                out.push_str(&format!("       fix: {suggestion}\n"));
            }
        }
        out
    }
}

/// Splits conditions into (translatable, custom) subsets
pub fn partition_translatable(
    conditions: &[FilterCondition],
) -> (Vec<FilterCondition>, Vec<FilterCondition>) {
    conditions
        .iter()
        .cloned()
        .partition(|c| c.is_backend_translatable())
}

/// Builds a diagnostic report for a list of conditions
pub fn translation_report(conditions: &[FilterCondition]) -> TranslationReport {
    let entries: Vec<TranslationEntry> = conditions
        .iter()
        .map(|c| match c.kind() {
            ConditionKind::Operator { op, .. } => TranslationEntry {
                field: c.field().to_string(),
                schema: c.schema().clone(),
                translatable: true,
                reason: format!("operator {} renders to the fixed condition format", op),
                suggestion: None,
            },
            ConditionKind::Custom(_) => TranslationEntry {
                field: c.field().to_string(),
                schema: c.schema().clone(),
                translatable: false,
                reason: "custom test function has no condition-string form".to_string(),
                suggestion: Some(
                    "rebuild the condition from an operator of the closed set \
                     if the test can be expressed as one"
                        .to_string(),
                ),
            },
        })
        .collect();

    let translatable_count = entries.iter().filter(|e| e.translatable).count();
    TranslationReport {
        custom_count: entries.len() - translatable_count,
        translatable_count,
        entries,
    }
}
