//! Condition evaluation module
//!
//! Conditions never fail: malformed queries, missing data and operands that
//! don't parse all degrade to `matched = false` with a log line.

use crate::query::search;
use crate::types::{
    AuditPolicy, AuditResult, CheckType, Condition, ConditionResult, OperatorKind, PolicyKind,
};
use crate::utils::{value_f64, value_text};
use log::{debug, warn};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionOutcome {
    pub matched: bool,
    pub parsed_value: Option<Value>,
}

impl ConditionOutcome {
    fn unmatched() -> Self {
        ConditionOutcome {
            matched: false,
            parsed_value: None,
        }
    }
}

pub fn evaluate(context: &Value, condition: &Condition) -> ConditionOutcome {
    match condition.check_type {
        CheckType::RawLookup => evaluate_raw(context, condition),
        CheckType::StructuredQuery => evaluate_structured(context, condition),
    }
}

fn evaluate_raw(context: &Value, condition: &Condition) -> ConditionOutcome {
    let Some(entries) = context.get(&condition.query) else {
        debug!("No data stored under '{}'", condition.query);
        return ConditionOutcome::unmatched();
    };
    let element = match entries {
        Value::Array(items) => items.get(condition.index),
        Value::Object(map) => map.get(&condition.index.to_string()),
        _ => None,
    };
    let Some(target) = element.and_then(|e| e.get("parsed_output")) else {
        debug!(
            "No parsed_output at '{}'[{}]",
            condition.query, condition.index
        );
        return ConditionOutcome::unmatched();
    };

    let operand = &condition.operator.value;
    let serialized = target.to_string();
    let matched = match condition.operator.kind {
        OperatorKind::IsEqual => target == operand || value_text(target) == value_text(operand),
        OperatorKind::StringIn => serialized.contains(&value_text(operand)),
        OperatorKind::StringNotIn => !serialized.contains(&value_text(operand)),
        numeric => compare_numeric(numeric, target, operand),
    };
    ConditionOutcome {
        matched,
        parsed_value: Some(target.clone()),
    }
}

fn evaluate_structured(context: &Value, condition: &Condition) -> ConditionOutcome {
    let result = match search(context, &condition.query) {
        Ok(value) => value,
        Err(e) => {
            warn!("Condition query rejected: {}", e);
            return ConditionOutcome::unmatched();
        }
    };
    let result = match &condition.key_to_check {
        Some(key) => result.get(key).cloned().unwrap_or(Value::Null),
        None => result,
    };
    if result.is_null() {
        debug!("Query '{}' returned no data", condition.query);
        return ConditionOutcome::unmatched();
    }

    let matched = apply_operator(condition.operator.kind, &result, &condition.operator.value);
    ConditionOutcome {
        matched,
        parsed_value: Some(result),
    }
}

fn apply_operator(kind: OperatorKind, value: &Value, operand: &Value) -> bool {
    match kind {
        OperatorKind::IsEqual => match (value_f64(value), value_f64(operand)) {
            (Some(a), Some(b)) => a == b,
            _ => value_text(value) == value_text(operand),
        },
        OperatorKind::StringIn => value_text(value).contains(&value_text(operand)),
        OperatorKind::StringNotIn => !value_text(value).contains(&value_text(operand)),
        numeric => compare_numeric(numeric, value, operand),
    }
}

fn compare_numeric(kind: OperatorKind, value: &Value, operand: &Value) -> bool {
    let (Some(a), Some(b)) = (value_f64(value), value_f64(operand)) else {
        debug!("Non-numeric operand for {}: {} vs {}", kind, value, operand);
        return false;
    };
    match kind {
        OperatorKind::IsGt => a > b,
        OperatorKind::IsLt => a < b,
        OperatorKind::IsGe => a >= b,
        OperatorKind::IsLe => a <= b,
        OperatorKind::IsEqual => a == b,
        OperatorKind::StringIn | OperatorKind::StringNotIn => false,
    }
}

/// Whether a loop iteration guarded by a `condition_type` check may proceed.
pub fn loop_condition_permits(kind: PolicyKind, matched: bool) -> bool {
    match kind {
        PolicyKind::PassIf | PolicyKind::FailIfNot => matched,
        PolicyKind::PassIfNot | PolicyKind::FailIf => !matched,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyEvaluation {
    pub results: Vec<ConditionResult>,
    pub overall: AuditResult,
    /// Set when a `fail_if`/`fail_if_not` entry ended evaluation early.
    pub short_circuited: bool,
}

/// Evaluate an audit policy against each context in turn.
///
/// `pass_if` entries must all match and `pass_if_not` entries must all miss.
/// A matching `fail_if` or a missing `fail_if_not` fails the policy at once and
/// nothing after it is evaluated, including later contexts.
pub fn evaluate_policy(policy: &AuditPolicy, contexts: &[Value]) -> PolicyEvaluation {
    let mut results = Vec::new();
    let mut passed = true;
    let mut short_circuited = false;

    'contexts: for context in contexts {
        for (kind, conditions) in policy.groups() {
            for condition in conditions {
                let outcome = evaluate(context, condition);
                let matched = outcome.matched;
                results.push(ConditionResult {
                    condition_kind: kind,
                    name: condition.name.clone(),
                    matched,
                    query: condition.query.clone(),
                    parsed_value: outcome.parsed_value,
                });

                match kind {
                    PolicyKind::PassIf if !matched => passed = false,
                    PolicyKind::PassIfNot if matched => passed = false,
                    PolicyKind::FailIf if matched => {
                        short_circuited = true;
                        break 'contexts;
                    }
                    PolicyKind::FailIfNot if !matched => {
                        short_circuited = true;
                        break 'contexts;
                    }
                    _ => {}
                }
            }
        }
    }

    let overall = if passed && !short_circuited {
        AuditResult::Passed
    } else {
        AuditResult::Failed
    };
    PolicyEvaluation {
        results,
        overall,
        short_circuited,
    }
}
