//! JMESPath queries over JSON values
//!
//! Conditions, `store_query`, named lists and `action_vars` all evaluate
//! their expressions through [`search`]. A missing key yields null rather
//! than an error; only malformed expressions fail.

use crate::error::QueryError;
use jmespath::{Expression, JmespathError};
use serde_json::Value;

impl From<JmespathError> for QueryError {
    fn from(e: JmespathError) -> Self {
        QueryError {
            query: e.expression.clone(),
            offset: e.offset,
            reason: e.reason.to_string(),
        }
    }
}

/// A compiled query, reusable across documents.
pub struct Query {
    expression: Expression<'static>,
}

impl Query {
    pub fn parse(expr: &str) -> Result<Self, QueryError> {
        Ok(Query {
            expression: jmespath::compile(expr)?,
        })
    }

    pub fn source(&self) -> &str {
        self.expression.as_str()
    }

    pub fn evaluate(&self, data: &Value) -> Result<Value, QueryError> {
        let result = self.expression.search(data)?;
        serde_json::to_value(&*result).map_err(|e| QueryError {
            query: self.source().to_string(),
            offset: 0,
            reason: e.to_string(),
        })
    }
}

/// Compile and evaluate `expr` against `data` in one step.
pub fn search(data: &Value, expr: &str) -> Result<Value, QueryError> {
    Query::parse(expr)?.evaluate(data)
}
