use super::Interpreter;
use crate::http::{send_with_retry, HttpRequest};
use anyhow::{anyhow, Result};
use log::{error, info};
use netaction_core::config::seconds;
use netaction_core::types::{RestApiLoop, RestRequest};
use netaction_core::utils::value_text;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

fn bearer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"action_variables\.(\w+)").expect("static bearer pattern"))
}

impl Interpreter {
    pub(super) async fn rest_api(
        &mut self,
        request: &RestRequest,
        scope: &Map<String, Value>,
    ) -> Result<()> {
        self.call(request, scope).await?;
        Ok(())
    }

    pub(super) async fn rest_api_loop(
        &mut self,
        action: &RestApiLoop,
        scope: &Map<String, Value>,
    ) -> Result<()> {
        let items = self.source_list(&action.source_variable)?;
        if items.is_empty() {
            info!(
                "[{}] Nothing to loop over in '{}'",
                self.ctx.device_name, action.source_variable
            );
            return Ok(());
        }

        let mut collected = Vec::new();
        for element in &items {
            let Some(iteration) = self
                .iteration_scope(scope, element, &action.loop_key)
                .await
            else {
                continue;
            };
            if let Some(body) = self.call(&action.request, &iteration).await? {
                collected.push(body);
            }
        }

        if let Some(name) = &action.collect_as {
            info!(
                "[{}] Collected {} response(s) into '{}'",
                self.ctx.device_name, collected.len(), name
            );
            self.cursor.set_variable(name, Value::Array(collected))?;
        }
        Ok(())
    }

    /// One request with retries. Failures are logged and yield `None`.
    async fn call(
        &mut self,
        request: &RestRequest,
        scope: &Map<String, Value>,
    ) -> Result<Option<Value>> {
        let http = self
            .http
            .clone()
            .ok_or_else(|| anyhow!("no HTTP client configured for {}", self.ctx.device_name))?;
        let built = self.build_request(request, scope);

        let result = send_with_retry(
            http.as_ref(),
            &built,
            request.expect_status,
            request.retries,
            self.ctx.http_retry_backoff,
        )
        .await;

        match result {
            Ok(response) => {
                let summary = format!("{} {}", built.method, built.url);
                self.ctx.log.command(&summary, &response.body).await;
                let body = response.body_value();
                if let Some(store_query) = &request.store_query {
                    self.apply_store_query(&body, store_query)?;
                }
                Ok(Some(body))
            }
            Err(e) => {
                error!("[{}] {} {} failed: {}", self.ctx.device_name, built.method, built.url, e);
                self.ctx
                    .log
                    .event(&format!("{} {} failed: {}", built.method, built.url, e))
                    .await;
                Ok(None)
            }
        }
    }

    fn build_request(&self, request: &RestRequest, scope: &Map<String, Value>) -> HttpRequest {
        let headers: HashMap<String, String> = request
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), self.header_value(value, scope)))
            .collect();
        HttpRequest {
            method: request.method.to_uppercase(),
            url: self.resolver.resolve(&request.url, scope),
            headers,
            body: request.body.as_ref().map(|body| self.resolve_value(body, scope)),
            body_type: request.body_type,
            timeout: seconds(request.timeout),
            verify: request.verify,
        }
    }

    /// A header naming `action_variables.<name>` becomes a bearer token.
    fn header_value(&self, value: &str, scope: &Map<String, Value>) -> String {
        if let Some(caps) = bearer_pattern().captures(value) {
            let token = scope
                .get("action_variables")
                .and_then(|vars| vars.get(&caps[1]))
                .filter(|token| !token.is_null());
            if let Some(token) = token {
                return format!("Bearer {}", value_text(token));
            }
        }
        self.resolver.resolve(value, scope)
    }

    fn resolve_value(&self, value: &Value, scope: &Map<String, Value>) -> Value {
        match value {
            Value::String(s) => Value::String(self.resolver.resolve(s, scope)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.resolve_value(v, scope)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v, scope)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}
