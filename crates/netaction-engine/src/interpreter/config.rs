use super::{Interpreter, LineOutcome};
use crate::session::ExpectPattern;
use anyhow::{bail, Context, Result};
use log::{info, warn};
use netaction_core::condition::{evaluate, loop_condition_permits};
use netaction_core::config::load_variables_file;
use netaction_core::types::{SendConfig, SendConfigLoop};
use serde_json::{Map, Value};
use std::path::Path;

impl Interpreter {
    pub(super) async fn send_config(
        &mut self,
        action: &SendConfig,
        scope: &Map<String, Value>,
    ) -> Result<()> {
        let mut variables = scope.clone();
        if let Some(path) = &action.vars_path {
            let path = self.resolver.resolve(path, scope);
            match load_variables_file(Path::new(&path)) {
                Ok(extra) => variables.extend(extra),
                Err(e) => {
                    warn!("[{}] Could not load config variables: {}", self.ctx.device_name, e);
                    self.ctx.log.event(&format!("Could not load {}: {}", path, e)).await;
                }
            }
        }

        let template = match (&action.config, &action.config_template_path) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => {
                let path = self.resolver.resolve(path, &variables);
                tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read config template {}", path))?
            }
            (None, None) => bail!("send_config needs either config or config_template_path"),
        };
        let rendered = self.resolver.render_config(&template, &variables)?;

        let expect =
            self.expect_pattern(action.expect.as_deref(), action.expect_regex, &variables)?;
        let error_string = action
            .error_string
            .clone()
            .or_else(|| self.ctx.error_string.clone());
        self.send_config_lines(&rendered, &expect, error_string.as_deref())
            .await
    }

    pub(super) async fn send_config_loop(
        &mut self,
        action: &SendConfigLoop,
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
        let error_string = self.ctx.error_string.clone();

        for element in &items {
            let Some(iteration) = self
                .iteration_scope(scope, element, &action.loop_key)
                .await
            else {
                continue;
            };

            if let Some(guard) = &action.condition {
                let mut check = guard.check.clone();
                check.query = self.resolver.resolve(&check.query, &iteration);
                let context = self.cursor.condition_context()?;
                let matched = evaluate(&context, &check).matched;
                if !loop_condition_permits(guard.condition_type, matched) {
                    info!(
                        "[{}] {} condition on '{}' blocks this entry",
                        self.ctx.device_name, guard.condition_type, check.query
                    );
                    continue;
                }
            }

            let rendered = match self.resolver.render_config(&action.config_template, &iteration) {
                Ok(rendered) => rendered,
                Err(e) => {
                    warn!("[{}] {}", self.ctx.device_name, e);
                    self.ctx.log.event(&e.to_string()).await;
                    continue;
                }
            };
            let expect =
                self.expect_pattern(action.expect.as_deref(), action.expect_regex, &iteration)?;
            self.send_config_lines(&rendered, &expect, error_string.as_deref())
                .await?;
            if self.ctx.stop.is_some() {
                break;
            }
        }
        Ok(())
    }

    async fn send_config_lines(
        &mut self,
        config: &str,
        expect: &ExpectPattern,
        error_string: Option<&str>,
    ) -> Result<()> {
        let occurrences = self.ctx.expect_occurrences;
        for line in config.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()) {
            match self.send_line(line, expect, occurrences, error_string).await? {
                LineOutcome::Output(_) => self.pace().await,
                LineOutcome::Failed => continue,
                LineOutcome::Halt => break,
            }
        }
        Ok(())
    }
}
