use super::{Interpreter, LineOutcome};
use anyhow::Result;
use log::{debug, info, warn};
use netaction_core::query::search;
use netaction_core::types::{NamedList, SendCommand, SendCommandLoop};
use netaction_core::utils::is_empty_result;
use serde_json::{Map, Value};

impl Interpreter {
    pub(super) async fn send_command(
        &mut self,
        index: usize,
        action: &SendCommand,
        scope: &Map<String, Value>,
    ) -> Result<()> {
        let command = self.resolver.resolve(&action.command, scope);
        let expect = self.expect_pattern(action.expect.as_deref(), action.expect_regex, scope)?;
        let occurrences = action
            .expect_occurrences
            .unwrap_or(self.ctx.expect_occurrences);
        let error_string = self.ctx.error_string.clone();

        let lines: Vec<String> = if command == "\n" {
            vec![command]
        } else {
            command
                .lines()
                .map(str::trim_end)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut transcript = String::new();
        for line in &lines {
            let output = match self
                .send_line(line, &expect, occurrences, error_string.as_deref())
                .await?
            {
                LineOutcome::Output(output) => output,
                LineOutcome::Failed => continue,
                LineOutcome::Halt => break,
            };
            transcript.push_str(&output);
            transcript.push('\n');

            let stored = self
                .store_output(index, line, &output, action.parse_template.as_deref(), scope)
                .await?;
            if let (Some(data), Some(store_query)) = (stored, &action.store_query) {
                self.apply_store_query(&data, store_query)?;
            }
            self.pace().await;
        }

        if let Some(path) = &action.output_path {
            let mode = action.output_mode.unwrap_or(self.ctx.output_mode);
            self.write_output(path, scope, &transcript, mode).await;
        }
        Ok(())
    }

    pub(super) async fn send_command_loop(
        &mut self,
        index: usize,
        action: &SendCommandLoop,
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
            let command = self.resolver.resolve(&action.command_template, &iteration);
            let expect =
                self.expect_pattern(action.expect.as_deref(), action.expect_regex, &iteration)?;
            let output = match self
                .send_line(
                    &command,
                    &expect,
                    self.ctx.expect_occurrences,
                    error_string.as_deref(),
                )
                .await?
            {
                LineOutcome::Output(output) => output,
                LineOutcome::Failed => continue,
                LineOutcome::Halt => break,
            };

            let stored = self
                .store_output(
                    index,
                    &command,
                    &output,
                    action.parse_template.as_deref(),
                    &iteration,
                )
                .await?;
            if let (Some(list), Some(data)) = (&action.store_as_list, stored) {
                self.append_to_named_list(list, &data)?;
            }
            self.pace().await;
        }
        Ok(())
    }

    /// Store raw text under the command line, or parsed data under the
    /// template id. Returns what was stored.
    async fn store_output(
        &mut self,
        index: usize,
        line: &str,
        output: &str,
        parse_template: Option<&str>,
        scope: &Map<String, Value>,
    ) -> Result<Option<Value>> {
        let Some(template) = parse_template else {
            let raw = Value::String(output.to_string());
            self.cursor.update(line, index, raw.clone())?;
            return Ok(Some(raw));
        };

        let template_id = self.resolver.resolve(template, scope);
        match self.parser.parse(&template_id, output) {
            Ok(parsed) if is_empty_result(&parsed) => {
                info!(
                    "[{}] Template {} found no data for '{}'",
                    self.ctx.device_name, template_id, line
                );
                Ok(None)
            }
            Ok(parsed) => {
                self.cursor.update(&template_id, index, parsed.clone())?;
                Ok(Some(parsed))
            }
            Err(e) => {
                warn!(
                    "[{}] Parsing '{}' with {} failed: {}",
                    self.ctx.device_name, line, template_id, e
                );
                self.ctx
                    .log
                    .event(&format!("Parsing '{}' with {} failed: {}", line, template_id, e))
                    .await;
                Ok(None)
            }
        }
    }

    /// Append `{item_key: result}` to the list variable. Null results are
    /// not appended.
    fn append_to_named_list(&self, list: &NamedList, data: &Value) -> Result<()> {
        let extracted = match search(data, &list.query) {
            Ok(Value::Null) => {
                debug!(
                    "[{}] Query '{}' found nothing for '{}'",
                    self.ctx.device_name, list.query, list.list_name
                );
                return Ok(());
            }
            Ok(value) => value,
            Err(e) => {
                warn!("[{}] Named list query rejected: {}", self.ctx.device_name, e);
                return Ok(());
            }
        };
        let mut entries = match self.cursor.get_variable(&list.list_name)? {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        };
        let mut entry = Map::new();
        entry.insert(list.item_key.clone(), extracted);
        entries.push(Value::Object(entry));
        self.cursor.set_variable(&list.list_name, Value::Array(entries))?;
        Ok(())
    }
}
