use super::Interpreter;
use anyhow::Result;
use log::{debug, info, warn};
use netaction_core::query::search;
use netaction_core::types::{
    Destination, DumpScope, DumpStore, OutputFormat, OutputMode, PrintAudit, StoreQuery,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

fn render<T: Serialize>(format: OutputFormat, value: &T) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    })
}

fn extension(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Json => "json",
        OutputFormat::Yaml => "yaml",
    }
}

impl Interpreter {
    pub(super) async fn print_audit(
        &mut self,
        action: &PrintAudit,
        scope: &Map<String, Value>,
    ) -> Result<()> {
        let reports = self.cursor.get_audit_reports()?;
        let text = render(action.format, &reports)?;
        let default_name = format!("{}_audit.{}", self.ctx.device_name, extension(action.format));
        self.emit(
            &text,
            action.destination,
            action.output_file_path.as_deref(),
            &default_name,
            OutputMode::Overwrite,
            scope,
        )
        .await;
        Ok(())
    }

    pub(super) async fn dump_store(
        &mut self,
        action: &DumpStore,
        scope: &Map<String, Value>,
    ) -> Result<()> {
        let value = match action.scope {
            DumpScope::Global => self.cursor.store().snapshot_value(),
            DumpScope::Device => self.cursor.get_device_data()?.to_value(),
        };
        let text = render(action.format, &value)?;
        let default_name = format!(
            "{}_datastore.{}",
            self.ctx.device_name,
            extension(action.format)
        );
        self.emit(
            &text,
            action.destination,
            action.output_file_path.as_deref(),
            &default_name,
            action.output_mode,
            scope,
        )
        .await;
        Ok(())
    }

    async fn emit(
        &mut self,
        text: &str,
        destination: Destination,
        path: Option<&str>,
        default_name: &str,
        mode: OutputMode,
        scope: &Map<String, Value>,
    ) {
        if destination.to_console() {
            println!("{}", text);
        }
        if destination.to_file() {
            let path = match path {
                Some(path) => path.to_string(),
                None => self.ctx.output_path.join(default_name).display().to_string(),
            };
            self.write_output(&path, scope, text, mode).await;
        }
    }

    /// Write `content` to the rendered `path_template`, creating parent
    /// directories. Failures are logged.
    pub(super) async fn write_output(
        &mut self,
        path_template: &str,
        scope: &Map<String, Value>,
        content: &str,
        mode: OutputMode,
    ) {
        let path = PathBuf::from(self.resolver.resolve(path_template, scope));
        let written = async {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).await?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(mode == OutputMode::Append)
                .truncate(mode == OutputMode::Overwrite)
                .open(&path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await
        }
        .await;

        match written {
            Ok(()) => info!("[{}] Output written to {}", self.ctx.device_name, path.display()),
            Err(e) => {
                warn!("[{}] Could not write {}: {}", self.ctx.device_name, path.display(), e);
                self.ctx
                    .log
                    .event(&format!("Could not write {}: {}", path.display(), e))
                    .await;
            }
        }
    }

    /// Extract a value from `data` into a device variable. A null result
    /// leaves any earlier value in place.
    pub(super) fn apply_store_query(&self, data: &Value, store_query: &StoreQuery) -> Result<()> {
        match search(data, &store_query.query) {
            Ok(Value::Null) => debug!(
                "[{}] Query '{}' found nothing, '{}' left unchanged",
                self.ctx.device_name, store_query.query, store_query.variable_name
            ),
            Ok(value) => {
                info!(
                    "[{}] Stored '{}' into variable '{}'",
                    self.ctx.device_name, store_query.query, store_query.variable_name
                );
                self.cursor.set_variable(&store_query.variable_name, value)?;
            }
            Err(e) => warn!("[{}] store_query rejected: {}", self.ctx.device_name, e),
        }
        Ok(())
    }
}
