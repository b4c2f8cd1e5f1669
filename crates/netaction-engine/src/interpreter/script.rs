use super::Interpreter;
use anyhow::{Context, Result};
use log::{info, warn};
use netaction_core::config::seconds;
use netaction_core::types::{OutputMode, RunScript, Sleep};
use serde_json::{Map, Value};
use tokio::process::Command;

impl Interpreter {
    pub(super) async fn sleep(&mut self, action: &Sleep) -> Result<()> {
        info!("[{}] Sleeping for {}s", self.ctx.device_name, action.seconds);
        tokio::time::sleep(seconds(action.seconds)).await;
        Ok(())
    }

    pub(super) async fn run_script(
        &mut self,
        action: &RunScript,
        scope: &Map<String, Value>,
    ) -> Result<()> {
        let interpreter = self.resolver.resolve(&action.interpreter_path, scope);
        let script = self.resolver.resolve(&action.script_path, scope);
        let args = self.resolver.resolve(&action.args, scope);

        info!("[{}] Running {} {} {}", self.ctx.device_name, interpreter, script, args);
        let output = Command::new(&interpreter)
            .arg(&script)
            .args(args.split_whitespace())
            .output()
            .await
            .with_context(|| format!("failed to start {} {}", interpreter, script))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            warn!("[{}] Script {} exited with {}", self.ctx.device_name, script, output.status);
        }
        self.ctx
            .log
            .event(&format!("Script {} exited with {}", script, output.status))
            .await;

        if let Some(log_file) = &action.log_file {
            let mut transcript = format!("Script output for {}:\n{}", script, stdout);
            if !stderr.is_empty() {
                transcript.push_str(&format!("Script errors:\n{}", stderr));
            }
            self.write_output(log_file, scope, &transcript, OutputMode::Append).await;
        }
        Ok(())
    }
}
