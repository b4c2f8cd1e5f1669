use super::Interpreter;
use anyhow::Result;
use log::info;
use netaction_core::condition::{evaluate_policy, PolicyEvaluation};
use netaction_core::types::{ActionRecord, AuditLoop, AuditPolicy, AuditReportEntry};

impl Interpreter {
    pub(super) async fn audit(
        &mut self,
        record: &ActionRecord,
        policy: &AuditPolicy,
    ) -> Result<()> {
        let context = self.cursor.condition_context()?;
        let evaluation = evaluate_policy(policy, std::slice::from_ref(&context));
        self.record_audit(record, policy, evaluation).await
    }

    pub(super) async fn audit_loop(
        &mut self,
        record: &ActionRecord,
        action: &AuditLoop,
    ) -> Result<()> {
        let entries = self.source_list(&action.source_variable)?;
        if entries.is_empty() {
            info!(
                "[{}] No entries in '{}' to audit",
                self.ctx.device_name, action.source_variable
            );
            return Ok(());
        }
        let evaluation = evaluate_policy(&action.policy, &entries);
        self.record_audit(record, &action.policy, evaluation).await
    }

    async fn record_audit(
        &mut self,
        record: &ActionRecord,
        policy: &AuditPolicy,
        evaluation: PolicyEvaluation,
    ) -> Result<()> {
        let entry = AuditReportEntry {
            policy_name: policy.policy_name.clone(),
            display_name: record
                .display_name
                .clone()
                .unwrap_or_else(|| policy.policy_name.clone()),
            device_name: self.ctx.device_name.clone(),
            per_condition_results: evaluation.results,
            overall_result: evaluation.overall,
        };
        let summary = format!(
            "Audit '{}': {} ({} condition(s) evaluated{})",
            entry.policy_name,
            entry.overall_result,
            entry.per_condition_results.len(),
            if evaluation.short_circuited { ", stopped early" } else { "" }
        );
        info!("[{}] {}", self.ctx.device_name, summary);
        self.ctx.log.event(&summary).await;
        self.cursor.add_audit_report(entry)?;
        Ok(())
    }
}
