//! Action document model
//!
//! Every record of a driver's action list deserializes into an [`ActionRecord`],
//! a closed tagged variant keyed by the `action` field. Unknown kinds are
//! rejected when the document is loaded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use strum::{Display, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckType {
    #[serde(alias = "raw_string")]
    RawLookup,
    #[serde(alias = "jmespath")]
    StructuredQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperatorKind {
    IsEqual,
    StringIn,
    StringNotIn,
    IsGt,
    IsLt,
    IsGe,
    IsLe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    #[serde(rename = "type")]
    pub kind: OperatorKind,
    #[serde(default)]
    pub value: Value,
}

/// A single check over a data context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub check_type: CheckType,
    #[serde(default, alias = "template")]
    pub query: String,
    #[serde(default)]
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_to_check: Option<String>,
    pub operator: Operator,
}

impl Condition {
    pub fn structured(query: impl Into<String>, kind: OperatorKind, value: Value) -> Self {
        Condition {
            name: None,
            check_type: CheckType::StructuredQuery,
            query: query.into(),
            index: 0,
            key_to_check: None,
            operator: Operator { kind, value },
        }
    }

    pub fn raw(
        template_id: impl Into<String>,
        index: usize,
        kind: OperatorKind,
        value: Value,
    ) -> Self {
        Condition {
            name: None,
            check_type: CheckType::RawLookup,
            query: template_id.into(),
            index,
            key_to_check: None,
            operator: Operator { kind, value },
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key_to_check = Some(key.into());
        self
    }
}

/// The four condition groups of an audit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyKind {
    PassIf,
    PassIfNot,
    FailIf,
    FailIfNot,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditPolicy {
    pub policy_name: String,
    #[serde(default)]
    pub pass_if: Vec<Condition>,
    #[serde(default)]
    pub pass_if_not: Vec<Condition>,
    #[serde(default)]
    pub fail_if: Vec<Condition>,
    #[serde(default)]
    pub fail_if_not: Vec<Condition>,
}

impl AuditPolicy {
    /// Groups in evaluation order.
    pub fn groups(&self) -> [(PolicyKind, &[Condition]); 4] {
        [
            (PolicyKind::PassIf, &self.pass_if),
            (PolicyKind::PassIfNot, &self.pass_if_not),
            (PolicyKind::FailIf, &self.fail_if),
            (PolicyKind::FailIfNot, &self.fail_if_not),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreQuery {
    pub query: String,
    pub variable_name: String,
}

/// Appends `{item_key: <query result>}` to the list variable `list_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedList {
    pub list_name: String,
    pub item_key: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopCondition {
    pub condition_type: PolicyKind,
    pub check: Condition,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutputMode {
    #[default]
    Overwrite,
    Append,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Destination {
    #[default]
    Console,
    File,
    Both,
}

impl Destination {
    pub fn to_console(&self) -> bool {
        matches!(self, Destination::Console | Destination::Both)
    }

    pub fn to_file(&self) -> bool {
        matches!(self, Destination::File | Destination::Both)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpScope {
    #[default]
    Global,
    Device,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyType {
    #[default]
    Json,
    Form,
    Text,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

fn default_retries() -> u32 {
    1
}

fn default_http_timeout() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

fn default_sleep() -> f64 {
    1.0
}

/// Fields shared by `rest_api` and `rest_api_loop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default)]
    pub body_type: BodyType,
    #[serde(default = "default_status", alias = "expect")]
    pub expect_status: u16,
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout: f64,
    #[serde(default = "default_true")]
    pub verify: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_query: Option<StoreQuery>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sleep {
    #[serde(default = "default_sleep")]
    pub seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunScript {
    pub interpreter_path: String,
    pub script_path: String,
    /// Whitespace-separated argument string.
    #[serde(default)]
    pub args: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendCommand {
    #[serde(alias = "text")]
    pub command: String,
    #[serde(default)]
    pub expect: Option<String>,
    #[serde(default)]
    pub expect_regex: bool,
    #[serde(default)]
    pub expect_occurrences: Option<usize>,
    #[serde(default)]
    pub store_query: Option<StoreQuery>,
    #[serde(default, alias = "ttp_path")]
    pub parse_template: Option<String>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub output_mode: Option<OutputMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendCommandLoop {
    #[serde(alias = "variable_name")]
    pub source_variable: String,
    #[serde(alias = "key_to_loop")]
    pub loop_key: String,
    pub command_template: String,
    #[serde(default)]
    pub expect: Option<String>,
    #[serde(default)]
    pub expect_regex: bool,
    #[serde(default, alias = "ttp_path")]
    pub parse_template: Option<String>,
    #[serde(default, alias = "use_named_list")]
    pub store_as_list: Option<NamedList>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendConfig {
    #[serde(default)]
    pub config: Option<String>,
    #[serde(default)]
    pub config_template_path: Option<String>,
    #[serde(default, alias = "variables_path")]
    pub vars_path: Option<String>,
    #[serde(default)]
    pub error_string: Option<String>,
    #[serde(default)]
    pub expect: Option<String>,
    #[serde(default)]
    pub expect_regex: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendConfigLoop {
    #[serde(alias = "variable_name")]
    pub source_variable: String,
    #[serde(alias = "key_to_loop")]
    pub loop_key: String,
    pub config_template: String,
    #[serde(default, alias = "use_condition")]
    pub condition: Option<LoopCondition>,
    #[serde(default)]
    pub expect: Option<String>,
    #[serde(default)]
    pub expect_regex: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestApiLoop {
    #[serde(alias = "variable_name")]
    pub source_variable: String,
    #[serde(alias = "key_to_loop")]
    pub loop_key: String,
    /// List variable receiving every successful response body.
    #[serde(default)]
    pub collect_as: Option<String>,
    #[serde(flatten)]
    pub request: RestRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLoop {
    #[serde(alias = "variable_name")]
    pub source_variable: String,
    #[serde(flatten)]
    pub policy: AuditPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintAudit {
    #[serde(default, alias = "output_format")]
    pub format: OutputFormat,
    #[serde(default, alias = "output_type")]
    pub destination: Destination,
    #[serde(default)]
    pub output_file_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpStore {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default, alias = "output_as")]
    pub destination: Destination,
    #[serde(default)]
    pub output_file_path: Option<String>,
    #[serde(default)]
    pub output_mode: OutputMode,
    #[serde(default)]
    pub scope: DumpScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "action", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Sleep(Sleep),
    #[serde(alias = "python_script")]
    RunScript(RunScript),
    SendCommand(SendCommand),
    SendCommandLoop(SendCommandLoop),
    SendConfig(SendConfig),
    SendConfigLoop(SendConfigLoop),
    RestApi(RestRequest),
    RestApiLoop(RestApiLoop),
    Audit(AuditPolicy),
    AuditLoop(AuditLoop),
    PrintAudit(PrintAudit),
    #[serde(alias = "dump_datastore")]
    DumpStore(DumpStore),
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_if: Option<Condition>,
    /// `{variable: query}` pairs evaluated before the action runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_vars: Vec<HashMap<String, String>>,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl ActionRecord {
    pub fn new(kind: ActionKind) -> Self {
        ActionRecord {
            display_name: None,
            run_if: None,
            action_vars: Vec::new(),
            kind,
        }
    }

    pub fn with_run_if(mut self, condition: Condition) -> Self {
        self.run_if = Some(condition);
        self
    }

    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.kind.name().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum AuditResult {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionResult {
    pub condition_kind: PolicyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub matched: bool,
    pub query: String,
    pub parsed_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReportEntry {
    pub policy_name: String,
    pub display_name: String,
    pub device_name: String,
    pub per_condition_results: Vec<ConditionResult>,
    pub overall_result: AuditResult,
}
