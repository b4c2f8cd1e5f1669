use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;

fn ansi_pattern() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| {
        Regex::new(r"\x1B(?:\][^\x07\x1B]*(?:\x07|\x1B\\)|\[[0-?]*[ -/]*[@-~]|[@-Z\\-_])")
            .expect("static ansi pattern")
    })
}

/// Strip ANSI escape sequences and stray control characters, and
/// normalize line endings to `\n`.
pub fn scrub_escape_codes(text: &str) -> String {
    let stripped = ansi_pattern().replace_all(text, "");
    let normalized = stripped.replace("\r\n", "\n").replace('\r', "");
    normalized
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Text form used by string comparisons: plain strings stay unquoted,
/// everything else is rendered as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Parser results that carry no data are not stored.
pub fn is_empty_result(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.iter().all(is_empty_result),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// `templates/cisco/show_version.ttp` -> `show_version`
pub fn template_stem(template_id: &str) -> String {
    let path = Path::new(template_id);
    if template_id.contains(char::is_whitespace) || path.extension().is_none() {
        return template_id.to_string();
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| template_id.to_string())
}
