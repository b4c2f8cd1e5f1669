//! Variable resolution
//!
//! Substitutes `[% name %]`, `{{ name }}` and the legacy `[{ name }]` markers
//! against a variable map. Double-brace templates are rendered by handlebars,
//! so config templates may use block helpers such as `{{#each}}`.
//! Placeholders whose variable is unknown are left in place verbatim, which
//! lets a document be rendered in several passes. That includes whole
//! `{{#each}}` / `{{#if}}` blocks over a variable that is not known yet.

use crate::query::search;
use anyhow::{anyhow, Result};
use handlebars::Handlebars;
use log::{debug, warn};
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::utils::value_text;

fn percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[%\s*([\w.\-]+)\s*%\]").expect("static percent pattern"))
}

fn loop_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[\{\s*([\w.\-]+)\s*\}\]").expect("static loop tag pattern")
    })
}

fn brace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][\w\-]*(?:\.[\w\-]+)*)\s*\}\}").expect("static brace pattern")
    })
}

fn block_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{~?([#/])\s*([\w\-]+)(?:\s+([^\s}~]+))?[^}]*\}\}")
            .expect("static block tag pattern")
    })
}

fn lookup(variables: &Value, path: &str) -> Option<Value> {
    let mut current = variables;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    (!current.is_null()).then(|| current.clone())
}

/// Block arguments that are not plain variable paths are left to handlebars.
fn block_argument_known(argument: Option<&str>, scope: &Value) -> bool {
    match argument {
        None => true,
        Some(arg) if arg == "this" || arg.starts_with("this.") || arg.starts_with("../") => true,
        Some(arg) if arg.starts_with(['@', '"', '\'', '(']) => true,
        Some(arg) if arg.starts_with(|c: char| c.is_ascii_digit()) => true,
        Some(arg) => lookup(scope, arg).is_some(),
    }
}

/// End offset of the tag closing the block opened just before `from`.
fn block_end(text: &str, from: usize) -> Option<usize> {
    let mut depth = 1usize;
    for caps in block_tag_pattern().captures_iter(&text[from..]) {
        if &caps[1] == "#" {
            depth += 1;
        } else {
            depth -= 1;
            if depth == 0 {
                return caps.get(0).map(|m| from + m.end());
            }
        }
    }
    None
}

fn escape_unknown(text: &str, scope: &Value) -> String {
    brace_pattern()
        .replace_all(text, |caps: &Captures| {
            if lookup(scope, &caps[1]).is_some() {
                caps[0].to_string()
            } else {
                format!("\\{}", &caps[0])
            }
        })
        .into_owned()
}

/// Escape every placeholder handlebars would otherwise blank out. Blocks
/// over a known variable are kept intact, since names inside them refer to
/// the block's own context; blocks over an unknown variable are escaped
/// as a whole.
fn protect_unknown(text: &str, scope: &Value) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(caps) = block_tag_pattern().captures(rest) {
        let Some(tag) = caps.get(0) else { break };
        out.push_str(&escape_unknown(&rest[..tag.start()], scope));
        if &caps[1] == "/" {
            // Stray closing tag; handlebars reports it.
            out.push_str(tag.as_str());
            rest = &rest[tag.end()..];
            continue;
        }
        let Some(end) = block_end(rest, tag.end()) else {
            out.push_str(&rest[tag.start()..]);
            return out;
        };
        let block = &rest[tag.start()..end];
        if block_argument_known(caps.get(3).map(|m| m.as_str()), scope) {
            out.push_str(block);
        } else {
            out.push_str(&block.replace("{{", "\\{{"));
        }
        rest = &rest[end..];
    }
    out.push_str(&escape_unknown(rest, scope));
    out
}

pub struct VariableResolver {
    engine: Handlebars<'static>,
}

impl Default for VariableResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableResolver {
    pub fn new() -> Self {
        let mut engine = Handlebars::new();
        engine.register_escape_fn(handlebars::no_escape);
        engine.set_strict_mode(false);
        VariableResolver { engine }
    }

    /// Substitute every recognised placeholder. Never fails.
    pub fn resolve(&self, text: &str, variables: &Map<String, Value>) -> String {
        let scope = Value::Object(variables.clone());

        let text = loop_tag_pattern().replace_all(text, "{{ $1 }}");
        let text = percent_pattern().replace_all(&text, |caps: &Captures| {
            lookup(&scope, &caps[1])
                .map(|v| value_text(&v))
                .unwrap_or_else(|| caps[0].to_string())
        });

        if !text.contains("{{") {
            return text.into_owned();
        }

        let template = protect_unknown(&text, &scope);

        match self.engine.render_template(&template, &scope) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("Template rendering failed, keeping text as-is: {}", e);
                text.into_owned()
            }
        }
    }

    /// Render a config template, turning `{[ ]}` markers into `{{ }}` first.
    /// Unlike [`resolve`](Self::resolve) a malformed template is an error.
    pub fn render_config(&self, text: &str, variables: &Map<String, Value>) -> Result<String> {
        let normalized = text.replace("{[", "{{").replace("]}", "}}");
        let normalized = loop_tag_pattern().replace_all(&normalized, "{{ $1 }}");
        self.engine
            .render_template(&normalized, &Value::Object(variables.clone()))
            .map_err(|e| anyhow!("failed to render config template: {}", e))
    }

    /// Evaluate `{name: query}` pairs against `context`. Queries that fail
    /// store `null`.
    pub fn resolve_action_vars(
        &self,
        action_vars: &[HashMap<String, String>],
        context: &Value,
    ) -> Map<String, Value> {
        let mut resolved = Map::new();
        for pairs in action_vars {
            for (name, query) in pairs {
                let value = match search(context, query) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("action variable '{}' could not be resolved: {}", name, e);
                        Value::Null
                    }
                };
                debug!("action variable {} = {}", name, value);
                resolved.insert(name.clone(), value);
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Map<String, Value> {
        json!({
            "hostname": "edge-1",
            "vlan": 42,
            "site": {"code": "AMS"},
            "interfaces": ["Gi0/1", "Gi0/2"]
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_percent_and_brace_placeholders() {
        let r = VariableResolver::new();
        assert_eq!(r.resolve("ping [% hostname %]", &vars()), "ping edge-1");
        assert_eq!(r.resolve("vlan {{ vlan }} at {{site.code}}", &vars()), "vlan 42 at AMS");
        assert_eq!(r.resolve("show int [{ hostname }]", &vars()), "show int edge-1");
    }

    #[test]
    fn test_unknown_placeholders_survive() {
        let r = VariableResolver::new();
        assert_eq!(r.resolve("[% missing %] {{ later }}", &vars()), "[% missing %] {{ later }}");
        assert_eq!(r.resolve("{{ hostname }} {{ later }}", &vars()), "edge-1 {{ later }}");
    }

    #[test]
    fn test_block_helpers_and_no_html_escaping() {
        let r = VariableResolver::new();
        let out = r.resolve("{{#each interfaces}}<{{this}}>{{/each}}", &vars());
        assert_eq!(out, "<Gi0/1><Gi0/2>");
        let mut v = vars();
        v.insert("desc".into(), json!("a<b & c"));
        assert_eq!(r.resolve("description {{ desc }}", &v), "description a<b & c");
    }

    #[test]
    fn test_block_helpers_keep_late_bound_placeholders() {
        let r = VariableResolver::new();
        let document = "a: \"{{#each interfaces}}{{this}} {{/each}}\"\n\
                        b: \"show [{ later }] {{ later }} {{ hostname }}\"\n\
                        c: \"{{#each per_device_list}}{{ name }},{{/each}}\"";
        let out = r.resolve(document, &vars());
        assert_eq!(
            out,
            "a: \"Gi0/1 Gi0/2 \"\n\
             b: \"show {{ later }} {{ later }} edge-1\"\n\
             c: \"{{#each per_device_list}}{{ name }},{{/each}}\""
        );

        let mut second = vars();
        second.insert("later".into(), json!("clock"));
        second.insert("per_device_list".into(), json!([{"name": "x"}, {"name": "y"}]));
        assert_eq!(
            r.resolve(&out, &second),
            "a: \"Gi0/1 Gi0/2 \"\nb: \"show clock clock edge-1\"\nc: \"x,y,\""
        );
    }

    #[test]
    fn test_hyphenated_variable_names() {
        let r = VariableResolver::new();
        let mut v = vars();
        v.insert("mgmt-vrf".into(), json!("MGMT"));
        assert_eq!(r.resolve("vrf [% mgmt-vrf %]", &v), "vrf MGMT");
        assert_eq!(r.resolve("[% site.code %]-[% vlan %]", &v), "AMS-42");
    }

    #[test]
    fn test_render_config_markers() {
        let r = VariableResolver::new();
        let out = r.render_config("hostname {[ hostname ]}", &vars()).unwrap();
        assert_eq!(out, "hostname edge-1");
        assert!(r.render_config("{{#if}}", &vars()).is_err());
    }

    #[test]
    fn test_resolve_action_vars() {
        let r = VariableResolver::new();
        let context = json!({"facts": {"os": "ios"}});
        let mut pairs = HashMap::new();
        pairs.insert("os".to_string(), "facts.os".to_string());
        pairs.insert("broken".to_string(), "facts[".to_string());
        let resolved = r.resolve_action_vars(&[pairs], &context);
        assert_eq!(resolved["os"], json!("ios"));
        assert_eq!(resolved["broken"], Value::Null);
    }
}
