//! Structured-text extraction
//!
//! Turning raw CLI output into data is delegated to a [`TemplateParser`].
//! The bundled [`RegexTemplateParser`] treats a template file as one regular
//! expression with named groups; every match becomes one record.

use anyhow::{anyhow, Context, Result};
use log::debug;
use regex::RegexBuilder;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

pub trait TemplateParser: Send + Sync {
    /// Parse `raw` with the template identified by `template_id`.
    /// An empty result is not an error.
    fn parse(&self, template_id: &str, raw: &str) -> Result<Value>;
}

#[derive(Default)]
pub struct RegexTemplateParser {
    base_dir: Option<PathBuf>,
    cache: Mutex<HashMap<String, regex::Regex>>,
}

impl RegexTemplateParser {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        RegexTemplateParser {
            base_dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn compile(&self, template_id: &str) -> Result<regex::Regex> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(regex) = cache.get(template_id) {
            return Ok(regex.clone());
        }
        let path = match &self.base_dir {
            Some(dir) => dir.join(template_id),
            None => PathBuf::from(template_id),
        };
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read template {}", path.display()))?;
        let regex = RegexBuilder::new(source.trim())
            .multi_line(true)
            .build()
            .map_err(|e| anyhow!("invalid template {}: {}", path.display(), e))?;
        cache.insert(template_id.to_string(), regex.clone());
        Ok(regex)
    }
}

impl TemplateParser for RegexTemplateParser {
    fn parse(&self, template_id: &str, raw: &str) -> Result<Value> {
        let regex = self.compile(template_id)?;
        let names: Vec<&str> = regex.capture_names().flatten().collect();
        let records: Vec<Value> = regex
            .captures_iter(raw)
            .map(|caps| {
                let record: Map<String, Value> = names
                    .iter()
                    .filter_map(|name| {
                        let text = caps.name(name)?.as_str().trim().to_string();
                        Some((name.to_string(), Value::String(text)))
                    })
                    .collect();
                Value::Object(record)
            })
            .collect();
        debug!("Template {} produced {} record(s)", template_id, records.len());
        Ok(Value::Array(records))
    }
}
