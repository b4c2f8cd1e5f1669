use crate::error::{ConfigError, CredentialError};
use crate::resolver::VariableResolver;
use crate::types::{ActionRecord, OutputMode};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Run-wide knobs. Times are seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub error_string: Option<String>,
    pub output_path: PathBuf,
    pub output_mode: OutputMode,
    pub prompt_count_limit: usize,
    pub inter_command_delay: f64,
    pub read_timeout: f64,
    pub connect_timeout: f64,
    pub max_polls: usize,
    pub expect_occurrences: usize,
    pub default_expect: String,
    pub scrub_escape_codes: bool,
    pub max_retries: u32,
    pub retry_interval: f64,
    pub http_retry_backoff: f64,
    pub log_dir: PathBuf,
    pub concurrency: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            error_string: None,
            output_path: PathBuf::from("./output"),
            output_mode: OutputMode::Overwrite,
            prompt_count_limit: 100,
            inter_command_delay: 1.0,
            read_timeout: 10.0,
            connect_timeout: 10.0,
            max_polls: 0,
            expect_occurrences: 1,
            default_expect: "#".to_string(),
            scrub_escape_codes: true,
            max_retries: 3,
            retry_interval: 5.0,
            http_retry_backoff: 2.0,
            log_dir: PathBuf::from("./log"),
            concurrency: 4,
        }
    }
}

pub fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

impl EngineSettings {
    pub fn read_timeout(&self) -> Duration {
        seconds(self.read_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        seconds(self.connect_timeout)
    }

    pub fn inter_command_delay(&self) -> Duration {
        seconds(self.inter_command_delay)
    }

    pub fn retry_interval(&self) -> Duration {
        seconds(self.retry_interval)
    }

    pub fn http_retry_backoff(&self) -> Duration {
        seconds(self.http_retry_backoff)
    }

    /// Driver-level values take precedence over run-level ones.
    pub fn apply_driver(&mut self, driver: &DriverDefinition) {
        if driver.error_string.is_some() {
            self.error_string = driver.error_string.clone();
        }
        if let Some(path) = &driver.output_path {
            self.output_path = PathBuf::from(path);
        }
        if let Some(mode) = driver.output_mode {
            self.output_mode = mode;
        }
        if let Some(limit) = driver.prompt_count {
            self.prompt_count_limit = limit;
        }
    }
}

pub fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Load settings from a YAML or JSON file (chosen by extension).
pub fn load_settings(path: &Path) -> Result<EngineSettings, ConfigError> {
    let content = read_file(path)?;
    let settings = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };
    Ok(settings)
}

/// Load a YAML mapping of variables.
pub fn load_variables_file(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let content = read_file(path)?;
    match serde_yaml::from_str::<Value>(&content)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ConfigError::Invalid(format!(
            "variables file {} must contain a mapping, found {}",
            path.display(),
            other
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverDefinition {
    #[serde(default)]
    pub error_string: Option<String>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub output_mode: Option<OutputMode>,
    #[serde(default)]
    pub prompt_count: Option<usize>,
    #[serde(default)]
    pub actions: Vec<ActionRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverDocument {
    pub drivers: HashMap<String, DriverDefinition>,
}

/// Render the action document with `variables` and pick `driver_name`.
///
/// Placeholders that can't be resolved yet stay in the document and are
/// resolved again per action at run time.
pub fn load_driver(
    document: &str,
    driver_name: &str,
    variables: &Map<String, Value>,
    resolver: &VariableResolver,
) -> Result<DriverDefinition, ConfigError> {
    let rendered = resolver.resolve(document, variables);
    let mut parsed: DriverDocument = serde_yaml::from_str(&rendered)?;
    debug!(
        "Loaded action document with drivers: {:?}",
        parsed.drivers.keys().collect::<Vec<_>>()
    );
    parsed
        .drivers
        .remove(driver_name)
        .ok_or_else(|| ConfigError::UnknownDriver(driver_name.to_string()))
}

pub fn load_driver_file(
    path: &Path,
    driver_name: &str,
    variables: &Map<String, Value>,
    resolver: &VariableResolver,
) -> Result<DriverDefinition, ConfigError> {
    load_driver(&read_file(path)?, driver_name, variables, resolver)
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where a device session connects to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTarget {
    pub name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

pub trait SecretResolver: Send + Sync {
    fn is_resolvable(&self, key: &str) -> bool;
    fn resolve(&self, key: &str) -> Result<String, CredentialError>;
}

/// External key-backed decryption of stored secrets.
pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, blob: &str) -> Result<String, CredentialError>;
}

pub struct EnvVarResolver;

pub struct CredentialResolver {
    credentials: HashMap<String, String>,
}

impl CredentialResolver {
    pub fn new(credentials: HashMap<String, String>) -> Self {
        CredentialResolver { credentials }
    }
}

pub struct EncryptedSecretResolver {
    decryptor: Option<Arc<dyn SecretDecryptor>>,
}

const ENCRYPTED_PREFIX: &str = "enc:";

impl SecretResolver for EnvVarResolver {
    fn is_resolvable(&self, key: &str) -> bool {
        key.starts_with("ENV_") || (key.starts_with("${") && key.ends_with('}'))
    }

    fn resolve(&self, key: &str) -> Result<String, CredentialError> {
        let env_key = match key.strip_prefix("ENV_") {
            Some(rest) => rest,
            None => &key[2..key.len() - 1],
        };
        debug!("Looking up environment variable: {}", env_key);
        env::var(env_key).map_err(|_| CredentialError::MissingEnv(env_key.to_string()))
    }
}

impl SecretResolver for CredentialResolver {
    fn is_resolvable(&self, key: &str) -> bool {
        key.starts_with("CREDENTIAL_")
    }

    fn resolve(&self, key: &str) -> Result<String, CredentialError> {
        let credential_key = &key["CREDENTIAL_".len()..];
        debug!("Looking up credential: {}", credential_key);
        self.credentials
            .get(credential_key)
            .cloned()
            .ok_or_else(|| CredentialError::MissingCredential(credential_key.to_string()))
    }
}

impl SecretResolver for EncryptedSecretResolver {
    fn is_resolvable(&self, key: &str) -> bool {
        key.starts_with(ENCRYPTED_PREFIX)
    }

    fn resolve(&self, key: &str) -> Result<String, CredentialError> {
        let decryptor = self.decryptor.as_ref().ok_or(CredentialError::NoDecryptor)?;
        decryptor.decrypt(&key[ENCRYPTED_PREFIX.len()..])
    }
}

/// Resolves credential fields that are references rather than plaintext.
pub struct CredentialProvider {
    resolvers: Vec<Arc<dyn SecretResolver>>,
}

impl Default for CredentialProvider {
    fn default() -> Self {
        Self::new(HashMap::new(), None)
    }
}

impl CredentialProvider {
    pub fn new(
        credentials: HashMap<String, String>,
        decryptor: Option<Arc<dyn SecretDecryptor>>,
    ) -> Self {
        CredentialProvider {
            resolvers: vec![
                Arc::new(EnvVarResolver),
                Arc::new(CredentialResolver::new(credentials)),
                Arc::new(EncryptedSecretResolver { decryptor }),
            ],
        }
    }

    pub fn resolve(&self, value: &str) -> Result<String, CredentialError> {
        for resolver in &self.resolvers {
            if resolver.is_resolvable(value) {
                return resolver.resolve(value);
            }
        }
        Ok(value.to_string())
    }

    pub fn resolve_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<Credentials, CredentialError> {
        Ok(Credentials {
            username: self.resolve(&credentials.username)?,
            password: self.resolve(&credentials.password)?,
        })
    }
}
