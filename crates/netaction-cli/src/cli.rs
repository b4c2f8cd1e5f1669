//! Command routing for `netaction run` and `netaction validate`.

use crate::error::CliError;
use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{info, warn};
use netaction_core::config::{
    load_driver, load_settings, load_variables_file, read_file, CredentialProvider, Credentials,
    DeviceTarget, DriverDefinition, EngineSettings,
};
use netaction_core::resolver::VariableResolver;
use netaction_core::store::GlobalStore;
use netaction_engine::http::ReqwestClient;
use netaction_engine::parser::RegexTemplateParser;
use netaction_engine::runner::{AutomationRunner, DeviceJob, RunSummary};
use netaction_engine::session::SshConnector;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "netaction", version, about = "Run driver action lists against network devices")]
pub struct NetactionArgs {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Execute a driver against every device in a device list")]
    Run(RunArgs),
    #[command(about = "Render and parse a driver without connecting to anything")]
    Validate(DriverArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DriverArgs {
    #[arg(short, long, value_name = "FILE", help = "YAML document containing the drivers")]
    pub driver: PathBuf,

    #[arg(short = 'n', long, value_name = "NAME", help = "Driver to use from the document")]
    pub driver_name: String,

    #[arg(long, value_name = "FILE", help = "YAML or JSON variables used to render the driver")]
    pub vars: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub driver: DriverArgs,

    #[arg(long, value_name = "FILE", help = "YAML list of devices to run against")]
    pub devices: PathBuf,

    #[arg(short, long, value_name = "FILE", help = "Engine settings file (YAML or JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Maximum number of lines sent to one device")]
    pub prompt_count: Option<usize>,

    #[arg(long, value_name = "SECONDS", help = "Read timeout per command")]
    pub timeout: Option<f64>,

    #[arg(long, value_name = "SECONDS", help = "Pause between commands")]
    pub inter_command_time: Option<f64>,

    #[arg(long, help = "Number of devices processed at once")]
    pub concurrency: Option<usize>,

    #[arg(long, value_name = "DIR", help = "Directory for per-device logs")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Directory for dumps and reports")]
    pub output_path: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Directory parse templates are read from")]
    pub template_dir: Option<PathBuf>,

    #[arg(
        long = "credential",
        value_name = "KEY=VALUE",
        action = ArgAction::Append,
        help = "Value for a CREDENTIAL_<KEY> reference"
    )]
    pub credentials: Vec<String>,

    #[arg(long, help = "Print the run summary as JSON")]
    pub json: bool,
}

/// One entry of the device list file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub hostname: String,
    #[serde(default)]
    pub mgmt_ip: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    /// Anything else is handed to the driver as a variable.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceEntry {
    pub fn target(&self) -> DeviceTarget {
        DeviceTarget {
            name: self.hostname.clone(),
            host: self.mgmt_ip.clone().unwrap_or_else(|| self.hostname.clone()),
            port: self.port.unwrap_or(22),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// Base variables overlaid with this device's own fields.
    pub fn variables(&self, base: &Map<String, Value>) -> Map<String, Value> {
        let mut variables = base.clone();
        variables.extend(self.extra.clone());
        variables.insert("hostname".into(), json!(self.hostname));
        if let Some(ip) = &self.mgmt_ip {
            variables.insert("mgmt_ip".into(), json!(ip));
        }
        variables
    }
}

pub fn parse_key_value_pair(pair: &str) -> Option<(String, String)> {
    let (key, value) = pair.split_once('=')?;
    Some((key.to_string(), value.to_string()))
}

pub fn load_devices(path: &Path) -> Result<Vec<DeviceEntry>, CliError> {
    let content = read_file(path)?;
    let devices: Vec<DeviceEntry> = serde_yaml::from_str(&content)
        .map_err(|e| CliError::DeviceList(format!("{}: {}", path.display(), e)))?;
    if devices.is_empty() {
        return Err(CliError::DeviceList(format!("{} lists no devices", path.display())));
    }

    let mut seen = HashSet::new();
    for device in &devices {
        if !seen.insert(device.hostname.as_str()) {
            return Err(CliError::DeviceList(format!(
                "hostname '{}' appears more than once",
                device.hostname
            )));
        }
    }
    Ok(devices)
}

pub fn apply_overrides(settings: &mut EngineSettings, args: &RunArgs) {
    if let Some(limit) = args.prompt_count {
        settings.prompt_count_limit = limit;
    }
    if let Some(timeout) = args.timeout {
        settings.read_timeout = timeout;
    }
    if let Some(delay) = args.inter_command_time {
        settings.inter_command_delay = delay;
    }
    if let Some(concurrency) = args.concurrency {
        settings.concurrency = concurrency;
    }
    if let Some(dir) = &args.log_dir {
        settings.log_dir = dir.clone();
    }
    if let Some(dir) = &args.output_path {
        settings.output_path = dir.clone();
    }
}

fn base_variables(args: &DriverArgs) -> Result<Map<String, Value>, CliError> {
    match &args.vars {
        Some(path) => Ok(load_variables_file(path)?),
        None => Ok(Map::new()),
    }
}

/// Render the driver once per device so device fields reach every placeholder.
pub fn build_jobs(
    document: &str,
    driver_name: &str,
    devices: &[DeviceEntry],
    base: &Map<String, Value>,
    resolver: &VariableResolver,
) -> Result<Vec<DeviceJob>, CliError> {
    devices
        .iter()
        .map(|device| {
            let variables = device.variables(base);
            let driver = load_driver(document, driver_name, &variables, resolver)?;
            Ok(DeviceJob {
                target: device.target(),
                credentials: device.credentials(),
                variables,
                actions: driver.actions,
            })
        })
        .collect()
}

/// Load the driver with the base variables only.
pub fn validate(args: &DriverArgs) -> Result<DriverDefinition, CliError> {
    let document = read_file(&args.driver)?;
    let base = base_variables(args)?;
    let driver = load_driver(&document, &args.driver_name, &base, &VariableResolver::new())?;
    if driver.actions.is_empty() {
        return Err(CliError::Validation(format!(
            "driver '{}' has no actions",
            args.driver_name
        )));
    }
    Ok(driver)
}

fn print_summary(summary: &RunSummary, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary.reports)?);
        return Ok(());
    }
    for report in &summary.reports {
        println!(
            "{:<24} {:<40} executed={} skipped={}",
            report.device_name,
            format!("{:?}", report.state),
            report.executed,
            report.skipped
        );
    }
    println!(
        "{} device(s) processed, {} failed",
        summary.processed(),
        summary.failed()
    );
    Ok(())
}

async fn run_devices(args: RunArgs) -> Result<()> {
    let run_id = Uuid::new_v4();
    info!("Starting run {}", run_id);

    let mut settings = match &args.config {
        Some(path) => load_settings(path)?,
        None => EngineSettings::default(),
    };
    let driver = validate(&args.driver)?;
    settings.apply_driver(&driver);
    apply_overrides(&mut settings, &args);

    let credentials = args
        .credentials
        .iter()
        .map(|pair| {
            parse_key_value_pair(pair)
                .ok_or_else(|| CliError::ArgParse(format!("expected KEY=VALUE, got '{}'", pair)))
        })
        .collect::<Result<HashMap<_, _>, _>>()?;

    let document = read_file(&args.driver.driver)?;
    let devices = load_devices(&args.devices)?;
    let base = base_variables(&args.driver)?;
    let jobs = build_jobs(
        &document,
        &args.driver.driver_name,
        &devices,
        &base,
        &VariableResolver::new(),
    )?;

    let runner = Arc::new(
        AutomationRunner::new(settings, Arc::new(GlobalStore::new()), Arc::new(SshConnector::new()))
            .with_credentials(CredentialProvider::new(credentials, None))
            .with_parser(Arc::new(RegexTemplateParser::new(args.template_dir.clone())))
            .with_http(Arc::new(ReqwestClient::new()?)),
    );

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, devices stop after their current action");
            cancel.cancel();
        }
    });

    let summary = runner.run(jobs).await;
    info!("Run {} finished", run_id);
    print_summary(&summary, args.json)?;
    if summary.failed() > 0 {
        anyhow::bail!(
            "{} of {} device(s) did not complete",
            summary.failed(),
            summary.processed()
        );
    }
    Ok(())
}

pub async fn execute(args: NetactionArgs) -> Result<()> {
    match args.command {
        Commands::Run(run) => run_devices(run).await,
        Commands::Validate(driver) => {
            let definition = validate(&driver)?;
            println!(
                "Driver '{}' is valid: {} action(s)",
                driver.driver_name,
                definition.actions.len()
            );
            for (index, action) in definition.actions.iter().enumerate() {
                println!("{:>4}  {}", index, action.label());
            }
            Ok(())
        }
    }
}

pub async fn run() -> Result<()> {
    execute(NetactionArgs::parse()).await
}
