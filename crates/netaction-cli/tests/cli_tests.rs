use clap::Parser;
use netaction_cli::cli::{
    apply_overrides, build_jobs, load_devices, parse_key_value_pair, validate, Commands, DriverArgs,
    NetactionArgs,
};
use netaction_cli::error::CliError;
use netaction_core::config::EngineSettings;
use netaction_core::error::ConfigError;
use netaction_core::resolver::VariableResolver;
use netaction_core::types::ActionKind;
use serde_json::{json, Map};
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

const DRIVER: &str = r#"
drivers:
  ios:
    error_string: "% Invalid"
    actions:
      - action: send_command
        command: "show run | include hostname {{ hostname }}"
      - action: send_command
        command: "ping {{ mgmt_ip }}"
"#;

fn temp_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_parse_key_value_pair() {
    assert_eq!(parse_key_value_pair("k=v"), Some(("k".into(), "v".into())));
    assert_eq!(parse_key_value_pair("k=a=b"), Some(("k".into(), "a=b".into())));
    assert_eq!(parse_key_value_pair("invalid"), None);
}

#[test]
fn test_run_arguments_parse() {
    let args = NetactionArgs::try_parse_from([
        "netaction",
        "run",
        "--driver",
        "drivers.yaml",
        "--driver-name",
        "ios",
        "--devices",
        "devices.yaml",
        "--prompt-count",
        "20",
        "--timeout",
        "2.5",
        "--credential",
        "LAB=secret",
        "--credential",
        "CORE=other",
    ])
    .unwrap();

    let Commands::Run(run) = args.command else {
        panic!("expected run");
    };
    assert_eq!(run.driver.driver, PathBuf::from("drivers.yaml"));
    assert_eq!(run.driver.driver_name, "ios");
    assert_eq!(run.credentials, vec!["LAB=secret".to_string(), "CORE=other".to_string()]);

    let mut settings = EngineSettings::default();
    apply_overrides(&mut settings, &run);
    assert_eq!(settings.prompt_count_limit, 20);
    assert_eq!(settings.read_timeout, 2.5);
    assert_eq!(settings.concurrency, EngineSettings::default().concurrency);
}

#[test]
fn test_run_requires_device_list() {
    let result = NetactionArgs::try_parse_from([
        "netaction",
        "run",
        "--driver",
        "drivers.yaml",
        "--driver-name",
        "ios",
    ]);
    assert!(result.is_err());
}

#[test]
fn test_load_devices_with_extra_fields() {
    let file = temp_file(
        r#"
- hostname: r1
  mgmt_ip: 192.0.2.1
  port: 2222
  username: admin
  password: ENV_LAB_PASSWORD
  site: lab
- hostname: r2
  username: admin
  password: admin
"#,
    );
    let devices = load_devices(file.path()).unwrap();
    assert_eq!(devices.len(), 2);

    let r1 = devices[0].target();
    assert_eq!(r1.host, "192.0.2.1");
    assert_eq!(r1.port, 2222);
    assert_eq!(devices[0].credentials().password, "ENV_LAB_PASSWORD");
    assert_eq!(devices[0].extra.get("site"), Some(&json!("lab")));

    let r2 = devices[1].target();
    assert_eq!(r2.host, "r2");
    assert_eq!(r2.port, 22);
}

#[test]
fn test_duplicate_hostnames_are_rejected() {
    let file = temp_file(
        r#"
- {hostname: r1, username: a, password: b}
- {hostname: r1, username: a, password: b}
"#,
    );
    assert!(matches!(load_devices(file.path()), Err(CliError::DeviceList(_))));
}

#[test]
fn test_empty_device_list_is_rejected() {
    let file = temp_file("[]\n");
    assert!(matches!(load_devices(file.path()), Err(CliError::DeviceList(_))));
}

#[test]
fn test_jobs_render_driver_per_device() {
    let devices_file = temp_file(
        r#"
- {hostname: r1, mgmt_ip: 192.0.2.1, username: a, password: b}
- {hostname: r2, mgmt_ip: 192.0.2.2, username: a, password: b}
"#,
    );
    let devices = load_devices(devices_file.path()).unwrap();
    let jobs = build_jobs(DRIVER, "ios", &devices, &Map::new(), &VariableResolver::new()).unwrap();

    assert_eq!(jobs.len(), 2);
    let ActionKind::SendCommand(ping) = &jobs[1].actions[1].kind else {
        panic!("expected send_command");
    };
    assert_eq!(ping.command, "ping 192.0.2.2");
    assert_eq!(jobs[1].variables.get("hostname"), Some(&json!("r2")));
}

#[test]
fn test_validate_keeps_device_placeholders() {
    let driver = temp_file(DRIVER);
    let args = DriverArgs {
        driver: driver.path().to_path_buf(),
        driver_name: "ios".into(),
        vars: None,
    };
    let definition = validate(&args).unwrap();
    assert_eq!(definition.error_string.as_deref(), Some("% Invalid"));
    let ActionKind::SendCommand(first) = &definition.actions[0].kind else {
        panic!("expected send_command");
    };
    assert!(first.command.contains("{{ hostname }}"));
}

#[test]
fn test_validate_unknown_driver() {
    let driver = temp_file(DRIVER);
    let args = DriverArgs {
        driver: driver.path().to_path_buf(),
        driver_name: "nxos".into(),
        vars: None,
    };
    assert!(matches!(
        validate(&args),
        Err(CliError::Config(ConfigError::UnknownDriver(name))) if name == "nxos"
    ));
}
