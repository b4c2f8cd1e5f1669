use netaction_core::error::StoreError;
use netaction_core::store::{GlobalStore, StoreEvent};
use netaction_core::types::{AuditReportEntry, AuditResult};
use serde_json::json;
use std::sync::Arc;
use std::thread;

#[test]
fn test_update_then_read_returns_stored_value() {
    let store = GlobalStore::new();
    let parsed = json!([{"version": "17.3.4", "uptime": "5 weeks"}]);
    store.update("core-1", "templates/show_version.ttp", 0, parsed.clone());

    let data = store.get_device_data("core-1");
    assert_eq!(data.output("templates/show_version.ttp", 0), Some(&parsed));

    store.update("core-1", "templates/show_version.ttp", 0, json!("overwritten"));
    let data = store.get_device_data("core-1");
    assert_eq!(data.outputs["templates/show_version.ttp"].len(), 1);
    assert_eq!(data.output("templates/show_version.ttp", 0), Some(&json!("overwritten")));
}

#[test]
fn test_get_device_data_creates_empty_session() {
    let store = GlobalStore::new();
    let data = store.get_device_data("never-seen");
    assert!(data.outputs.is_empty());
    assert_eq!(store.device_names(), vec!["never-seen".to_string()]);
}

#[test]
fn test_snapshots_are_copies() {
    let store = GlobalStore::new();
    store.set_variable("edge-1", "site", json!("AMS"));
    let before = store.snapshot();
    store.set_variable("edge-1", "site", json!("FRA"));
    assert_eq!(before["edge-1"].variables["site"], json!("AMS"));
    assert_eq!(store.get_variable("edge-1", "site"), Some(json!("FRA")));
}

#[test]
fn test_concurrent_device_creation_keeps_every_device() {
    let store = Arc::new(GlobalStore::new());
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let device = format!("dev-{}", i % 8);
                store.update(&device, "show clock", i, json!(i));
                store.set_variable(&device, &format!("v{}", i), json!(i));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 8);
    for i in 0..16usize {
        let device = &snapshot[&format!("dev-{}", i % 8)];
        assert_eq!(device.output("show clock", i), Some(&json!(i)));
        assert_eq!(device.variables[&format!("v{}", i)], json!(i));
    }
}

#[test]
fn test_cursor_requires_current_device() {
    let store = Arc::new(GlobalStore::new());
    let mut cursor = store.cursor();
    assert_eq!(cursor.get_variable("x"), Err(StoreError::NoCurrentDevice));
    assert_eq!(cursor.set_variable("x", json!(1)), Err(StoreError::NoCurrentDevice));

    cursor.set_current_device("spine-2");
    cursor.set_variable("x", json!(1)).unwrap();
    assert_eq!(cursor.get_variable("x").unwrap(), Some(json!(1)));
    assert_eq!(store.get_variable("spine-2", "x"), Some(json!(1)));

    let other = store.cursor();
    assert_eq!(other.current_device(), None);
}

#[test]
fn test_audit_reports_are_appended_and_broadcast() {
    let store = GlobalStore::new();
    let mut events = store.subscribe();
    for (policy, result) in [("ntp", AuditResult::Passed), ("snmp", AuditResult::Failed)] {
        store.add_audit_report(
            "leaf-1",
            AuditReportEntry {
                policy_name: policy.into(),
                display_name: policy.into(),
                device_name: "leaf-1".into(),
                per_condition_results: vec![],
                overall_result: result,
            },
        );
    }

    let reports = store.get_audit_reports("leaf-1");
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].policy_name, "ntp");
    assert_eq!(reports[1].overall_result, AuditResult::Failed);

    assert_eq!(
        events.try_recv().unwrap(),
        StoreEvent::AuditAppended {
            device: "leaf-1".into(),
            policy_name: "ntp".into(),
            result: AuditResult::Passed,
        }
    );
}

#[test]
fn test_condition_context_layout() {
    let store = GlobalStore::new();
    store.update("r1", "templates/show_ntp.ttp", 3, json!({"synced": true}));
    store.set_variable("r1", "status", json!("up"));
    store.set_variable("r2", "status", json!("down"));

    let context = store.condition_context("r1");
    assert_eq!(context["templates/show_ntp.ttp"]["3"]["parsed_output"], json!({"synced": true}));
    assert_eq!(context["show_ntp"], json!({"synced": true}));
    assert_eq!(context["status"], json!("up"));
    assert_eq!(context["action_variables"]["status"], json!("up"));
    assert_eq!(context["current_device_name"], json!("r1"));
    assert_eq!(context["all_devices"]["r2"]["variables"]["status"], json!("down"));
}
