//! Device and global result stores
//!
//! A [`GlobalStore`] is constructed explicitly and shared through an `Arc`.
//! Get-or-create of a device entry happens under one registry lock; every
//! device entry then has its own lock. All reads hand back copies.

use crate::error::StoreError;
use crate::types::{AuditReportEntry, AuditResult};
use crate::utils::template_stem;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Results collected for one device during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceResultStore {
    pub outputs: BTreeMap<String, BTreeMap<usize, Value>>,
    pub variables: BTreeMap<String, Value>,
    pub audit_reports: Vec<AuditReportEntry>,
}

impl DeviceResultStore {
    pub fn update(&mut self, template_id: &str, action_index: usize, value: Value) {
        self.outputs
            .entry(template_id.to_string())
            .or_default()
            .insert(action_index, value);
    }

    pub fn output(&self, template_id: &str, action_index: usize) -> Option<&Value> {
        self.outputs.get(template_id)?.get(&action_index)
    }

    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn add_audit_report(&mut self, entry: AuditReportEntry) {
        self.audit_reports.push(entry);
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Change notifications for observers (report views, progress displays).
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    OutputUpdated {
        device: String,
        template_id: String,
        action_index: usize,
    },
    VariableSet {
        device: String,
        name: String,
    },
    AuditAppended {
        device: String,
        policy_name: String,
        result: AuditResult,
    },
}

type DeviceSlot = Arc<RwLock<DeviceResultStore>>;

pub struct GlobalStore {
    sessions: Mutex<HashMap<String, DeviceSlot>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for GlobalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        GlobalStore {
            sessions: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn device(&self, name: &str) -> DeviceSlot {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Creating result store for device {}", name);
                Arc::new(RwLock::new(DeviceResultStore::default()))
            })
            .clone()
    }

    fn write<R>(&self, device: &str, f: impl FnOnce(&mut DeviceResultStore) -> R) -> R {
        let slot = self.device(device);
        let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn read<R>(&self, device: &str, f: impl FnOnce(&DeviceResultStore) -> R) -> R {
        let slot = self.device(device);
        let guard = slot.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is the normal case.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn update(&self, device: &str, template_id: &str, action_index: usize, value: Value) {
        self.write(device, |store| store.update(template_id, action_index, value));
        self.notify(StoreEvent::OutputUpdated {
            device: device.to_string(),
            template_id: template_id.to_string(),
            action_index,
        });
    }

    pub fn get_device_data(&self, device: &str) -> DeviceResultStore {
        self.read(device, DeviceResultStore::clone)
    }

    pub fn set_variable(&self, device: &str, name: &str, value: Value) {
        self.write(device, |store| store.set_variable(name, value));
        self.notify(StoreEvent::VariableSet {
            device: device.to_string(),
            name: name.to_string(),
        });
    }

    pub fn get_variable(&self, device: &str, name: &str) -> Option<Value> {
        self.read(device, |store| store.get_variable(name).cloned())
    }

    pub fn add_audit_report(&self, device: &str, entry: AuditReportEntry) {
        let event = StoreEvent::AuditAppended {
            device: device.to_string(),
            policy_name: entry.policy_name.clone(),
            result: entry.overall_result,
        };
        self.write(device, |store| store.add_audit_report(entry));
        self.notify(event);
    }

    pub fn get_audit_reports(&self, device: &str) -> Vec<AuditReportEntry> {
        self.read(device, |store| store.audit_reports.clone())
    }

    pub fn device_names(&self) -> Vec<String> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = sessions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Point-in-time copy of every device store.
    pub fn snapshot(&self) -> BTreeMap<String, DeviceResultStore> {
        let slots: Vec<(String, DeviceSlot)> = {
            let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            sessions
                .iter()
                .map(|(name, slot)| (name.clone(), slot.clone()))
                .collect()
        };
        slots
            .into_iter()
            .map(|(name, slot)| {
                let data = slot.read().unwrap_or_else(PoisonError::into_inner).clone();
                (name, data)
            })
            .collect()
    }

    pub fn snapshot_value(&self) -> Value {
        serde_json::to_value(self.snapshot()).unwrap_or(Value::Null)
    }

    /// The document that `run_if`, audit and loop conditions are evaluated against.
    ///
    /// Full template ids map to `{index: {"parsed_output": value}}` for raw
    /// lookups. Template stems and device variables are exposed at top level
    /// for structured queries, first writer wins on key collisions.
    pub fn condition_context(&self, device: &str) -> Value {
        let all = self.snapshot();
        let current = all.get(device).cloned().unwrap_or_default();
        let mut view = Map::new();

        for (template_id, slots) in &current.outputs {
            let wrapped: Map<String, Value> = slots
                .iter()
                .map(|(index, value)| (index.to_string(), json!({ "parsed_output": value })))
                .collect();
            view.insert(template_id.clone(), Value::Object(wrapped));
        }
        for (template_id, slots) in &current.outputs {
            if let Some(latest) = slots.values().next_back() {
                view.entry(template_stem(template_id))
                    .or_insert_with(|| latest.clone());
            }
        }
        for (name, value) in &current.variables {
            view.entry(name.clone()).or_insert_with(|| value.clone());
        }

        let variables: Map<String, Value> = current
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        view.insert("action_variables".into(), Value::Object(variables));
        view.insert("current_device_name".into(), json!(device));
        view.insert("current_device".into(), current.to_value());
        view.insert(
            "all_devices".into(),
            serde_json::to_value(&all).unwrap_or(Value::Null),
        );
        Value::Object(view)
    }

    pub fn cursor(self: &Arc<Self>) -> DeviceCursor {
        DeviceCursor {
            store: Arc::clone(self),
            current: None,
        }
    }
}

/// A handle onto the global store that remembers which device is current.
///
/// Each interpreter owns its own cursor, so parallel device runs never see
/// each other's selection.
#[derive(Clone)]
pub struct DeviceCursor {
    store: Arc<GlobalStore>,
    current: Option<String>,
}

impl DeviceCursor {
    pub fn set_current_device(&mut self, device: &str) {
        self.current = Some(device.to_string());
    }

    pub fn current_device(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn store(&self) -> &Arc<GlobalStore> {
        &self.store
    }

    fn device(&self) -> Result<&str, StoreError> {
        self.current.as_deref().ok_or(StoreError::NoCurrentDevice)
    }

    pub fn update(
        &self,
        template_id: &str,
        action_index: usize,
        value: Value,
    ) -> Result<(), StoreError> {
        self.store.update(self.device()?, template_id, action_index, value);
        Ok(())
    }

    pub fn get_device_data(&self) -> Result<DeviceResultStore, StoreError> {
        Ok(self.store.get_device_data(self.device()?))
    }

    pub fn set_variable(&self, name: &str, value: Value) -> Result<(), StoreError> {
        self.store.set_variable(self.device()?, name, value);
        Ok(())
    }

    pub fn get_variable(&self, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.store.get_variable(self.device()?, name))
    }

    pub fn add_audit_report(&self, entry: AuditReportEntry) -> Result<(), StoreError> {
        self.store.add_audit_report(self.device()?, entry);
        Ok(())
    }

    pub fn get_audit_reports(&self) -> Result<Vec<AuditReportEntry>, StoreError> {
        Ok(self.store.get_audit_reports(self.device()?))
    }

    pub fn condition_context(&self) -> Result<Value, StoreError> {
        Ok(self.store.condition_context(self.device()?))
    }
}
