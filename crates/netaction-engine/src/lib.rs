pub mod device_log;
pub mod http;
pub mod interpreter;
pub mod parser;
pub mod runner;
pub mod session;

pub use interpreter::{DeviceRunReport, ExecutionContext, Interpreter, RunState, StopReason};
pub use runner::{AutomationRunner, DeviceJob, RunSummary};
