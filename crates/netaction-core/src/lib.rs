pub mod condition;
pub mod config;
pub mod error;
pub mod query;
pub mod resolver;
pub mod store;
pub mod types;
pub mod utils;
