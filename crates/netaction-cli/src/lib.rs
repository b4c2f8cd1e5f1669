//! Netaction command-line front end
//!
//! Loads a driver document, a device list and optional variables, then runs
//! the driver's actions against every device in parallel.
//!
//! ```rust,no_run
//! use netaction_cli::cli::run;
//!
//! # async fn example() -> anyhow::Result<()> {
//! run().await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod error;
