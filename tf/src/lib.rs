//! termfleet - concurrent telnet/SSH automation
//!
//! One script is compiled per host with that host's variables and run over
//! an interactive session, many hosts at a time.
//!
//! # Data flow
//!
//! host list → [`resolver`] → (host, bindings) → [`pipeline`] builder →
//! pipeline → [`scheduler`] → workers run Connect, Authenticate, Execute,
//! Close.
//!
//! # Modules
//!
//! - [`domain`] - Host records, variable definitions, priority tiers
//! - [`hosts`] - Host list and host table files
//! - [`resolver`] - Per-host variable resolution and placeholder prompts
//! - [`script`] - Script compiler seam and the template compiler
//! - [`protocol`] - Protocol modules and sessions
//! - [`pipeline`] - Per-host stage pipelines and their builder
//! - [`scheduler`] - Bounded-concurrency, tier-ordered job scheduler
//! - [`engine`] - Run loop, cancellation and run reports
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod hosts;
pub mod pipeline;
pub mod protocol;
pub mod resolver;
pub mod scheduler;
pub mod script;

pub use config::Config;
pub use domain::{BindingSet, DefineTable, HostRecord, Priority, Protocol};
pub use engine::{CancelToken, Engine, EngineError, RunOptions, RunReport};
