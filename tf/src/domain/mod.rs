//! Domain types for termfleet
//!
//! Host records, variable definitions and scheduling tiers.

mod bindings;
mod host;
mod priority;

pub use bindings::{BindingSet, DefineTable, Defines};
pub use host::{HostError, HostRecord, Protocol, UrlVars};
pub use priority::Priority;
