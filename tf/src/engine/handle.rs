//! Engine back-reference handed to scripts

use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::DefineTable;

/// Read access to the engine's hosts and definitions
///
/// Compiled scripts receive one of these so they can look at other hosts'
/// variables. Cloning is cheap; all clones see the same state.
#[derive(Clone, Default)]
pub struct EngineHandle {
    defines: Arc<RwLock<DefineTable>>,
    hosts: Arc<RwLock<Vec<String>>>,
}

impl EngineHandle {
    pub(crate) fn new(defines: Arc<RwLock<DefineTable>>, hosts: Arc<RwLock<Vec<String>>>) -> Self {
        Self { defines, hosts }
    }

    /// A handle not attached to any engine
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn from_parts(defines: DefineTable, hosts: Vec<String>) -> Self {
        Self::new(Arc::new(RwLock::new(defines)), Arc::new(RwLock::new(hosts)))
    }

    pub fn global_value(&self, name: &str) -> Option<Vec<String>> {
        let defines = self.defines.read().unwrap_or_else(PoisonError::into_inner);
        defines.global().get(name).cloned()
    }

    /// A variable defined for `host`, keyed by the hostname as written in the host URL
    pub fn host_value(&self, host: &str, name: &str) -> Option<Vec<String>> {
        let defines = self.defines.read().unwrap_or_else(PoisonError::into_inner);
        defines.host(host)?.get(name).cloned()
    }

    /// Host URLs in run order
    pub fn hosts(&self) -> Vec<String> {
        self.hosts.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
