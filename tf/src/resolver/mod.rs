//! Per-host variable resolution
//!
//! Merges global defines, host-specific defines, the computed hostname and
//! the variables embedded in the host URL into one [`BindingSet`].
//!
//! Precedence, lowest to highest:
//!
//! 1. global defines
//! 2. host-specific defines
//! 3. `hostname` (after the domain suffix is applied)
//! 4. URL variables, which may overwrite `hostname` as well
//!
//! URL variables whose only value is a bracket placeholder such as
//! `{enable password}` are replaced by a value typed at the terminal. The
//! prompt blocks; unattended runs must pre-fill every such value. An empty
//! answer is accepted as-is.

mod prompt;

use std::sync::{Arc, LazyLock};

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::domain::{BindingSet, DefineTable, HostError, HostRecord};

pub use prompt::{Prompter, ReadlinePrompter, ScriptedPrompter};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{([^\]]*)\}$").expect("valid placeholder pattern"));

/// Errors raised while resolving a host
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("Interactive input failed: {0}")]
    Prompt(String),
}

/// Resolves host URLs into host records and binding sets
pub struct VariableResolver {
    domain: String,
    default_protocol: String,
    prompter: Arc<dyn Prompter>,
}

impl VariableResolver {
    pub fn new(domain: impl Into<String>, default_protocol: impl Into<String>, prompter: Arc<dyn Prompter>) -> Self {
        Self {
            domain: domain.into(),
            default_protocol: default_protocol.into(),
            prompter,
        }
    }

    /// Parse `host_url`, fill its placeholders and merge its bindings
    ///
    /// Registers an entry for the un-suffixed hostname in `defines`.
    pub fn resolve(&self, host_url: &str, defines: &mut DefineTable) -> Result<(HostRecord, BindingSet), ResolveError> {
        debug!(%host_url, "VariableResolver::resolve: called");
        let mut record = HostRecord::parse(host_url, &self.default_protocol)?;
        self.fill_placeholders(&mut record)?;
        defines.register_host(&record.hostname);
        let bindings = self.bind(&record, defines);
        Ok((record, bindings))
    }

    /// Merge the bindings for an already parsed host
    pub fn bind(&self, record: &HostRecord, defines: &DefineTable) -> BindingSet {
        let hostname = record.qualified_hostname(&self.domain);
        debug!(host = %record.hostname, %hostname, "VariableResolver::bind: called");

        let mut bindings = BindingSet::new();
        bindings.overlay(defines.global());
        if let Some(host_defines) = defines.host(&record.hostname) {
            bindings.overlay(host_defines);
        }
        bindings.insert("hostname", vec![hostname]);
        bindings.overlay(&record.url_vars);
        bindings
    }

    fn fill_placeholders(&self, record: &mut HostRecord) -> Result<(), ResolveError> {
        for (name, values) in record.url_vars.iter_mut() {
            let hint = match values.as_slice() {
                [only] => match placeholder_hint(only) {
                    Some(hint) => hint.to_string(),
                    None => continue,
                },
                _ => continue,
            };
            let what = if hint.is_empty() {
                format!("a value for \"{}\"", name)
            } else {
                hint
            };
            debug!(%name, "VariableResolver::fill_placeholders: prompting");
            let answer = self.prompter.prompt(&format!("Please enter {}: ", what))?;
            *values = vec![answer];
        }
        Ok(())
    }
}

/// The hint inside a `{hint}` placeholder, or None for ordinary values
pub fn placeholder_hint(value: &str) -> Option<&str> {
    PLACEHOLDER_RE
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|hint| hint.as_str())
}
