//! Variable definitions and merged binding sets

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

/// Named variables, each holding an ordered list of values
pub type Defines = BTreeMap<String, Vec<String>>;

/// Process-wide variable definitions
///
/// Host entries are keyed by the hostname exactly as parsed from the host
/// URL, before any domain suffix is applied.
#[derive(Debug, Clone, Default)]
pub struct DefineTable {
    global: Defines,
    hosts: HashMap<String, Defines>,
}

impl DefineTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a global variable, replacing any earlier value list
    pub fn define(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        debug!(%name, count = values.len(), "DefineTable::define: called");
        self.global.insert(name, values);
    }

    pub fn global(&self) -> &Defines {
        &self.global
    }

    /// Set a host-specific variable, replacing any earlier value list
    pub fn define_host(&mut self, hostname: &str, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        debug!(%hostname, %name, "DefineTable::define_host: called");
        self.register_host(hostname).insert(name, values);
    }

    /// Append one value to a host-specific variable
    pub fn append_host_value(&mut self, hostname: &str, name: &str, value: impl Into<String>) {
        self.register_host(hostname)
            .entry(name.to_string())
            .or_default()
            .push(value.into());
    }

    /// Ensure an entry exists for `hostname` and return it
    pub fn register_host(&mut self, hostname: &str) -> &mut Defines {
        self.hosts.entry(hostname.to_string()).or_default()
    }

    pub fn host(&self, hostname: &str) -> Option<&Defines> {
        self.hosts.get(hostname)
    }

    pub fn contains_host(&self, hostname: &str) -> bool {
        self.hosts.contains_key(hostname)
    }
}

/// The merged variables visible to one script instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingSet {
    vars: Defines,
}

impl BindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay `defines` on top of the current bindings
    pub fn overlay(&mut self, defines: &Defines) {
        for (name, values) in defines {
            self.vars.insert(name.clone(), values.clone());
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.vars.insert(name.into(), values);
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.vars.get(name).map(Vec::as_slice)
    }

    /// First value of a variable
    pub fn first(&self, name: &str) -> Option<&str> {
        self.vars.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_append_accumulates_in_order() {
        let mut table = DefineTable::new();
        table.append_host_value("r1", "region", "us-east");
        table.append_host_value("r1", "region", "us-west");

        assert_eq!(table.host("r1").unwrap()["region"], values(&["us-east", "us-west"]));
    }

    #[test]
    fn test_define_host_replaces_and_register_keeps() {
        let mut table = DefineTable::new();
        table.define_host("r1", "site", values(&["a"]));
        table.define_host("r1", "site", values(&["b"]));
        table.register_host("r1");

        assert_eq!(table.host("r1").unwrap()["site"], values(&["b"]));
        assert!(table.contains_host("r1"));
        assert!(!table.contains_host("r2"));
    }

    #[test]
    fn test_binding_overlay_overrides() {
        let mut low = Defines::new();
        low.insert("a".into(), values(&["1"]));
        low.insert("b".into(), values(&["1"]));
        let mut high = Defines::new();
        high.insert("b".into(), values(&["2", "3"]));

        let mut bindings = BindingSet::new();
        bindings.overlay(&low);
        bindings.overlay(&high);

        assert_eq!(bindings.first("a"), Some("1"));
        assert_eq!(bindings.get("b"), Some(&values(&["2", "3"])[..]));
        assert_eq!(bindings.len(), 2);
    }
}
