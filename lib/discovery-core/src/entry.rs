//! Directory entries and the routes derived from them

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A service as reported by the external directory.
///
/// Entries are snapshots: a fresh set is produced on every fetch and never
/// mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Internal address (host:port) traffic should be sent to
    pub target: String,
}

impl ServiceEntry {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            target: target.into(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Qualified identifier (namespace/name) used as the route name
    pub fn service_id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A virtual host bound to a target address, as published to the proxy
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteMapping {
    pub service: String,
    pub host: String,
    pub target: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteEventKind {
    Add,
    Remove,
}

impl RouteEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteEventKind::Add => "add",
            RouteEventKind::Remove => "remove",
        }
    }
}

/// Incremental change to the proxy's route table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEvent {
    pub kind: RouteEventKind,
    pub service: String,
    pub host: String,
    pub target: String,
}

impl RouteEvent {
    pub fn add(mapping: &RouteMapping) -> Self {
        Self::from_mapping(RouteEventKind::Add, mapping)
    }

    pub fn remove(mapping: &RouteMapping) -> Self {
        Self::from_mapping(RouteEventKind::Remove, mapping)
    }

    fn from_mapping(kind: RouteEventKind, mapping: &RouteMapping) -> Self {
        Self {
            kind,
            service: mapping.service.clone(),
            host: mapping.host.clone(),
            target: mapping.target.clone(),
        }
    }

    /// Render the event in the proxy's route configuration language
    pub fn route_command(&self) -> String {
        match self.kind {
            RouteEventKind::Add => format!(
                "route add {} {}/ http://{}",
                self.service, self.host, self.target
            ),
            RouteEventKind::Remove => format!("route del {} {}/", self.service, self.host),
        }
    }
}

impl fmt::Display for RouteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.route_command())
    }
}
