//! Argument types for driver calls.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Arguments for a directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListArgs {
    /// The virtual path the caller asked for.
    pub req_path: String,
    /// Skip the cached listing and ask the driver again.
    pub refresh: bool,
}

impl ListArgs {
    pub fn refresh() -> Self {
        Self {
            refresh: true,
            ..Default::default()
        }
    }
}

/// Arguments for resolving a download link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkArgs {
    /// Client address; some drivers issue links bound to it.
    pub ip: String,
    /// Headers the client sent with the request.
    pub header: HashMap<String, String>,
    /// Driver-specific link flavour (e.g. a transcode preset). Empty for raw bytes.
    #[serde(rename = "type")]
    pub kind: String,
}

impl LinkArgs {
    pub fn for_ip(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Default::default()
        }
    }
}
