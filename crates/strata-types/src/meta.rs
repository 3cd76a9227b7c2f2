//! Per-path access metadata.

use serde::{Deserialize, Serialize};

/// Access metadata attached to a virtual path.
///
/// Each flag pairs with a `*_sub` flag saying whether it is inherited by
/// descendants. Resolution walks ancestors; see the kernel's meta cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    pub id: u64,
    pub path: String,
    pub password: String,
    pub p_sub: bool,
    pub write: bool,
    pub w_sub: bool,
    pub hide: String,
    pub h_sub: bool,
    pub readme: String,
    pub r_sub: bool,
}

impl Meta {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}
