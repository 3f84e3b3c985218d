//! Fault routes served by the default handler.

use crate::fault::FaultCommand;
use serde::{Deserialize, Serialize};

/// Requests whose path starts with `path_prefix` get `fault` instead of a
/// response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FaultRoute {
    pub path_prefix: String,
    pub fault: FaultCommand,
}

impl FaultRoute {
    pub fn new(path_prefix: impl Into<String>, fault: FaultCommand) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            fault,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.path_prefix)
    }
}
