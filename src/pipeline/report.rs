use serde::Serialize;

use crate::error::FillError;
use crate::ir::ContainerPath;

/// Outcome of one fill key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyOutcome {
    pub key: String,
    pub value: String,
    pub success: bool,
    /// Occurrences actually rewritten for this key.
    pub applied: usize,
    /// Containers this key wrote into, in document order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl KeyOutcome {
    pub(crate) fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            success: false,
            applied: 0,
            containers: Vec::new(),
            error: None,
            error_kind: None,
        }
    }

    pub(crate) fn record_applied(&mut self, path: &ContainerPath) {
        self.applied += 1;
        let name = path.to_string();
        if !self.containers.contains(&name) {
            self.containers.push(name);
        }
    }

    /// Keeps the first error seen for the key.
    pub(crate) fn record_error(&mut self, err: &FillError) {
        if self.error.is_none() {
            self.error = Some(err.to_string());
            self.error_kind = Some(err.kind());
        }
    }
}

/// Fill response: one outcome per requested key, in request order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FillReport {
    pub outcomes: Vec<KeyOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub occurrences_detected: usize,
    pub containers_changed: usize,
}

impl FillReport {
    pub(crate) fn finish(
        mut outcomes: Vec<KeyOutcome>,
        occurrences_detected: usize,
        containers_changed: usize,
    ) -> Self {
        for o in outcomes.iter_mut() {
            o.success = o.error.is_none() && o.applied > 0;
        }
        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let failed = outcomes.len() - succeeded;
        Self {
            outcomes,
            succeeded,
            failed,
            occurrences_detected,
            containers_changed,
        }
    }

    pub fn outcome(&self, key: &str) -> Option<&KeyOutcome> {
        self.outcomes.iter().find(|o| o.key == key)
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
