use serde_json::Value;

/// One opaque record produced by the remote model.
pub type ResultRecord = Value;

/// Outcome of a single inference call.
///
/// `Absent` means the server legitimately produced nothing (e.g. no
/// detections) and is distinct from `Records(vec![])`.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResult {
    Absent,
    Records(Vec<ResultRecord>),
}

impl InferenceResult {
    pub fn from_wire(results: Option<Vec<ResultRecord>>) -> Self {
        match results {
            Some(records) => Self::Records(records),
            None => Self::Absent,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Records in server order; empty for `Absent`.
    pub fn records(&self) -> &[ResultRecord] {
        match self {
            Self::Absent => &[],
            Self::Records(records) => records,
        }
    }
}
