use serde_json::Value;

use crate::{FetchError, ResponseEnvelope};

/// Where an instance is in its current cycle.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Phase {
    /// Waiting for the next trigger.
    #[default]
    Idle,
    Requesting,
    /// Waiting out the retry delay before the next attempt.
    Retrying,
}

/// Terminal state of the last completed cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Settled {
    Success,
    Failed,
    Aborted,
}

/// Observable record of one request instance.
///
/// Every published snapshot is internally consistent: `data`, `loading`,
/// `error` and `response` always come from the same point of a cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub data: Value,
    pub loading: bool,
    /// Cleared when a cycle starts, set only on its terminal failure.
    pub error: Option<FetchError>,
    pub response: Option<ResponseEnvelope>,
    pub phase: Phase,
    pub settled: Option<Settled>,
    /// Cycles cancelled by supersession or [`Fetch::abort`](crate::Fetch::abort).
    pub aborted_count: usize,
}

impl Snapshot {
    pub(crate) fn initial(data: Value, loading: bool) -> Self {
        Self {
            data,
            loading,
            error: None,
            response: None,
            phase: Phase::Idle,
            settled: None,
            aborted_count: 0,
        }
    }
}
