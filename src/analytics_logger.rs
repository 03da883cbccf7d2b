use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Analytics for Target (A4T) hit to forward to an analytics backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsForTargetEvent {
    /// Mbox the payload belongs to.
    pub mbox_name: String,
    /// Payload with `&&`-prefixed keys plus `a.target.sessionId`.
    pub payload: HashMap<String, String>,
}

impl AnalyticsForTargetEvent {
    pub(crate) fn new(
        mbox_name: &str,
        payload: &HashMap<String, String>,
        session_id: &str,
    ) -> AnalyticsForTargetEvent {
        let mut prefixed: HashMap<String, String> = payload
            .iter()
            .map(|(key, value)| (format!("&&{key}"), value.clone()))
            .collect();
        prefixed.insert("a.target.sessionId".to_owned(), session_id.to_owned());
        AnalyticsForTargetEvent {
            mbox_name: mbox_name.to_owned(),
            payload: prefixed,
        }
    }
}

/// Receives A4T events. Implement it to pass Target activity to your analytics pipeline.
///
/// Events are logged from the worker thread, so implementations should return quickly.
pub trait AnalyticsLogger {
    /// Log an A4T event.
    fn log_analytics(&self, event: AnalyticsForTargetEvent);
}

pub(crate) struct NoopAnalyticsLogger;
impl AnalyticsLogger for NoopAnalyticsLogger {
    fn log_analytics(&self, _event: AnalyticsForTargetEvent) {}
}

impl<T: Fn(AnalyticsForTargetEvent)> AnalyticsLogger for T {
    fn log_analytics(&self, event: AnalyticsForTargetEvent) {
        self(event);
    }
}
