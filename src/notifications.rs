use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{parameters::TargetParameters, response::DecodedMbox};

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum NotificationType {
    Display,
    Click,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct NotificationMbox {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// A display or click notification, in wire format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Notification {
    pub id: String,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub mbox: NotificationMbox,
    pub tokens: Vec<String>,
    #[serde(flatten)]
    pub parameters: TargetParameters,
}

/// What we know about an mbox that was fetched or prefetched with event tokens.
#[derive(Debug, Clone)]
pub(crate) struct MboxRecord {
    pub mbox: DecodedMbox,
    /// Parameters the mbox was requested with.
    pub parameters: TargetParameters,
}

/// Tracks event tokens of delivered mboxes and notifications waiting to be sent.
#[derive(Debug, Default)]
pub(crate) struct NotificationTracker {
    records: HashMap<String, MboxRecord>,
    pending: Vec<Notification>,
}

impl NotificationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `mbox` if it carries display or click tokens. Replaces any earlier record for the
    /// same name.
    pub fn record(&mut self, name: &str, mbox: &DecodedMbox, parameters: &TargetParameters) {
        if !mbox.has_notification_tokens() {
            return;
        }
        self.records.insert(
            name.to_owned(),
            MboxRecord {
                mbox: mbox.clone(),
                parameters: parameters.clone(),
            },
        );
    }

    pub fn record_for(&self, name: &str) -> Option<&MboxRecord> {
        self.records.get(name)
    }

    /// Build a display notification for a recorded mbox. `None` if the mbox was never fetched
    /// or has no display tokens.
    pub fn display_notification(
        &self,
        name: &str,
        parameters: Option<&TargetParameters>,
        now: DateTime<Utc>,
    ) -> Option<Notification> {
        let record = self.records.get(name)?;
        if record.mbox.display_tokens.is_empty() {
            return None;
        }
        Some(build_notification(
            name,
            record,
            NotificationType::Display,
            record.mbox.display_tokens.clone(),
            parameters,
            now,
        ))
    }

    /// Build a click notification for a recorded mbox. `None` if the mbox was never fetched or
    /// has no click metric.
    pub fn click_notification(
        &self,
        name: &str,
        parameters: Option<&TargetParameters>,
        now: DateTime<Utc>,
    ) -> Option<Notification> {
        let record = self.records.get(name)?;
        let click_token = record.mbox.click_token.clone()?;
        Some(build_notification(
            name,
            record,
            NotificationType::Click,
            vec![click_token],
            parameters,
            now,
        ))
    }

    pub fn push(&mut self, notification: Notification) {
        self.pending.push(notification);
    }

    pub fn pending(&self) -> &[Notification] {
        &self.pending
    }

    /// Take all pending notifications. Each notification is handed out once.
    pub fn flush(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.pending)
    }

    /// Put notifications of a failed request back in front of the queue.
    pub fn requeue(&mut self, mut notifications: Vec<Notification>) {
        notifications.append(&mut self.pending);
        self.pending = notifications;
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.pending.clear();
    }
}

fn build_notification(
    name: &str,
    record: &MboxRecord,
    notification_type: NotificationType,
    tokens: Vec<String>,
    parameters: Option<&TargetParameters>,
    now: DateTime<Utc>,
) -> Notification {
    Notification {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: now.timestamp_millis(),
        notification_type,
        mbox: NotificationMbox {
            name: name.to_owned(),
            state: record.mbox.state.clone(),
        },
        tokens,
        parameters: TargetParameters::merge(Some(&record.parameters), parameters),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use serde_json::json;

    use crate::{parameters::TargetParameters, response::DecodedMbox};

    use super::{NotificationTracker, NotificationType};

    fn mbox(display: &[&str], click: Option<&str>) -> DecodedMbox {
        DecodedMbox {
            name: "mbox".to_owned(),
            state: Some("state".to_owned()),
            display_tokens: display.iter().map(|t| t.to_string()).collect(),
            click_token: click.map(str::to_owned),
            ..Default::default()
        }
    }

    #[test]
    fn unknown_mbox_produces_nothing() {
        let tracker = NotificationTracker::new();
        assert!(tracker.display_notification("mbox", None, Utc::now()).is_none());
        assert!(tracker.click_notification("mbox", None, Utc::now()).is_none());
    }

    #[test]
    fn mbox_without_tokens_is_not_recorded() {
        let mut tracker = NotificationTracker::new();
        tracker.record("mbox", &mbox(&[], None), &TargetParameters::new());
        assert!(tracker.record_for("mbox").is_none());
    }

    #[test]
    fn display_notification_carries_tokens_and_parameters() {
        let mut tracker = NotificationTracker::new();
        let requested = TargetParameters::new()
            .with_parameters(HashMap::from([("k".to_owned(), "v".to_owned())]));
        tracker.record("mbox", &mbox(&["t1", "t2"], None), &requested);

        let now = Utc::now();
        let notification = tracker.display_notification("mbox", None, now).unwrap();

        assert_eq!(notification.notification_type, NotificationType::Display);
        assert_eq!(notification.tokens, vec!["t1".to_owned(), "t2".to_owned()]);
        assert_eq!(notification.timestamp, now.timestamp_millis());

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], json!("display"));
        assert_eq!(value["mbox"], json!({"name": "mbox", "state": "state"}));
        assert_eq!(value["parameters"], json!({"k": "v"}));
    }

    #[test]
    fn click_requires_click_metric() {
        let mut tracker = NotificationTracker::new();
        tracker.record("display-only", &mbox(&["t1"], None), &TargetParameters::new());
        tracker.record("clickable", &mbox(&[], Some("c1")), &TargetParameters::new());

        assert!(tracker
            .click_notification("display-only", None, Utc::now())
            .is_none());
        let click = tracker
            .click_notification("clickable", None, Utc::now())
            .unwrap();
        assert_eq!(click.tokens, vec!["c1".to_owned()]);
        assert_eq!(click.notification_type, NotificationType::Click);
    }

    #[test]
    fn flush_drains_pending() {
        let mut tracker = NotificationTracker::new();
        tracker.record("mbox", &mbox(&["t1"], None), &TargetParameters::new());
        let notification = tracker
            .display_notification("mbox", None, Utc::now())
            .unwrap();
        tracker.push(notification);

        assert_eq!(tracker.flush().len(), 1);
        assert!(tracker.flush().is_empty());
        assert!(tracker.pending().is_empty());
    }

    #[test]
    fn requeue_keeps_order() {
        let mut tracker = NotificationTracker::new();
        tracker.record("first", &mbox(&["t1"], None), &TargetParameters::new());
        tracker.record("second", &mbox(&["t2"], None), &TargetParameters::new());
        let first = tracker
            .display_notification("first", None, Utc::now())
            .unwrap();
        let second = tracker
            .display_notification("second", None, Utc::now())
            .unwrap();

        tracker.push(first);
        let failed = tracker.flush();
        tracker.push(second);
        tracker.requeue(failed);

        let names: Vec<&str> = tracker
            .pending()
            .iter()
            .map(|notification| notification.mbox.name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
