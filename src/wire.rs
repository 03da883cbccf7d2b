//! Delivery API wire models.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    context::{AuthenticatedState, DeviceContext, Orientation, VisitorIdentity},
    notifications::Notification,
    parameters::TargetParameters,
};

/// Delivery request document.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeliveryRequest {
    #[serde(flatten)]
    pub header: RequestHeader,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute: Option<Mboxes<MboxRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<Mboxes<MboxRequest>>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub notifications: Vec<Notification>,
}

/// Delivery request document with caller-supplied mbox and notification nodes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawDeliveryRequest<'a> {
    #[serde(flatten)]
    pub header: RequestHeader,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub notifications: &'a [serde_json::Value],
}

/// Nodes shared by every request: who is asking and from where.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RequestHeader {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<IdNode>,
    pub context: ContextNode,
    pub experience_cloud: ExperienceCloudNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<PropertyNode>,
    pub client: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IdNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tnt_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub third_party_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marketing_cloud_visitor_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub customer_ids: Vec<CustomerIdNode>,
}

impl IdNode {
    pub fn is_empty(&self) -> bool {
        self.tnt_id.is_none()
            && self.third_party_id.is_none()
            && self.marketing_cloud_visitor_id.is_none()
            && self.customer_ids.is_empty()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CustomerIdNode {
    pub id: String,
    pub integration_code: String,
    pub authenticated_state: AuthenticatedState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContextNode {
    pub channel: &'static str,
    pub mobile_platform: MobilePlatformNode,
    pub application: ApplicationNode,
    pub screen: ScreenNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub time_offset_in_minutes: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MobilePlatformNode {
    pub platform_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ApplicationNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScreenNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub color_depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
}

impl ContextNode {
    pub fn new(device: &DeviceContext, time_offset_in_minutes: i32) -> Self {
        ContextNode {
            channel: "mobile",
            mobile_platform: MobilePlatformNode {
                platform_type: device.platform_type.clone(),
                device_name: device.device_name.clone(),
                device_type: device.device_type.clone(),
            },
            application: ApplicationNode {
                id: device.application_id.clone(),
                name: device.application_name.clone(),
                version: device.application_version.clone(),
            },
            screen: ScreenNode {
                width: device.screen_width,
                height: device.screen_height,
                color_depth: 32,
                orientation: device.orientation,
            },
            user_agent: device.user_agent.clone().filter(|ua| !ua.is_empty()),
            time_offset_in_minutes,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExperienceCloudNode {
    pub analytics: AnalyticsLoggingNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience_manager: Option<AudienceManagerNode>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnalyticsLoggingNode {
    pub logging: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AudienceManagerNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_hint: Option<String>,
}

impl ExperienceCloudNode {
    pub fn new(visitor: &VisitorIdentity) -> Self {
        let blob = visitor.blob.clone().filter(|blob| !blob.is_empty());
        let location_hint = visitor
            .location_hint
            .clone()
            .filter(|hint| !hint.is_empty());
        let audience_manager = (blob.is_some() || location_hint.is_some())
            .then_some(AudienceManagerNode {
                blob,
                location_hint,
            });
        ExperienceCloudNode {
            analytics: AnalyticsLoggingNode {
                logging: "client_side",
            },
            audience_manager,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct PropertyNode {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Mboxes<T> {
    pub mboxes: Vec<T>,
}

/// A single mbox in an execute or prefetch batch.
#[derive(Debug, Serialize)]
pub(crate) struct MboxRequest {
    /// Zero-based position in the batch, serialized as a string.
    pub index: String,
    pub name: String,
    #[serde(flatten)]
    pub parameters: TargetParameters,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}
impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// Delivery response document.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeliveryResponse {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub id: Option<ResponseId>,
    #[serde(default)]
    pub edge_host: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub execute: Option<Mboxes<TryParse<MboxResponse>>>,
    #[serde(default)]
    pub prefetch: Option<Mboxes<TryParse<MboxResponse>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResponseId {
    #[serde(default)]
    pub tnt_id: Option<String>,
}

/// Index echoed back by the server. Accepted both as a number and as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum MboxIndex {
    Number(u64),
    String(String),
}

impl MboxIndex {
    pub fn position(&self) -> Option<usize> {
        match self {
            MboxIndex::Number(n) => usize::try_from(*n).ok(),
            MboxIndex::String(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MboxResponse {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub index: Option<MboxIndex>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub options: Vec<MboxOption>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub analytics: Option<AnalyticsNode>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MboxOption {
    #[serde(rename = "type", default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default)]
    pub event_token: Option<String>,
    #[serde(default)]
    pub response_tokens: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Metric {
    #[serde(rename = "type", default)]
    pub metric_type: Option<String>,
    #[serde(default)]
    pub event_token: Option<String>,
    #[serde(default)]
    pub analytics: Option<AnalyticsNode>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AnalyticsNode {
    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,
}

impl AnalyticsNode {
    /// Payload with every value rendered as a string. `None` if empty.
    pub fn string_payload(&self) -> Option<HashMap<String, String>> {
        if self.payload.is_empty() {
            return None;
        }
        Some(
            self.payload
                .iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), value)
                })
                .collect(),
        )
    }
}

impl From<&crate::context::CustomerId> for CustomerIdNode {
    fn from(value: &crate::context::CustomerId) -> Self {
        CustomerIdNode {
            id: value.id.clone(),
            integration_code: value.integration_code.clone(),
            authenticated_state: value.authenticated_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DeliveryResponse, IdNode, MboxIndex, TryParse};

    #[test]
    fn empty_id_node() {
        assert!(IdNode::default().is_empty());
        assert_eq!(serde_json::to_value(IdNode::default()).unwrap(), json!({}));
    }

    #[test]
    fn index_accepts_numbers_and_strings() {
        let number: MboxIndex = serde_json::from_value(json!(2)).unwrap();
        let string: MboxIndex = serde_json::from_value(json!("3")).unwrap();
        let garbage: MboxIndex = serde_json::from_value(json!("x")).unwrap();
        assert_eq!(number.position(), Some(2));
        assert_eq!(string.position(), Some(3));
        assert_eq!(garbage.position(), None);
    }

    #[test]
    fn parse_partially_if_unexpected() {
        let response: DeliveryResponse = serde_json::from_value(json!({
            "execute": {
                "mboxes": [
                    {"name": "ok", "index": 0, "options": [{"content": "hi", "type": "html"}]},
                    {"name": "broken", "index": 1, "options": "not an array"}
                ]
            }
        }))
        .unwrap();

        let mboxes = response.execute.unwrap().mboxes;
        assert!(matches!(mboxes[0], TryParse::Parsed(_)));
        assert!(matches!(mboxes[1], TryParse::ParseFailed(_)));
    }
}
