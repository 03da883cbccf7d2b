use std::collections::HashMap;

use crate::{
    request::{Content, ContentSource, MboxContent},
    transport::HttpResponse,
    wire::{DeliveryResponse, MboxResponse, TryParse},
    Error, Result,
};

/// An mbox from a delivery response, decoded into what the rest of the engine needs.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct DecodedMbox {
    pub name: String,
    pub state: Option<String>,
    /// `None` when the server had no decodable content.
    pub content: Option<Content>,
    pub response_tokens: Option<serde_json::Map<String, serde_json::Value>>,
    pub analytics_payload: Option<HashMap<String, String>>,
    /// Event tokens of all options, sent with display notifications.
    pub display_tokens: Vec<String>,
    pub click_token: Option<String>,
    pub click_analytics_payload: Option<HashMap<String, String>>,
}

impl DecodedMbox {
    pub fn to_content(&self, name: &str, source: ContentSource) -> Option<MboxContent> {
        Some(MboxContent {
            name: name.to_owned(),
            content: self.content.clone()?,
            source,
            response_tokens: self.response_tokens.clone(),
            analytics_payload: self.analytics_payload.clone(),
            click_metric_analytics_payload: self.click_analytics_payload.clone(),
        })
    }

    pub fn has_notification_tokens(&self) -> bool {
        !self.display_tokens.is_empty() || self.click_token.is_some()
    }
}

impl MboxResponse {
    pub fn decode(&self) -> DecodedMbox {
        let first_option = self.options.first();

        let content = first_option.and_then(|option| {
            let content = option.content.as_ref()?;
            match option.content_type.as_deref() {
                Some("json") => Some(Content::Json(content.clone())),
                _ => match content {
                    serde_json::Value::String(s) if s.is_empty() => None,
                    serde_json::Value::String(s) => Some(Content::Html(s.clone())),
                    serde_json::Value::Null => None,
                    other => Some(Content::Html(other.to_string())),
                },
            }
        });

        let click_metric = self.metrics.iter().find(|metric| {
            metric.metric_type.as_deref() == Some("click")
                && metric
                    .event_token
                    .as_deref()
                    .is_some_and(|token| !token.is_empty())
        });

        DecodedMbox {
            name: self.name.clone(),
            state: self.state.clone(),
            content,
            response_tokens: first_option.and_then(|option| option.response_tokens.clone()),
            analytics_payload: self
                .analytics
                .as_ref()
                .and_then(|analytics| analytics.string_payload()),
            display_tokens: self
                .options
                .iter()
                .filter_map(|option| option.event_token.clone())
                .filter(|token| !token.is_empty())
                .collect(),
            click_token: click_metric.and_then(|metric| metric.event_token.clone()),
            click_analytics_payload: click_metric
                .and_then(|metric| metric.analytics.as_ref())
                .and_then(|analytics| analytics.string_payload()),
        }
    }
}

/// A delivery response that carried no error message.
#[derive(Debug)]
pub(crate) struct DecodedResponse {
    pub raw: serde_json::Value,
    pub response: DeliveryResponse,
}

/// Decode the outcome of a delivery call.
///
/// Transport failures, non-200 statuses, undecodable bodies and error messages all become an
/// `Err`.
pub(crate) fn decode_response(result: Result<HttpResponse>) -> Result<DecodedResponse> {
    let http_response = result?;

    let raw: serde_json::Value = match serde_json::from_slice(&http_response.body) {
        Ok(raw) => raw,
        Err(err) if http_response.status == 200 => return Err(err.into()),
        Err(_) => return Err(Error::HttpStatus(http_response.status)),
    };
    if !raw.is_object() {
        return Err(Error::InvalidResponse("response is not a JSON object".to_owned()));
    }

    let response = DeliveryResponse::deserialize_from(&raw)?;
    if let Some(message) = response.message.clone().filter(|m| !m.is_empty()) {
        return Err(Error::Server(message));
    }
    if http_response.status != 200 {
        return Err(Error::HttpStatus(http_response.status));
    }

    Ok(DecodedResponse { raw, response })
}

impl DeliveryResponse {
    fn deserialize_from(raw: &serde_json::Value) -> Result<Self> {
        Ok(serde::Deserialize::deserialize(raw)?)
    }
}

/// Match response mboxes to a batch of `batch_len` requests.
///
/// Entries are matched by the index they echo back, or by their position when they echo none.
/// Echoed names are ignored. Slot `i` holds the decoded mbox for request `i`, or `None` if the
/// server returned nothing usable for it.
pub(crate) fn correlate(
    batch_len: usize,
    mboxes: &[TryParse<MboxResponse>],
) -> Vec<Option<DecodedMbox>> {
    let mut slots: Vec<Option<DecodedMbox>> = vec![None; batch_len];
    for (position, entry) in mboxes.iter().enumerate() {
        let Some(mbox) = Option::<&MboxResponse>::from(entry) else {
            log::warn!(target: "target_delivery", position; "ignoring undecodable mbox in response");
            continue;
        };
        let index = mbox
            .index
            .as_ref()
            .map_or(Some(position), |index| index.position());
        let Some(slot) = index.and_then(|index| slots.get_mut(index)) else {
            log::warn!(target: "target_delivery",
                       position,
                       mbox_name:display = mbox.name;
                       "response mbox does not match any request");
            continue;
        };
        if slot.is_some() {
            log::debug!(target: "target_delivery",
                        position,
                        mbox_name:display = mbox.name;
                        "ignoring duplicate response mbox");
            continue;
        }
        *slot = Some(mbox.decode());
    }
    slots
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use crate::{request::Content, transport::HttpResponse, wire::DeliveryResponse, Error};

    use super::{correlate, decode_response};

    fn mboxes(value: serde_json::Value) -> DeliveryResponse {
        serde_json::from_value(json!({"execute": {"mboxes": value}})).unwrap()
    }

    #[test]
    fn decode_full_mbox() {
        let response: DeliveryResponse = serde_json::from_reader(
            std::fs::File::open("tests/data/responses/execute.json").unwrap(),
        )
        .unwrap();
        let slots = correlate(2, &response.execute.unwrap().mboxes);

        let first = slots[0].as_ref().unwrap();
        assert_eq!(first.name, "mbox0");
        assert_eq!(first.content, Some(Content::Html("<p>hero</p>".to_owned())));
        assert_eq!(first.state.as_deref(), Some("state-0"));
        assert_eq!(first.display_tokens, vec!["display-token-0".to_owned()]);
        assert_eq!(first.click_token.as_deref(), Some("click-token-0"));
        assert_eq!(
            first.analytics_payload,
            Some(HashMap::from([
                ("pe".to_owned(), "tnt".to_owned()),
                ("tnta".to_owned(), "331289:0:0|2".to_owned()),
            ]))
        );
        assert_eq!(
            first.click_analytics_payload,
            Some(HashMap::from([
                ("pe".to_owned(), "tnt".to_owned()),
                ("tnta".to_owned(), "331289:0:0|32767".to_owned()),
            ]))
        );
        assert_eq!(
            first.response_tokens.as_ref().unwrap()["activity.id"],
            json!("331289")
        );

        let second = slots[1].as_ref().unwrap();
        assert_eq!(second.content, Some(Content::Json(json!({"flag": true}))));
        assert_eq!(second.click_token, None);
    }

    #[test]
    fn correlate_by_index_not_name() {
        let response = mboxes(json!([
            {"name": "same", "index": "1", "options": [{"content": "second"}]},
            {"name": "same", "index": 0, "options": [{"content": "first"}]},
        ]));
        let slots = correlate(2, &response.execute.unwrap().mboxes);

        assert_eq!(
            slots[0].as_ref().unwrap().content,
            Some(Content::Html("first".to_owned()))
        );
        assert_eq!(
            slots[1].as_ref().unwrap().content,
            Some(Content::Html("second".to_owned()))
        );
    }

    #[test]
    fn correlate_falls_back_to_position() {
        let response = mboxes(json!([
            {"name": "a", "options": [{"content": "a"}]},
            {"name": "b", "options": [{"content": "b"}]},
        ]));
        let slots = correlate(2, &response.execute.unwrap().mboxes);
        assert_eq!(slots[1].as_ref().unwrap().name, "b");
    }

    #[test]
    fn correlate_ignores_out_of_range_and_duplicates() {
        let response = mboxes(json!([
            {"name": "a", "index": 5, "options": [{"content": "x"}]},
            {"name": "a", "index": 0, "options": [{"content": "first"}]},
            {"name": "a", "index": 0, "options": [{"content": "again"}]},
        ]));
        let slots = correlate(2, &response.execute.unwrap().mboxes);

        assert_eq!(
            slots[0].as_ref().unwrap().content,
            Some(Content::Html("first".to_owned()))
        );
        assert!(slots[1].is_none());
    }

    #[test]
    fn empty_content_is_not_decodable() {
        let response = mboxes(json!([
            {"name": "a", "index": 0, "options": [{"content": "", "type": "html"}]},
            {"name": "b", "index": 1},
        ]));
        let slots = correlate(2, &response.execute.unwrap().mboxes);
        assert_eq!(slots[0].as_ref().unwrap().content, None);
        assert_eq!(slots[1].as_ref().unwrap().content, None);
    }

    #[test]
    fn error_message_is_server_error() {
        let result = decode_response(Ok(HttpResponse::ok(&json!({"message": "failure"}))));
        match result {
            Err(Error::Server(message)) => assert_eq!(message, "failure"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn error_message_on_non_200_is_server_error() {
        let result = decode_response(Ok(HttpResponse {
            status: 400,
            body: br#"{"status": 400, "message": "Invalid request"}"#.to_vec(),
        }));
        assert!(matches!(result, Err(Error::Server(m)) if m == "Invalid request"));
    }

    #[test]
    fn non_json_failure_is_status_error() {
        let result = decode_response(Ok(HttpResponse {
            status: 503,
            body: b"<html>unavailable</html>".to_vec(),
        }));
        assert!(matches!(result, Err(Error::HttpStatus(503))));
    }

    #[test]
    fn malformed_body_is_invalid_response() {
        let result = decode_response(Ok(HttpResponse {
            status: 200,
            body: b"{not json".to_vec(),
        }));
        assert!(matches!(result, Err(Error::InvalidResponse(_))));
    }

    #[test]
    fn transport_error_is_propagated() {
        assert!(matches!(decode_response(Err(Error::Timeout)), Err(Error::Timeout)));
    }
}
