use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{completion::Completion, parameters::TargetParameters};

/// Content of an mbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum Content {
    /// `html` content, or the caller's default content.
    Html(String),
    /// `json` content.
    Json(serde_json::Value),
}

impl Content {
    /// Returns the content as a string if it is html.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Content::Html(s) => Some(s),
            Content::Json(_) => None,
        }
    }

    /// Returns the content as JSON if it is json.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Content::Json(v) => Some(v),
            Content::Html(_) => None,
        }
    }

    /// Render content as a string. JSON content is serialized.
    pub fn to_content_string(&self) -> String {
        match self {
            Content::Html(s) => s.clone(),
            Content::Json(v) => v.to_string(),
        }
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Self::Html(value.to_owned())
    }
}

/// Where delivered content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    /// Fetched from the delivery API.
    Network,
    /// Served from the prefetch cache.
    Cache,
    /// Caller's default content, used on any failure or when the server had no offer.
    Default,
}

/// Result of a location request, handed to its callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MboxContent {
    /// Mbox name of the originating request.
    pub name: String,
    /// Content.
    pub content: Content,
    /// Where the content came from.
    pub source: ContentSource,
    /// Response tokens of the first option.
    pub response_tokens: Option<serde_json::Map<String, serde_json::Value>>,
    /// Analytics for Target payload of the mbox.
    pub analytics_payload: Option<HashMap<String, String>>,
    /// Analytics for Target payload attached to the click metric.
    pub click_metric_analytics_payload: Option<HashMap<String, String>>,
}

impl MboxContent {
    pub(crate) fn default_content(name: &str, default_content: &str) -> Self {
        MboxContent {
            name: name.to_owned(),
            content: Content::Html(default_content.to_owned()),
            source: ContentSource::Default,
            response_tokens: None,
            analytics_payload: None,
            click_metric_analytics_payload: None,
        }
    }

    /// Returns `true` if the caller's default content was delivered.
    pub fn is_default(&self) -> bool {
        self.source == ContentSource::Default
    }
}

pub(crate) type ContentCompletion = Completion<MboxContent>;

/// A request for the content of one location (mbox).
///
/// The callback is invoked exactly once, with either fetched, cached or default content.
///
/// ```
/// # use target_delivery::TargetRequest;
/// let request = TargetRequest::new("homepage-hero", "default hero")
///     .with_callback(|content| println!("{:?}", content.content));
/// ```
pub struct TargetRequest {
    pub(crate) name: String,
    pub(crate) default_content: String,
    pub(crate) parameters: Option<TargetParameters>,
    pub(crate) callback: Option<Box<dyn FnOnce(MboxContent) + Send>>,
}

impl TargetRequest {
    /// Create a request for mbox `name` with `default_content` used as fallback.
    pub fn new(name: impl Into<String>, default_content: impl Into<String>) -> Self {
        TargetRequest {
            name: name.into(),
            default_content: default_content.into(),
            parameters: None,
            callback: None,
        }
    }

    /// Set per-request parameters. They are merged with the global parameters of the batch.
    pub fn with_parameters(mut self, parameters: TargetParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Set the callback receiving the content.
    pub fn with_callback(mut self, callback: impl FnOnce(MboxContent) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Split into its name and a guard that always delivers something to the callback.
    pub(crate) fn into_completion(self) -> (String, Option<TargetParameters>, ContentCompletion) {
        let fallback = MboxContent::default_content(&self.name, &self.default_content);
        let callback = self.callback;
        let completion = Completion::new(
            move |content| {
                if let Some(callback) = callback {
                    callback(content);
                }
            },
            fallback,
        );
        (self.name, self.parameters, completion)
    }
}

impl std::fmt::Debug for TargetRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRequest")
            .field("name", &self.name)
            .field("default_content", &self.default_content)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

/// A location to prefetch.
#[derive(Debug, Clone)]
pub struct TargetPrefetch {
    pub(crate) name: String,
    pub(crate) parameters: Option<TargetParameters>,
}

impl TargetPrefetch {
    /// Prefetch mbox `name`.
    pub fn new(name: impl Into<String>) -> Self {
        TargetPrefetch {
            name: name.into(),
            parameters: None,
        }
    }

    /// Set per-request parameters.
    pub fn with_parameters(mut self, parameters: TargetParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// Caller-built request nodes sent by [`TargetClient::execute_raw_request`].
///
/// Identity, context, property and environment nodes are always filled in from client state.
///
/// [`TargetClient::execute_raw_request`]: crate::TargetClient::execute_raw_request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRequest {
    /// `execute` node, e.g. `{"mboxes": [...]}`.
    #[serde(default)]
    pub execute: Option<serde_json::Value>,
    /// `prefetch` node.
    #[serde(default)]
    pub prefetch: Option<serde_json::Value>,
    /// `notifications` array.
    #[serde(default)]
    pub notifications: Vec<serde_json::Value>,
}

impl RawRequest {
    pub(crate) fn has_content(&self) -> bool {
        self.execute.is_some() || self.prefetch.is_some()
    }
}
