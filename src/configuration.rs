use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// Privacy status of the end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrivacyStatus {
    /// Requests are allowed.
    #[serde(rename = "optedin")]
    OptedIn,
    /// Requests are suppressed and identifiers are cleared.
    #[serde(rename = "optedout")]
    OptedOut,
    /// Requests are suppressed until the status becomes known. Identifiers can still be set.
    #[default]
    #[serde(rename = "optunknown", other)]
    Unknown,
}

/// Snapshot of delivery configuration.
///
/// Can be built in code or deserialized from the flat host configuration map:
///
/// ```
/// # use target_delivery::{PrivacyStatus, TargetConfiguration};
/// let configuration: TargetConfiguration = serde_json::from_str(r#"{
///     "target.clientCode": "acme",
///     "global.privacy": "optedin",
///     "target.timeout": 5
/// }"#).unwrap();
/// assert_eq!(configuration.client_code, "acme");
/// assert_eq!(configuration.privacy_status, PrivacyStatus::OptedIn);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TargetConfiguration {
    /// Client code identifying the account. Requests cannot be sent without it.
    #[serde(rename = "target.clientCode", default)]
    pub client_code: String,
    /// Privacy status.
    #[serde(rename = "global.privacy", default)]
    pub privacy_status: PrivacyStatus,
    /// Custom delivery host. Takes priority over the edge host learned from responses.
    #[serde(rename = "target.server", default)]
    pub server: Option<String>,
    /// Environment id. Zero means "not set".
    #[serde(rename = "target.environmentId", default)]
    pub environment_id: i64,
    /// Global property token.
    #[serde(rename = "target.propertyToken", default)]
    pub property_token: Option<String>,
    /// Network timeout for a single delivery call.
    #[serde(
        rename = "target.timeout",
        deserialize_with = "deserialize_seconds",
        default = "default_timeout"
    )]
    pub timeout: Duration,
    /// Session expires after this much time without a successful response.
    #[serde(
        rename = "target.sessionTimeout",
        deserialize_with = "deserialize_seconds",
        default = "default_session_timeout"
    )]
    pub session_timeout: Duration,
}

fn default_timeout() -> Duration {
    TargetConfiguration::DEFAULT_TIMEOUT
}

fn default_session_timeout() -> Duration {
    TargetConfiguration::DEFAULT_SESSION_TIMEOUT
}

fn deserialize_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    let seconds = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(seconds))
}

impl Default for TargetConfiguration {
    fn default() -> Self {
        TargetConfiguration {
            client_code: String::new(),
            privacy_status: PrivacyStatus::default(),
            server: None,
            environment_id: 0,
            property_token: None,
            timeout: Self::DEFAULT_TIMEOUT,
            session_timeout: Self::DEFAULT_SESSION_TIMEOUT,
        }
    }
}

impl TargetConfiguration {
    /// Default network timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Default session timeout.
    pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

    /// Create configuration for the given client code with privacy opted in.
    pub fn new(client_code: impl Into<String>) -> Self {
        TargetConfiguration {
            client_code: client_code.into(),
            privacy_status: PrivacyStatus::OptedIn,
            ..Default::default()
        }
    }

    /// Fail unless a request can be sent with this configuration.
    pub(crate) fn check_ready(&self) -> Result<()> {
        if self.client_code.is_empty() {
            return Err(Error::NoClientCode);
        }
        if self.privacy_status != PrivacyStatus::OptedIn {
            return Err(Error::OptedOut);
        }
        Ok(())
    }

    /// Host used when neither a custom server nor an edge host is known.
    pub(crate) fn default_host(&self) -> String {
        format!("{}.tt.omtrdc.net", self.client_code)
    }

    /// Custom server, if set to a non-empty value.
    pub(crate) fn custom_server(&self) -> Option<&str> {
        self.server.as_deref().filter(|server| !server.is_empty())
    }

    /// Global property token, if set to a non-empty value.
    pub(crate) fn global_property_token(&self) -> Option<&str> {
        self.property_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }
}
