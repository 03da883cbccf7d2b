use std::collections::HashMap;

use serde::Serialize;

/// Read-only snapshot of state owned by other parts of the host application.
///
/// The snapshot is captured on the caller's thread when an operation is submitted, so the worker
/// never reaches back into host state.
#[derive(Debug, Clone, Default)]
pub struct ExternalState {
    /// Visitor identity service data.
    pub visitor: VisitorIdentity,
    /// Lifecycle metrics, keyed by lifecycle name (`launches`, `osversion`, ...).
    pub lifecycle: HashMap<String, String>,
    /// Device and application information.
    pub device: DeviceContext,
}

/// Lifecycle keys and the context data keys they are sent as.
const LIFECYCLE_CONTEXT_DATA_KEYS: &[(&str, &str)] = &[
    ("advertisingidentifier", "a.adid"),
    ("appid", "a.AppID"),
    ("carriername", "a.CarrierName"),
    ("crashevent", "a.CrashEvent"),
    ("dailyenguserevent", "a.DailyEngUserEvent"),
    ("dayofweek", "a.DayOfWeek"),
    ("dayssincefirstuse", "a.DaysSinceFirstUse"),
    ("dayssincelastuse", "a.DaysSinceLastUse"),
    ("dayssincelastupgrade", "a.DaysSinceLastUpgrade"),
    ("devicename", "a.DeviceName"),
    ("resolution", "a.Resolution"),
    ("hourofday", "a.HourOfDay"),
    ("ignoredsessionlength", "a.ignoredSessionLength"),
    ("installdate", "a.InstallDate"),
    ("installevent", "a.InstallEvent"),
    ("launchevent", "a.LaunchEvent"),
    ("launches", "a.Launches"),
    ("launchessinceupgrade", "a.LaunchesSinceUpgrade"),
    ("locale", "a.locale"),
    ("monthlyenguserevent", "a.MonthlyEngUserEvent"),
    ("osversion", "a.OSVersion"),
    ("prevsessionlength", "a.PrevSessionLength"),
    ("runmode", "a.RunMode"),
    ("upgradeevent", "a.UpgradeEvent"),
];

impl ExternalState {
    /// Lifecycle data renamed to context data keys. Unknown keys are passed through unchanged and
    /// empty values are dropped.
    pub(crate) fn lifecycle_context_data(&self) -> HashMap<String, String> {
        self.lifecycle
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| {
                let key = LIFECYCLE_CONTEXT_DATA_KEYS
                    .iter()
                    .find(|(lifecycle_key, _)| *lifecycle_key == key.as_str())
                    .map_or_else(|| key.clone(), |(_, context_key)| (*context_key).to_owned());
                (key, value.clone())
            })
            .collect()
    }
}

/// Visitor identity as known by the host identity service.
#[derive(Debug, Clone, Default)]
pub struct VisitorIdentity {
    /// Experience Cloud visitor id.
    pub marketing_cloud_id: Option<String>,
    /// Customer ids synced by the app.
    pub customer_ids: Vec<CustomerId>,
    /// Audience manager blob.
    pub blob: Option<String>,
    /// Audience manager location hint.
    pub location_hint: Option<String>,
}

/// A customer id synced with the identity service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerId {
    /// Id value.
    pub id: String,
    /// Integration code (id type).
    pub integration_code: String,
    /// Authentication state.
    pub authenticated_state: AuthenticatedState,
}

/// Authentication state of a [`CustomerId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticatedState {
    /// Unknown.
    #[default]
    Unknown,
    /// Authenticated.
    Authenticated,
    /// Logged out.
    LoggedOut,
}

/// Screen orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Portrait.
    Portrait,
    /// Landscape.
    Landscape,
}

/// Device and application details sent in the request context.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    /// Platform name. Defaults to the target OS name.
    pub platform_type: String,
    /// Device name, including manufacturer.
    pub device_name: Option<String>,
    /// Device type, e.g. `phone` or `tablet`.
    pub device_type: Option<String>,
    /// Application package id.
    pub application_id: Option<String>,
    /// Application name.
    pub application_name: Option<String>,
    /// Application version.
    pub application_version: Option<String>,
    /// Screen width in pixels.
    pub screen_width: Option<u32>,
    /// Screen height in pixels.
    pub screen_height: Option<u32>,
    /// Screen orientation.
    pub orientation: Option<Orientation>,
    /// User agent.
    pub user_agent: Option<String>,
}

impl Default for DeviceContext {
    fn default() -> Self {
        DeviceContext {
            platform_type: std::env::consts::OS.to_owned(),
            device_name: None,
            device_type: None,
            application_id: None,
            application_name: None,
            application_version: None,
            screen_width: None,
            screen_height: None,
            orientation: None,
            user_agent: None,
        }
    }
}

/// Supplies [`ExternalState`] snapshots.
///
/// A blanket implementation is provided for closures:
///
/// ```
/// # use target_delivery::{ClientConfig, ExternalState};
/// let mut config = ClientConfig::from_client_code("acme");
/// config.external_state_provider(|| ExternalState::default());
/// ```
pub trait ExternalStateProvider {
    /// Capture the current external state.
    fn external_state(&self) -> ExternalState;
}

pub(crate) struct NoopExternalStateProvider;
impl ExternalStateProvider for NoopExternalStateProvider {
    fn external_state(&self) -> ExternalState {
        ExternalState::default()
    }
}

impl<T: Fn() -> ExternalState> ExternalStateProvider for T {
    fn external_state(&self) -> ExternalState {
        self()
    }
}
