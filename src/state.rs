use std::{sync::OnceLock, time::Duration};

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::{configuration::TargetConfiguration, data_store::DataStore};

const TNT_ID_KEY: &str = "TNT_ID";
const THIRD_PARTY_ID_KEY: &str = "THIRD_PARTY_ID";
const SESSION_ID_KEY: &str = "SESSION_ID";
const SESSION_TIMESTAMP_KEY: &str = "SESSION_TIMESTAMP";
const EDGE_HOST_KEY: &str = "EDGE_HOST";

/// Identity and session state: tntId, thirdPartyId, sessionId and edgeHost.
///
/// Every mutation is written through to the [`DataStore`], so the state resumes after a restart.
pub(crate) struct IdentityState {
    store: Box<dyn DataStore + Send>,
    tnt_id: Option<String>,
    third_party_id: Option<String>,
    session_id: Option<String>,
    /// Time of the last successful response, in seconds since epoch.
    session_timestamp: Option<i64>,
    edge_host: Option<String>,
    session_timeout: Duration,
}

impl IdentityState {
    pub fn load(store: Box<dyn DataStore + Send>) -> Self {
        let read = |key: &str| store.get(key).filter(|value| !value.is_empty());
        IdentityState {
            tnt_id: read(TNT_ID_KEY),
            third_party_id: read(THIRD_PARTY_ID_KEY),
            session_id: read(SESSION_ID_KEY),
            session_timestamp: read(SESSION_TIMESTAMP_KEY).and_then(|value| value.parse().ok()),
            edge_host: read(EDGE_HOST_KEY),
            session_timeout: TargetConfiguration::DEFAULT_SESSION_TIMEOUT,
            store,
        }
    }

    pub fn tnt_id(&self) -> Option<&str> {
        self.tnt_id.as_deref()
    }

    pub fn third_party_id(&self) -> Option<&str> {
        self.third_party_id.as_deref()
    }

    pub fn edge_host(&self) -> Option<&str> {
        self.edge_host.as_deref()
    }

    pub fn set_session_timeout(&mut self, session_timeout: Duration) {
        self.session_timeout = session_timeout;
    }

    /// Set tntId. Returns `false` if the value did not change.
    pub fn set_tnt_id(&mut self, tnt_id: Option<&str>) -> bool {
        let tnt_id = non_empty(tnt_id);
        if self.tnt_id.as_deref() == tnt_id {
            return false;
        }
        self.tnt_id = tnt_id.map(str::to_owned);
        self.persist(TNT_ID_KEY, tnt_id);
        true
    }

    pub fn set_third_party_id(&mut self, third_party_id: Option<&str>) {
        let third_party_id = non_empty(third_party_id);
        if self.third_party_id.as_deref() == third_party_id {
            return;
        }
        self.third_party_id = third_party_id.map(str::to_owned);
        self.persist(THIRD_PARTY_ID_KEY, third_party_id);
    }

    pub fn set_edge_host(&mut self, edge_host: Option<&str>) {
        let edge_host = non_empty(edge_host);
        if self.edge_host.as_deref() == edge_host {
            return;
        }
        self.edge_host = edge_host.map(str::to_owned);
        self.persist(EDGE_HOST_KEY, edge_host);
    }

    /// Current session id, generating a new one if there is none.
    pub fn session_id(&mut self) -> String {
        if let Some(session_id) = &self.session_id {
            return session_id.clone();
        }
        let session_id = uuid::Uuid::new_v4().to_string();
        log::debug!(target: "target_delivery", session_id:display = session_id; "generated new session id");
        self.persist(SESSION_ID_KEY, Some(&session_id));
        self.session_id = Some(session_id.clone());
        session_id
    }

    /// Set session id. An empty value resets the session; the same value only refreshes the
    /// session timestamp.
    pub fn set_session_id(&mut self, session_id: Option<&str>, now: DateTime<Utc>) {
        let Some(session_id) = non_empty(session_id) else {
            self.reset_session();
            return;
        };
        if self.session_id.as_deref() != Some(session_id) {
            self.session_id = Some(session_id.to_owned());
            self.persist(SESSION_ID_KEY, Some(session_id));
        }
        self.touch_session(now);
    }

    /// Record a successful exchange with the server.
    pub fn touch_session(&mut self, now: DateTime<Utc>) {
        let timestamp = now.timestamp();
        self.session_timestamp = Some(timestamp);
        self.persist(SESSION_TIMESTAMP_KEY, Some(&timestamp.to_string()));
    }

    /// Reset the session and edge host if the session has been idle for longer than the session
    /// timeout. Returns `true` if the session expired.
    pub fn expire_session_if_idle(&mut self, now: DateTime<Utc>) -> bool {
        let Some(timestamp) = self.session_timestamp else {
            return false;
        };
        let idle_seconds = now.timestamp().saturating_sub(timestamp);
        if idle_seconds < 0 || (idle_seconds as u64) < self.session_timeout.as_secs() {
            return false;
        }
        log::debug!(target: "target_delivery", idle_seconds; "session expired");
        self.reset_session();
        self.set_edge_host(None);
        true
    }

    pub fn reset_session(&mut self) {
        self.session_id = None;
        self.session_timestamp = None;
        self.persist(SESSION_ID_KEY, None);
        self.persist(SESSION_TIMESTAMP_KEY, None);
    }

    /// Forget every identifier.
    pub fn reset(&mut self) {
        self.reset_session();
        self.set_tnt_id(None);
        self.set_third_party_id(None);
        self.set_edge_host(None);
    }

    fn persist(&mut self, key: &str, value: Option<&str>) {
        match non_empty(value) {
            Some(value) => self.store.set(key, value),
            None => self.store.remove(key),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

/// Derive the edge host from the location hint embedded in a tntId.
///
/// A tntId looks like `<uuid>.<hint>_<n>`, for example
/// `66E5C681-4F70-41A2-86AE-F1E151443B10.35_0`, which routes to `mboxedge35.tt.omtrdc.net`.
pub(crate) fn edge_host_from_tnt_id(tnt_id: &str) -> Option<String> {
    static LOCATION_HINT: OnceLock<Option<Regex>> = OnceLock::new();
    let regex = LOCATION_HINT
        .get_or_init(|| Regex::new(r"^[^.]+\.(\d+)_\d+$").ok())
        .as_ref()?;
    let hint = regex.captures(tnt_id)?.get(1)?.as_str();
    Some(format!("mboxedge{hint}.tt.omtrdc.net"))
}
