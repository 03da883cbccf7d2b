use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;

use crate::{
    analytics_logger::{AnalyticsForTargetEvent, AnalyticsLogger},
    completion::Completion,
    configuration::{PrivacyStatus, TargetConfiguration},
    context::ExternalState,
    notifications::{Notification, NotificationTracker},
    parameters::TargetParameters,
    prefetch_cache::PrefetchCache,
    request::{ContentCompletion, ContentSource, RawRequest, TargetPrefetch, TargetRequest},
    request_builder::{BatchKind, RequestBuilder},
    response::{correlate, decode_response, DecodedMbox, DecodedResponse},
    state::{edge_host_from_tnt_id, IdentityState},
    transport::{HttpRequest, HttpResponse},
    Error, Result,
};

/// Invalidation counters. A response stamped with an older counter arrived after the state it
/// would update was reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Epochs {
    /// Bumped when the prefetch cache is cleared.
    cache: u64,
    /// Bumped when identifiers are reset or the user opts out.
    identity: u64,
}

/// Sends HTTP requests on behalf of the engine. Completions are reported back through
/// [`Engine::handle_completion`] with the same `request_id`.
pub(crate) trait Dispatcher {
    fn dispatch(&mut self, request_id: u64, request: HttpRequest);
}

/// A request in a sent execute batch, waiting for its content.
struct PendingMbox {
    name: String,
    parameters: TargetParameters,
    completion: ContentCompletion,
}

/// Requests waiting for a network response.
enum InFlight {
    Execute(Vec<PendingMbox>),
    Prefetch {
        batch: Vec<(String, TargetParameters)>,
        completion: Completion<Result<()>>,
    },
    Notifications,
    Raw {
        completion: Option<Completion<Result<serde_json::Value>>>,
    },
}

impl InFlight {
    fn kind(&self) -> &'static str {
        match self {
            InFlight::Execute(_) => "execute",
            InFlight::Prefetch { .. } => "prefetch",
            InFlight::Notifications => "notifications",
            InFlight::Raw { .. } => "raw",
        }
    }

    /// Deliver `err` to everyone waiting.
    fn fail(self, err: Error) {
        match self {
            // Dropping the completions delivers default content.
            InFlight::Execute(pending) => drop(pending),
            InFlight::Prefetch { completion, .. } => completion.complete(Err(err)),
            InFlight::Notifications => {}
            InFlight::Raw { completion } => {
                if let Some(completion) = completion {
                    completion.complete(Err(err));
                }
            }
        }
    }
}

/// A dispatched request and what its response is allowed to touch.
struct Outstanding {
    in_flight: InFlight,
    deadline: Instant,
    epochs: Epochs,
    /// Notifications carried by the request. Dropped once the server accepts them.
    notifications: Vec<Notification>,
}

/// Request-building, response-correlation, prefetch cache and notification engine.
///
/// The engine is single-threaded: the worker owns it and feeds it commands one at a time.
pub(crate) struct Engine {
    configuration: Arc<TargetConfiguration>,
    identity: IdentityState,
    prefetch_cache: PrefetchCache,
    tracker: NotificationTracker,
    analytics_logger: Box<dyn AnalyticsLogger + Send + Sync>,
    dispatcher: Box<dyn Dispatcher + Send>,
    in_flight: HashMap<u64, Outstanding>,
    next_request_id: u64,
    epochs: Epochs,
}

impl Engine {
    pub fn new(
        configuration: TargetConfiguration,
        mut identity: IdentityState,
        analytics_logger: Box<dyn AnalyticsLogger + Send + Sync>,
        dispatcher: Box<dyn Dispatcher + Send>,
    ) -> Self {
        identity.set_session_timeout(configuration.session_timeout);
        Engine {
            configuration: Arc::new(configuration),
            identity,
            prefetch_cache: PrefetchCache::new(),
            tracker: NotificationTracker::new(),
            analytics_logger,
            dispatcher,
            in_flight: HashMap::new(),
            next_request_id: 0,
            epochs: Epochs::default(),
        }
    }

    pub fn retrieve_location_content(
        &mut self,
        requests: Vec<TargetRequest>,
        parameters: Option<TargetParameters>,
        external: ExternalState,
    ) {
        if let Err(err) = self.configuration.check_ready() {
            log::warn!(target: "target_delivery",
                       request_count = requests.len();
                       "unable to retrieve location content, delivering default content: {}", err);
            for request in requests {
                let (_name, _parameters, completion) = request.into_completion();
                drop(completion);
            }
            return;
        }

        let now = Utc::now();
        self.identity.expire_session_if_idle(now);

        let mut batch = Vec::new();
        for request in requests {
            let (name, request_parameters, completion) = request.into_completion();
            if name.is_empty() {
                log::warn!(target: "target_delivery", "mbox name is empty, delivering default content");
                continue;
            }
            let merged = TargetParameters::merge(parameters.as_ref(), request_parameters.as_ref());

            if let Some(cached) = self.prefetch_cache.lookup(&name) {
                if let Some(content) = cached.to_content(&name, ContentSource::Cache) {
                    log::debug!(target: "target_delivery", mbox_name:display = name; "serving mbox from prefetch cache");
                    completion.complete(content);
                    // Cached content counts as displayed; the notification goes out with the
                    // next request.
                    if let Some(notification) = self.display_notification(&name, Some(&merged)) {
                        self.tracker.push(notification);
                    }
                    continue;
                }
            }

            batch.push(PendingMbox {
                name,
                parameters: merged,
                completion,
            });
        }

        if batch.is_empty() {
            return;
        }

        let mboxes: Vec<(String, TargetParameters)> = batch
            .iter()
            .map(|pending| (pending.name.clone(), pending.parameters.clone()))
            .collect();
        self.send_batch(
            BatchKind::Execute,
            &mboxes,
            &external,
            InFlight::Execute(batch),
        );
    }

    pub fn prefetch_content(
        &mut self,
        prefetches: Vec<TargetPrefetch>,
        parameters: Option<TargetParameters>,
        external: ExternalState,
        completion: Completion<Result<()>>,
    ) {
        if let Err(err) = self.configuration.check_ready() {
            log::warn!(target: "target_delivery", "unable to prefetch content: {}", err);
            completion.complete(Err(err));
            return;
        }

        self.identity.expire_session_if_idle(Utc::now());

        let batch: Vec<(String, TargetParameters)> = prefetches
            .into_iter()
            .filter(|prefetch| {
                if prefetch.name.is_empty() {
                    log::warn!(target: "target_delivery", "skipping prefetch with empty mbox name");
                }
                !prefetch.name.is_empty()
            })
            .map(|prefetch| {
                let merged =
                    TargetParameters::merge(parameters.as_ref(), prefetch.parameters.as_ref());
                (prefetch.name, merged)
            })
            .collect();

        if batch.is_empty() {
            log::warn!(target: "target_delivery", "empty prefetch request list");
            completion.complete(Err(Error::EmptyRequest));
            return;
        }

        self.send_batch(
            BatchKind::Prefetch,
            &batch.clone(),
            &external,
            InFlight::Prefetch { batch, completion },
        );
    }

    pub fn locations_displayed(
        &mut self,
        names: Vec<String>,
        parameters: Option<TargetParameters>,
        external: ExternalState,
    ) {
        if let Err(err) = self.configuration.check_ready() {
            log::debug!(target: "target_delivery", "not sending display notifications: {}", err);
            return;
        }

        let mut built = false;
        for name in names {
            match self.display_notification(&name, parameters.as_ref()) {
                Some(notification) => {
                    self.tracker.push(notification);
                    built = true;
                }
                None => {
                    log::debug!(target: "target_delivery",
                                mbox_name:display = name;
                                "no display token for mbox, was it fetched or prefetched?");
                }
            }
        }

        if built {
            self.send_notifications(&external);
        }
    }

    pub fn location_clicked(
        &mut self,
        name: String,
        parameters: Option<TargetParameters>,
        external: ExternalState,
    ) {
        if let Err(err) = self.configuration.check_ready() {
            log::debug!(target: "target_delivery", "not sending click notification: {}", err);
            return;
        }

        let Some(notification) =
            self.tracker
                .click_notification(&name, parameters.as_ref(), Utc::now())
        else {
            log::debug!(target: "target_delivery",
                        mbox_name:display = name;
                        "no click metric for mbox, was it fetched or prefetched?");
            return;
        };

        let click_payload = self
            .tracker
            .record_for(&name)
            .and_then(|record| record.mbox.click_analytics_payload.clone());
        if let Some(payload) = click_payload {
            self.log_analytics(&name, &payload);
        }

        self.tracker.push(notification);
        self.send_notifications(&external);
    }

    pub fn execute_raw_request(
        &mut self,
        request: RawRequest,
        external: ExternalState,
        completion: Option<Completion<Result<serde_json::Value>>>,
    ) {
        if let Err(err) = self.configuration.check_ready() {
            log::warn!(target: "target_delivery", "unable to execute raw request: {}", err);
            if let Some(completion) = completion {
                completion.complete(Err(err));
            }
            return;
        }

        self.identity.expire_session_if_idle(Utc::now());

        // Only content requests hand a response back.
        let completion = match completion {
            Some(completion) if !request.has_content() => {
                completion.complete(Err(Error::EmptyRequest));
                None
            }
            completion => completion,
        };

        let configuration = Arc::clone(&self.configuration);
        let builder = RequestBuilder::new(&configuration, &external);
        let http_request = builder
            .build_raw(
                &self.identity,
                request.execute.as_ref(),
                request.prefetch.as_ref(),
                &request.notifications,
            )
            .and_then(|raw| builder.http_request(&mut self.identity, &raw));
        let in_flight = InFlight::Raw { completion };
        match http_request {
            Ok(http_request) => self.dispatch(http_request, in_flight, Vec::new()),
            Err(err) => {
                log::warn!(target: "target_delivery", "failed to build raw request: {}", err);
                in_flight.fail(err);
            }
        }
    }

    pub fn set_third_party_id(&mut self, third_party_id: Option<String>) {
        if self.is_opted_out() {
            log::debug!(target: "target_delivery", "privacy is opted out, ignoring thirdPartyId");
            return;
        }
        self.identity.set_third_party_id(third_party_id.as_deref());
    }

    pub fn third_party_id(&self) -> Option<String> {
        self.identity.third_party_id().map(str::to_owned)
    }

    /// Set tntId and derive the edge host from its location hint.
    pub fn set_tnt_id(&mut self, tnt_id: Option<String>) {
        if self.is_opted_out() {
            log::debug!(target: "target_delivery", "privacy is opted out, ignoring tntId");
            return;
        }
        if !self.identity.set_tnt_id(tnt_id.as_deref()) {
            return;
        }
        let edge_host = tnt_id.as_deref().and_then(edge_host_from_tnt_id);
        self.identity.set_edge_host(edge_host.as_deref());
    }

    pub fn tnt_id(&self) -> Option<String> {
        self.identity.tnt_id().map(str::to_owned)
    }

    pub fn set_session_id(&mut self, session_id: Option<String>) {
        if self.is_opted_out() {
            log::debug!(target: "target_delivery", "privacy is opted out, ignoring sessionId");
            return;
        }
        self.identity.set_session_id(session_id.as_deref(), Utc::now());
    }

    pub fn session_id(&mut self) -> String {
        self.identity.expire_session_if_idle(Utc::now());
        self.identity.session_id()
    }

    pub fn reset_experience(&mut self) {
        log::debug!(target: "target_delivery", "resetting experience");
        self.identity.reset();
        self.epochs.identity += 1;
        self.clear_prefetch_cache();
    }

    /// Clear the cache. Responses to prefetches already in flight are not cached.
    pub fn clear_prefetch_cache(&mut self) {
        self.prefetch_cache.clear();
        self.epochs.cache += 1;
    }

    pub fn update_configuration(&mut self, configuration: TargetConfiguration) {
        if configuration.client_code != self.configuration.client_code {
            self.identity.set_edge_host(None);
        }
        self.identity
            .set_session_timeout(configuration.session_timeout);

        if configuration.privacy_status == PrivacyStatus::OptedOut {
            log::debug!(target: "target_delivery", "privacy opted out, clearing identifiers");
            self.reset_experience();
            self.tracker.clear();
        }

        self.configuration = Arc::new(configuration);
    }

    /// Earliest deadline among in-flight requests.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight
            .values()
            .map(|outstanding| outstanding.deadline)
            .min()
    }

    /// Fail every in-flight request whose deadline has passed.
    pub fn expire_in_flight(&mut self, now: Instant) {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, outstanding)| outstanding.deadline <= now)
            .map(|(request_id, _)| *request_id)
            .collect();
        for request_id in expired {
            if let Some(outstanding) = self.in_flight.remove(&request_id) {
                log::warn!(target: "target_delivery",
                           request_id,
                           kind = outstanding.in_flight.kind();
                           "request timed out");
                self.fail(outstanding, Error::Timeout);
            }
        }
    }

    pub fn handle_completion(&mut self, request_id: u64, result: Result<HttpResponse>) {
        let Some(outstanding) = self.in_flight.remove(&request_id) else {
            log::debug!(target: "target_delivery", request_id; "ignoring response to expired request");
            return;
        };

        let DecodedResponse { raw, response } = match decode_response(result) {
            Ok(decoded) => decoded,
            Err(err) => {
                log::warn!(target: "target_delivery",
                           request_id,
                           kind = outstanding.in_flight.kind();
                           "delivery request failed: {}", err);
                self.fail(outstanding, err);
                return;
            }
        };

        log::trace!(target: "target_delivery",
                    request_id,
                    server_request_id:? = response.request_id,
                    body:serde = raw;
                    "received delivery response");

        let Outstanding { in_flight, epochs, .. } = outstanding;
        // After a reset or opt-out the response belongs to the previous visitor.
        let identity_current = epochs.identity == self.epochs.identity;
        let cache_current = epochs.cache == self.epochs.cache;

        if identity_current {
            if let Some(tnt_id) = response.id.as_ref().and_then(|id| id.tnt_id.as_deref()) {
                self.identity.set_tnt_id(Some(tnt_id));
            }
            if let Some(edge_host) = response.edge_host.as_deref() {
                self.identity.set_edge_host(Some(edge_host));
            }
            self.identity.touch_session(Utc::now());
        } else {
            log::debug!(target: "target_delivery", request_id; "identifiers were reset, not applying response state");
        }

        match in_flight {
            InFlight::Execute(pending) => {
                let mboxes = response
                    .execute
                    .as_ref()
                    .map_or(&[][..], |execute| &execute.mboxes[..]);
                let decoded = correlate(pending.len(), mboxes);
                for (pending, decoded) in pending.into_iter().zip(decoded) {
                    self.deliver(pending, decoded, identity_current);
                }
            }
            InFlight::Prefetch { batch, completion } => {
                let Some(prefetch) = response.prefetch.as_ref().filter(|p| !p.mboxes.is_empty())
                else {
                    log::warn!(target: "target_delivery", request_id; "no prefetch mboxes in response");
                    completion.complete(Err(Error::NoPrefetchMboxes));
                    return;
                };
                if !cache_current || !identity_current {
                    log::debug!(target: "target_delivery", request_id; "prefetch cache was cleared, discarding prefetched mboxes");
                    completion.complete(Ok(()));
                    return;
                }
                let decoded = correlate(batch.len(), &prefetch.mboxes);
                for ((name, parameters), decoded) in batch.iter().zip(decoded) {
                    let Some(decoded) = decoded else {
                        continue;
                    };
                    self.tracker.record(name, &decoded, parameters);
                    self.prefetch_cache.store(name, decoded);
                }
                log::debug!(target: "target_delivery",
                            cached = self.prefetch_cache.len();
                            "prefetch completed");
                completion.complete(Ok(()));
            }
            InFlight::Notifications => {
                log::debug!(target: "target_delivery", request_id; "notifications sent");
            }
            InFlight::Raw { completion } => {
                if let Some(completion) = completion {
                    completion.complete(Ok(raw));
                }
            }
        }
    }

    /// Complete `pending` with its decoded mbox. `record` controls whether event tokens and A4T
    /// payloads of the mbox are kept.
    fn deliver(&mut self, pending: PendingMbox, decoded: Option<DecodedMbox>, record: bool) {
        let PendingMbox {
            name,
            parameters,
            completion,
        } = pending;
        let Some(decoded) = decoded else {
            log::debug!(target: "target_delivery", mbox_name:display = name; "no offer for mbox, delivering default content");
            return;
        };

        if record {
            self.tracker.record(&name, &decoded, &parameters);
            if let Some(payload) = &decoded.analytics_payload {
                self.log_analytics(&name, payload);
            }
        }

        match decoded.to_content(&name, ContentSource::Network) {
            Some(content) => completion.complete(content),
            None => {
                log::debug!(target: "target_delivery", mbox_name:display = name; "mbox has no content, delivering default content");
            }
        }
    }

    /// Build a display notification for `name`, logging its A4T payload.
    fn display_notification(
        &mut self,
        name: &str,
        parameters: Option<&TargetParameters>,
    ) -> Option<Notification> {
        let notification = self
            .tracker
            .display_notification(name, parameters, Utc::now())?;
        let payload = self
            .tracker
            .record_for(name)
            .and_then(|record| record.mbox.analytics_payload.clone());
        if let Some(payload) = payload {
            self.log_analytics(name, &payload);
        }
        Some(notification)
    }

    fn log_analytics(&mut self, name: &str, payload: &HashMap<String, String>) {
        let session_id = self.identity.session_id();
        let event = AnalyticsForTargetEvent::new(name, payload, &session_id);
        log::trace!(target: "target_delivery", event:serde = event; "logging A4T event");
        self.analytics_logger.log_analytics(event);
    }

    fn send_notifications(&mut self, external: &ExternalState) {
        self.identity.expire_session_if_idle(Utc::now());
        self.send_batch(BatchKind::Execute, &[], external, InFlight::Notifications);
    }

    /// Build a request for `batch` with pending notifications attached and dispatch it. On
    /// failure `in_flight` is failed and pending notifications are kept.
    ///
    /// Attached notifications leave the pending queue while the request is in flight and return
    /// to it if the request fails.
    fn send_batch(
        &mut self,
        kind: BatchKind,
        batch: &[(String, TargetParameters)],
        external: &ExternalState,
        in_flight: InFlight,
    ) {
        let configuration = Arc::clone(&self.configuration);
        let builder = RequestBuilder::new(&configuration, external);
        let http_request = builder
            .build(&self.identity, kind, batch, self.tracker.pending().to_vec())
            .and_then(|request| builder.http_request(&mut self.identity, &request));
        match http_request {
            Ok(http_request) => {
                let flushed = self.tracker.flush();
                log::debug!(target: "target_delivery",
                            kind = in_flight.kind(),
                            mbox_count = batch.len(),
                            notification_count = flushed.len();
                            "sending delivery request");
                self.dispatch(http_request, in_flight, flushed);
            }
            Err(err) => {
                log::warn!(target: "target_delivery", kind = in_flight.kind(); "failed to build delivery request: {}", err);
                in_flight.fail(err);
            }
        }
    }

    fn dispatch(
        &mut self,
        http_request: HttpRequest,
        in_flight: InFlight,
        notifications: Vec<Notification>,
    ) {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        log::trace!(target: "target_delivery",
                    request_id,
                    url:display = http_request.url,
                    body:serde = http_request.body;
                    "dispatching delivery request");

        let outstanding = Outstanding {
            in_flight,
            deadline: Instant::now() + self.timeout(),
            epochs: self.epochs,
            notifications,
        };
        self.in_flight.insert(request_id, outstanding);
        self.dispatcher.dispatch(request_id, http_request);
    }

    /// Fail a request. Its notifications go back to the pending queue unless the server rejected
    /// them or the visitor was reset meanwhile.
    fn fail(&mut self, outstanding: Outstanding, err: Error) {
        let Outstanding {
            in_flight,
            epochs,
            notifications,
            ..
        } = outstanding;
        let rejected = matches!(
            &err,
            Error::Server(message) if message.to_lowercase().contains("notification")
        );
        if !notifications.is_empty() && !rejected && epochs.identity == self.epochs.identity {
            log::debug!(target: "target_delivery",
                        notification_count = notifications.len();
                        "keeping notifications of failed request");
            self.tracker.requeue(notifications);
        }
        in_flight.fail(err);
    }

    fn timeout(&self) -> Duration {
        self.configuration.timeout
    }

    fn is_opted_out(&self) -> bool {
        self.configuration.privacy_status == PrivacyStatus::OptedOut
    }
}
