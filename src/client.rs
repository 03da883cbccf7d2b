use std::sync::{mpsc, Arc};

use crate::{
    completion::Completion,
    state::IdentityState,
    worker::{Command, Identifier, WorkerThread},
    AnalyticsLogger, Error, ExternalStateProvider, RawRequest, Result,
    TargetConfiguration, TargetParameters, TargetPrefetch, TargetRequest, Transport,
};

/// A client for the Target delivery API.
///
/// In order to create a client instance, first create [`ClientConfig`](crate::ClientConfig).
///
/// All operations are queued to a worker thread owned by the client and processed in submission
/// order. Content operations return immediately and report through callbacks, which run on the
/// worker thread. Callbacks must not call the blocking getters ([`TargetClient::get_tnt_id`] and
/// friends) as that would deadlock the worker.
///
/// # Examples
/// ```no_run
/// # use target_delivery::{ClientConfig, TargetRequest};
/// let client = ClientConfig::from_client_code("acme").to_client()?;
/// client.retrieve_location_content(
///     vec![TargetRequest::new("homepage-hero", "default hero")
///         .with_callback(|content| println!("{}", content.content.to_content_string()))],
///     None,
/// );
/// # client.shutdown()?;
/// # Ok::<(), target_delivery::Error>(())
/// ```
pub struct TargetClient {
    worker: WorkerThread,
    external_state_provider: Box<dyn ExternalStateProvider + Send + Sync>,
}

impl TargetClient {
    pub(crate) fn start(
        configuration: TargetConfiguration,
        identity: IdentityState,
        analytics_logger: Box<dyn AnalyticsLogger + Send + Sync>,
        transport: Arc<dyn Transport + Send + Sync>,
        external_state_provider: Box<dyn ExternalStateProvider + Send + Sync>,
    ) -> Result<TargetClient> {
        let worker = WorkerThread::start(configuration, identity, analytics_logger, transport)?;
        Ok(TargetClient {
            worker,
            external_state_provider,
        })
    }

    /// Retrieve content for a batch of locations.
    ///
    /// Each request's callback is invoked exactly once: with content from the prefetch cache, with
    /// content from the server, or with its default content on any failure. `parameters` are
    /// merged with each request's own parameters, group by group, the request's groups winning.
    pub fn retrieve_location_content(
        &self,
        requests: Vec<TargetRequest>,
        parameters: Option<TargetParameters>,
    ) {
        self.submit(Command::Retrieve {
            requests,
            parameters,
            external: self.external_state_provider.external_state(),
        });
    }

    /// Prefetch content for a batch of locations into the cache.
    ///
    /// `callback` receives `Ok(())` once the content is cached, or the error that prevented it.
    pub fn prefetch_content(
        &self,
        prefetches: Vec<TargetPrefetch>,
        parameters: Option<TargetParameters>,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.submit(Command::Prefetch {
            prefetches,
            parameters,
            external: self.external_state_provider.external_state(),
            completion: Completion::new(callback, Err(Error::WorkerStopped)),
        });
    }

    /// Notify that previously fetched or prefetched locations were displayed.
    ///
    /// Locations that were never fetched are skipped.
    pub fn locations_displayed(&self, names: Vec<String>, parameters: Option<TargetParameters>) {
        self.submit(Command::Displayed {
            names,
            parameters,
            external: self.external_state_provider.external_state(),
        });
    }

    /// Notify that a previously fetched or prefetched location was clicked.
    ///
    /// Nothing is sent if the location carries no click metric.
    pub fn location_clicked(&self, name: impl Into<String>, parameters: Option<TargetParameters>) {
        self.submit(Command::Clicked {
            name: name.into(),
            parameters,
            external: self.external_state_provider.external_state(),
        });
    }

    /// Send caller-built `execute`/`prefetch`/`notifications` nodes.
    ///
    /// `callback` receives the raw response JSON when the request carried `execute` or `prefetch`
    /// nodes. Notification-only requests report `Err(Error::EmptyRequest)` immediately.
    pub fn execute_raw_request(
        &self,
        request: RawRequest,
        callback: impl FnOnce(Result<serde_json::Value>) + Send + 'static,
    ) {
        self.submit(Command::Raw {
            request,
            external: self.external_state_provider.external_state(),
            completion: Some(Completion::new(callback, Err(Error::WorkerStopped))),
        });
    }

    /// Send caller-built notifications.
    pub fn send_raw_notifications(&self, notifications: Vec<serde_json::Value>) {
        self.submit(Command::Raw {
            request: RawRequest {
                notifications,
                ..Default::default()
            },
            external: self.external_state_provider.external_state(),
            completion: None,
        });
    }

    /// Set the third-party id. `None` or an empty string clears it.
    pub fn set_third_party_id(&self, third_party_id: Option<&str>) {
        self.submit(Command::Set(
            Identifier::ThirdPartyId,
            third_party_id.map(str::to_owned),
        ));
    }

    /// Get the third-party id. Blocks until queued operations are processed.
    pub fn get_third_party_id(&self) -> Result<Option<String>> {
        self.get(Identifier::ThirdPartyId)
    }

    /// Set the tntId. The edge host is derived from its location hint.
    pub fn set_tnt_id(&self, tnt_id: Option<&str>) {
        self.submit(Command::Set(Identifier::TntId, tnt_id.map(str::to_owned)));
    }

    /// Get the tntId. Blocks until queued operations are processed.
    pub fn get_tnt_id(&self) -> Result<Option<String>> {
        self.get(Identifier::TntId)
    }

    /// Set the session id. `None` or an empty string starts a new session.
    pub fn set_session_id(&self, session_id: Option<&str>) {
        self.submit(Command::Set(
            Identifier::SessionId,
            session_id.map(str::to_owned),
        ));
    }

    /// Get the session id, generating one if needed. Blocks until queued operations are processed.
    pub fn get_session_id(&self) -> Result<String> {
        Ok(self.get(Identifier::SessionId)?.unwrap_or_default())
    }

    /// Clear identifiers, session, edge host and the prefetch cache.
    pub fn reset_experience(&self) {
        self.submit(Command::ResetExperience);
    }

    /// Clear the prefetch cache.
    pub fn clear_prefetch_cache(&self) {
        self.submit(Command::ClearPrefetchCache);
    }

    /// Replace the configuration snapshot.
    ///
    /// A client code change clears the edge host. Opting out clears identifiers, the prefetch
    /// cache and pending notifications.
    pub fn update_configuration(&self, configuration: TargetConfiguration) {
        self.submit(Command::UpdateConfiguration(configuration));
    }

    /// Stop the worker thread.
    ///
    /// This function does not wait for the thread to actually stop. Operations queued after it are
    /// dropped: their callbacks receive default content or an error.
    pub fn stop(&self) {
        self.worker.stop();
    }

    /// Stop the worker thread and block waiting for it to exit.
    ///
    /// Must not be called from a callback.
    pub fn shutdown(self) -> Result<()> {
        self.worker.shutdown()
    }

    fn submit(&self, command: Command) {
        if let Err(err) = self.worker.send(command) {
            log::warn!(target: "target_delivery", "dropping operation: {}", err);
        }
    }

    fn get(&self, identifier: Identifier) -> Result<Option<String>> {
        let (sender, receiver) = mpsc::channel();
        self.worker.send(Command::Get(identifier, sender))?;
        receiver.recv().map_err(|_| Error::WorkerStopped)
    }
}

impl std::fmt::Debug for TargetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetClient").finish_non_exhaustive()
    }
}
