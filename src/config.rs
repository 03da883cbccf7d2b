use std::{sync::Arc, time::Duration};

use crate::{
    analytics_logger::NoopAnalyticsLogger,
    context::NoopExternalStateProvider,
    data_store::InMemoryDataStore,
    state::IdentityState,
    transport::ReqwestTransport,
    AnalyticsLogger, DataStore, ExternalStateProvider, PrivacyStatus, Result, TargetClient,
    TargetConfiguration, Transport,
};

/// Configuration for [`TargetClient`].
pub struct ClientConfig {
    pub(crate) configuration: TargetConfiguration,
    pub(crate) analytics_logger: Box<dyn AnalyticsLogger + Send + Sync>,
    pub(crate) data_store: Box<dyn DataStore + Send>,
    pub(crate) transport: Arc<dyn Transport + Send + Sync>,
    pub(crate) external_state_provider: Box<dyn ExternalStateProvider + Send + Sync>,
}

impl ClientConfig {
    /// Create a default configuration for the given client code, with privacy opted in.
    ///
    /// ```
    /// # use target_delivery::ClientConfig;
    /// ClientConfig::from_client_code("acme");
    /// ```
    pub fn from_client_code(client_code: impl Into<String>) -> Self {
        Self::from_configuration(TargetConfiguration::new(client_code))
    }

    /// Create a configuration from a [`TargetConfiguration`] snapshot, for example one
    /// deserialized from the host configuration map.
    pub fn from_configuration(configuration: TargetConfiguration) -> Self {
        ClientConfig {
            configuration,
            analytics_logger: Box::new(NoopAnalyticsLogger),
            data_store: Box::new(InMemoryDataStore::new()),
            transport: Arc::new(ReqwestTransport::new()),
            external_state_provider: Box::new(NoopExternalStateProvider),
        }
    }

    /// Default network timeout.
    pub const DEFAULT_TIMEOUT: Duration = TargetConfiguration::DEFAULT_TIMEOUT;

    /// Default session timeout.
    pub const DEFAULT_SESSION_TIMEOUT: Duration = TargetConfiguration::DEFAULT_SESSION_TIMEOUT;

    /// Set the initial privacy status. Requests are only sent when opted in.
    pub fn privacy_status(&mut self, privacy_status: PrivacyStatus) -> &mut Self {
        self.configuration.privacy_status = privacy_status;
        self
    }

    /// Override the delivery host. Clients should use the default host or the learned edge host
    /// in most cases.
    pub fn server(&mut self, server: impl Into<String>) -> &mut Self {
        self.configuration.server = Some(server.into());
        self
    }

    /// Set the environment id.
    pub fn environment_id(&mut self, environment_id: i64) -> &mut Self {
        self.configuration.environment_id = environment_id;
        self
    }

    /// Set the global property token. It takes priority over `at_property` mbox parameters.
    pub fn property_token(&mut self, property_token: impl Into<String>) -> &mut Self {
        self.configuration.property_token = Some(property_token.into());
        self
    }

    /// Set the network timeout for a single delivery call.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.configuration.timeout = timeout;
        self
    }

    /// Set the idle time after which the session id is regenerated.
    pub fn session_timeout(&mut self, session_timeout: Duration) -> &mut Self {
        self.configuration.session_timeout = session_timeout;
        self
    }

    /// Set analytics logger to pass A4T payloads to your analytics pipeline.
    ///
    /// ```
    /// # use target_delivery::{AnalyticsForTargetEvent, ClientConfig};
    /// let mut config = ClientConfig::from_client_code("acme");
    /// config.analytics_logger(|event: AnalyticsForTargetEvent| {
    ///     println!("{:?}", event);
    /// });
    /// ```
    pub fn analytics_logger(
        &mut self,
        analytics_logger: impl AnalyticsLogger + Send + Sync + 'static,
    ) -> &mut Self {
        self.analytics_logger = Box::new(analytics_logger);
        self
    }

    /// Set the store identifiers are persisted to. Defaults to an in-memory store.
    ///
    /// ```no_run
    /// # use target_delivery::{ClientConfig, FileDataStore};
    /// let mut config = ClientConfig::from_client_code("acme");
    /// config.data_store(FileDataStore::open("target.json")?);
    /// # Ok::<(), target_delivery::Error>(())
    /// ```
    pub fn data_store(&mut self, data_store: impl DataStore + Send + 'static) -> &mut Self {
        self.data_store = Box::new(data_store);
        self
    }

    /// Replace the HTTP transport.
    pub fn transport(&mut self, transport: impl Transport + Send + Sync + 'static) -> &mut Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Set the provider of visitor identity, lifecycle data and device context.
    pub fn external_state_provider(
        &mut self,
        external_state_provider: impl ExternalStateProvider + Send + Sync + 'static,
    ) -> &mut Self {
        self.external_state_provider = Box::new(external_state_provider);
        self
    }

    /// Create a new [`TargetClient`] and start its worker thread.
    ///
    /// ```
    /// # use target_delivery::{ClientConfig, TargetClient};
    /// let client: TargetClient = ClientConfig::from_client_code("acme").to_client()?;
    /// # client.shutdown()?;
    /// # Ok::<(), target_delivery::Error>(())
    /// ```
    pub fn to_client(self) -> Result<TargetClient> {
        let identity = IdentityState::load(self.data_store);
        TargetClient::start(
            self.configuration,
            identity,
            self.analytics_logger,
            self.transport,
            self.external_state_provider,
        )
    }
}
