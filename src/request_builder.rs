use chrono::Local;
use serde::Serialize;

use crate::{
    configuration::TargetConfiguration,
    context::ExternalState,
    notifications::Notification,
    parameters::TargetParameters,
    state::IdentityState,
    transport::{delivery_url, sdk_headers, HttpRequest},
    wire::{
        ContextNode, CustomerIdNode, DeliveryRequest, ExperienceCloudNode, IdNode, MboxRequest,
        Mboxes, PropertyNode, RawDeliveryRequest, RequestHeader,
    },
    Error, Result,
};

/// Whether a batch asks for immediate content or for content to cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchKind {
    Execute,
    Prefetch,
}

/// Builds delivery request documents from a batch plus client state.
pub(crate) struct RequestBuilder<'a> {
    configuration: &'a TargetConfiguration,
    external: &'a ExternalState,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(configuration: &'a TargetConfiguration, external: &'a ExternalState) -> Self {
        RequestBuilder {
            configuration,
            external,
        }
    }

    /// Build a request for `batch` with `notifications` piggy-backed.
    ///
    /// Mboxes are stamped with their zero-based position in `batch`.
    pub fn build(
        &self,
        identity: &IdentityState,
        kind: BatchKind,
        batch: &[(String, TargetParameters)],
        notifications: Vec<Notification>,
    ) -> Result<DeliveryRequest> {
        if batch.is_empty() && notifications.is_empty() {
            return Err(Error::EmptyRequest);
        }

        let lifecycle = self.external.lifecycle_context_data();
        let mut mbox_property_token = None;
        let mboxes: Vec<MboxRequest> = batch
            .iter()
            .enumerate()
            .map(|(index, (name, parameters))| {
                let mut parameters = parameters
                    .clone()
                    .with_default_profile_parameters(&lifecycle);
                let token = parameters.take_property_token();
                if mbox_property_token.is_none() {
                    mbox_property_token = token;
                }
                MboxRequest {
                    index: index.to_string(),
                    name: name.clone(),
                    parameters,
                }
            })
            .collect();

        let mboxes = (!mboxes.is_empty()).then_some(Mboxes { mboxes });
        let (execute, prefetch) = match kind {
            BatchKind::Execute => (mboxes, None),
            BatchKind::Prefetch => (None, mboxes),
        };

        Ok(DeliveryRequest {
            header: self.header(identity, mbox_property_token),
            execute,
            prefetch,
            notifications,
        })
    }

    /// Build a request around caller-supplied nodes.
    pub fn build_raw<'r>(
        &self,
        identity: &IdentityState,
        execute: Option<&'r serde_json::Value>,
        prefetch: Option<&'r serde_json::Value>,
        notifications: &'r [serde_json::Value],
    ) -> Result<RawDeliveryRequest<'r>> {
        if execute.is_none() && prefetch.is_none() && notifications.is_empty() {
            return Err(Error::EmptyRequest);
        }
        Ok(RawDeliveryRequest {
            header: self.header(identity, None),
            execute,
            prefetch,
            notifications,
        })
    }

    fn header(&self, identity: &IdentityState, mbox_property_token: Option<String>) -> RequestHeader {
        let visitor = &self.external.visitor;
        let id = IdNode {
            tnt_id: identity.tnt_id().map(str::to_owned),
            third_party_id: identity.third_party_id().map(str::to_owned),
            marketing_cloud_visitor_id: visitor
                .marketing_cloud_id
                .clone()
                .filter(|id| !id.is_empty()),
            customer_ids: visitor
                .customer_ids
                .iter()
                .map(CustomerIdNode::from)
                .collect(),
        };

        let property_token = self
            .configuration
            .global_property_token()
            .map(str::to_owned)
            .or(mbox_property_token);

        let time_offset_in_minutes = Local::now().offset().local_minus_utc() / 60;

        RequestHeader {
            id: (!id.is_empty()).then_some(id),
            context: ContextNode::new(&self.external.device, time_offset_in_minutes),
            experience_cloud: ExperienceCloudNode::new(visitor),
            environment_id: (self.configuration.environment_id != 0)
                .then_some(self.configuration.environment_id),
            property: property_token.map(|token| PropertyNode { token }),
            client: self.configuration.client_code.clone(),
        }
    }

    /// Wrap a request body into an HTTP call addressed to the right host.
    ///
    /// Host priority: custom server, then the edge host learned from earlier responses, then the
    /// client code default host.
    pub fn http_request(
        &self,
        identity: &mut IdentityState,
        body: &impl Serialize,
    ) -> Result<HttpRequest> {
        let body =
            serde_json::to_value(body).map_err(|err| Error::InvalidRequest(err.to_string()))?;

        let host = self
            .configuration
            .custom_server()
            .map(str::to_owned)
            .or_else(|| identity.edge_host().map(str::to_owned))
            .unwrap_or_else(|| self.configuration.default_host());
        let session_id = identity.session_id();
        let url = delivery_url(&host, &self.configuration.client_code, &session_id)?;

        Ok(HttpRequest {
            url,
            headers: sdk_headers(),
            body,
            timeout: self.configuration.timeout,
        })
    }
}
