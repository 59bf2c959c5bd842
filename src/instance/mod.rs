//! Instance repository: domain operations over the controller API.
//!
//! Reads go through [`with_retry`] so a timed-out `GET` is replayed with
//! backoff. Creation is never retried because the controller would lease a
//! second VM. Termination has an explicit retrying variant for cleanup.

mod types;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::controller::{ControllerError, Transport, decode_body};
use crate::retry::{RetryPolicy, with_retry};

pub use types::{
    CreateInstanceRequest, Instance, InstanceState, Node, PortForwardingRule, SSH_GUEST_PORT,
    StartupCondition, StartupScript, Template, VmInfo,
};
use types::{CreateInstancePayload, InstanceWrapper, TerminateInstancePayload};

/// Endpoint for instance operations.
pub const INSTANCE_PATH: &str = "/api/v1/vm";
/// Endpoint for node lookups.
pub const NODE_PATH: &str = "/api/v1/node";
/// Endpoint listing registry templates.
pub const TEMPLATE_PATH: &str = "/api/v1/registry/vm";

const MAX_PRIORITY: i32 = 10_000;

/// Typed access to instances, nodes and templates.
#[derive(Clone, Debug)]
pub struct InstanceRepository<T> {
    transport: T,
    retry: RetryPolicy,
}

impl<T: Transport> InstanceRepository<T> {
    /// Creates a repository using the default retry policy.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the retry policy applied to reads and termination.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Creates an instance and returns the controller-assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidPriority`] without contacting the
    /// controller when `priority` is outside `1..=10000` (zero means unset).
    /// Transport and decoding errors propagate with context.
    pub async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
        cancel: &CancellationToken,
    ) -> Result<String, ControllerError> {
        if request.priority < 0 || request.priority > MAX_PRIORITY {
            return Err(ControllerError::InvalidPriority(request.priority));
        }
        let payload = CreateInstancePayload::from(request);
        let value = serde_json::to_value(&payload).map_err(|err| ControllerError::Encode {
            method: String::from("POST"),
            url: String::from(INSTANCE_PATH),
            payload: format!("{payload:?}"),
            message: err.to_string(),
        })?;
        let bytes = self
            .transport
            .post(INSTANCE_PATH, &value, cancel)
            .await
            .map_err(|err| err.context(format!("failed to create instance {value}")))?;
        let ids: Vec<String> = decode_body(&bytes)?;
        ids.into_iter().next().ok_or_else(|| ControllerError::Decode {
            body: String::from_utf8_lossy(&bytes).into_owned(),
            message: String::from("controller returned no instance ids"),
        })
    }

    /// Fetches one instance by id.
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn get_instance(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Instance, ControllerError> {
        self.fetch(INSTANCE_PATH, &[("id", id)], cancel)
            .await
            .map_err(|err| err.context(format!("failed to get instance {id}")))
    }

    /// Lists every instance known to the controller.
    ///
    /// Listing entries without instance details are skipped.
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn get_all_instances(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Instance>, ControllerError> {
        let wrappers: Vec<InstanceWrapper> = self
            .fetch(INSTANCE_PATH, &[], cancel)
            .await
            .map_err(|err| err.context("failed to get all instances"))?;
        debug!(count = wrappers.len(), "got instances back from controller");
        Ok(wrappers.into_iter().filter_map(unwrap_listing).collect())
    }

    /// Resolves the instance currently serving `external_id`.
    ///
    /// See [`select_usable_instance`] for how duplicates are resolved.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NoInstances`],
    /// [`ControllerError::InstanceNotFound`] or
    /// [`ControllerError::UnusableInstance`] as described there, and
    /// propagates listing errors.
    pub async fn get_instance_by_external_id(
        &self,
        external_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Instance, ControllerError> {
        let instances = self
            .get_all_instances(cancel)
            .await
            .map_err(|err| err.context(format!("failed to get instance by external id {external_id}")))?;
        select_usable_instance(instances, external_id)
    }

    /// Asks the controller to terminate an instance.
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub async fn terminate_instance(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ControllerError> {
        let payload = TerminateInstancePayload { id };
        let value = serde_json::to_value(&payload).map_err(|err| ControllerError::Encode {
            method: String::from("DELETE"),
            url: String::from(INSTANCE_PATH),
            payload: format!("{payload:?}"),
            message: err.to_string(),
        })?;
        self.transport
            .delete(INSTANCE_PATH, &value, cancel)
            .await
            .map(|_| ())
            .map_err(|err| err.context(format!("failed to terminate instance {id}")))
    }

    /// Terminates an instance, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error, [`ControllerError::Cancelled`], or
    /// [`ControllerError::RetriesExhausted`].
    pub async fn terminate_instance_with_retry(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ControllerError> {
        with_retry(&self.retry, cancel, || self.terminate_instance(id, cancel)).await
    }

    /// Fetches a node by id.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NodeNotFound`] when the controller returns
    /// no node, and propagates transport and decoding errors.
    pub async fn get_node(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Node, ControllerError> {
        let nodes: Vec<Node> = self
            .fetch(NODE_PATH, &[("id", id)], cancel)
            .await
            .map_err(|err| err.context(format!("failed to get node {id}")))?;
        nodes
            .into_iter()
            .next()
            .ok_or_else(|| ControllerError::NodeNotFound(id.to_owned()))
    }

    /// Resolves a template name to its id.
    ///
    /// Names are not unique; the first exact match in registry order wins.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::TemplateNotFound`] when no template has
    /// that name, and propagates transport and decoding errors.
    pub async fn get_template_id_by_name(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ControllerError> {
        let templates: Vec<Template> = self
            .fetch(TEMPLATE_PATH, &[("apiVer", "v1")], cancel)
            .await
            .map_err(|err| err.context("failed to get templates"))?;
        templates
            .into_iter()
            .find(|template| template.name == name)
            .map(|template| template.id)
            .ok_or_else(|| ControllerError::TemplateNotFound(name.to_owned()))
    }

    async fn fetch<B: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<B, ControllerError> {
        with_retry(&self.retry, cancel, || async move {
            let bytes = self.transport.get(path, query, cancel).await?;
            decode_body(&bytes)
        })
        .await
    }
}

/// Picks the instance serving `external_id` out of a controller listing.
///
/// A retried CI job leases a new VM under the same external id while the
/// previous one may linger in `Error` or `Terminated`. The first match in a
/// usable state wins; terminal matches are never returned.
///
/// # Errors
///
/// - [`ControllerError::NoInstances`] when `instances` is empty.
/// - [`ControllerError::InstanceNotFound`] when nothing carries the id.
/// - [`ControllerError::UnusableInstance`] naming the first match's state
///   when every match is terminal.
pub fn select_usable_instance(
    instances: Vec<Instance>,
    external_id: &str,
) -> Result<Instance, ControllerError> {
    if instances.is_empty() {
        return Err(ControllerError::NoInstances);
    }
    let matching: Vec<Instance> = instances
        .into_iter()
        .filter(|instance| instance.external_id == external_id)
        .collect();
    debug!(external_id, matches = matching.len(), "resolving instance by external id");

    let Some(first_state) = matching.first().map(|instance| instance.state) else {
        return Err(ControllerError::InstanceNotFound {
            external_id: external_id.to_owned(),
        });
    };
    matching
        .into_iter()
        .find(|instance| instance.state.is_usable())
        .inspect(|instance| {
            debug!(instance_id = %instance.id, state = %instance.state, "selected instance");
        })
        .ok_or_else(|| ControllerError::UnusableInstance {
            external_id: external_id.to_owned(),
            state: first_state,
        })
}

fn unwrap_listing(wrapper: InstanceWrapper) -> Option<Instance> {
    let InstanceWrapper {
        id,
        external_id,
        instance,
    } = wrapper;
    let Some(mut details) = instance else {
        debug!(instance_id = %id, "skipping listing entry without instance details");
        return None;
    };
    if details.id.is_empty() {
        details.id = id;
    }
    if details.external_id.is_empty() {
        details.external_id = external_id;
    }
    Some(details)
}
