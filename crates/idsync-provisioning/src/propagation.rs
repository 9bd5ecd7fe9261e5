//! Propagation of local records to resources.
//!
//! The engine asks a [`Propagation`] collaborator to create, update or
//! delete the resource object of a local record. [`ConnectorPropagation`]
//! does so through registered connectors and their provisions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use idsync_connector::prelude::{
    AttributeDelta, CreateOp, DeleteOp, FullConnector, SearchOp, Uid, UpdateOp,
};
use tracing::{debug, warn};

use crate::error::{ProvisioningError, ProvisioningResult};
use crate::mapping::Provision;
use crate::record::LocalRecord;
use crate::types::AnyKind;

/// Attribute carrying the enabled status on resources.
pub const ENABLE_ATTRIBUTE: &str = "__ENABLE__";

/// Executes resource writes on behalf of handlers.
#[async_trait]
pub trait Propagation: Send + Sync {
    /// Create the record's object on `resource`.
    async fn create(
        &self,
        resource: &str,
        record: &LocalRecord,
        enabled: Option<bool>,
    ) -> ProvisioningResult<()>;

    /// Update the record's object on `resource`.
    async fn update(
        &self,
        resource: &str,
        record: &LocalRecord,
        enabled: Option<bool>,
    ) -> ProvisioningResult<()>;

    /// Delete the record's object from `resource`.
    async fn delete(&self, resource: &str, record: &LocalRecord) -> ProvisioningResult<()>;
}

/// One resource known to [`ConnectorPropagation`].
#[derive(Clone)]
pub struct ResourceBinding {
    connector: Arc<dyn FullConnector>,
    provisions: Vec<Provision>,
}

impl ResourceBinding {
    /// Bind a connector to its provisions.
    pub fn new(connector: Arc<dyn FullConnector>, provisions: Vec<Provision>) -> Self {
        Self {
            connector,
            provisions,
        }
    }

    fn provision(&self, kind: AnyKind) -> Option<&Provision> {
        self.provisions.iter().find(|p| p.kind == kind)
    }
}

/// [`Propagation`] writing through registered connectors.
///
/// Resources without a registration are skipped; the record keeps the link
/// and the next push task reconciles it.
#[derive(Clone, Default)]
pub struct ConnectorPropagation {
    resources: HashMap<String, ResourceBinding>,
}

impl ConnectorPropagation {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource using builder pattern.
    #[must_use]
    pub fn with_resource(mut self, name: impl Into<String>, binding: ResourceBinding) -> Self {
        self.resources.insert(name.into(), binding);
        self
    }

    /// Register a resource.
    pub fn register(&mut self, name: impl Into<String>, binding: ResourceBinding) {
        self.resources.insert(name.into(), binding);
    }

    fn target<'a>(
        &'a self,
        resource: &str,
        kind: AnyKind,
    ) -> Option<(&'a ResourceBinding, &'a Provision)> {
        let binding = self.resources.get(resource)?;
        let provision = binding.provision(kind)?;
        Some((binding, provision))
    }

    fn uid_for(provision: &Provision, record: &LocalRecord) -> ProvisioningResult<Uid> {
        provision
            .account_id(record)
            .map(|id| Uid::new(provision.key.external.clone(), id))
            .ok_or_else(|| {
                ProvisioningError::mapping(
                    &provision.key.internal,
                    "no value for the key attribute",
                )
            })
    }
}

#[async_trait]
impl Propagation for ConnectorPropagation {
    async fn create(
        &self,
        resource: &str,
        record: &LocalRecord,
        enabled: Option<bool>,
    ) -> ProvisioningResult<()> {
        let Some((binding, provision)) = self.target(resource, record.kind) else {
            warn!(resource, key = %record.key, "No connector registered, create not propagated");
            return Ok(());
        };

        let mut attrs = provision.outbound(record)?;
        if let Some(enabled) = enabled {
            attrs.set(ENABLE_ATTRIBUTE, enabled);
        }
        binding
            .connector
            .create(provision.object_class, attrs)
            .await
            .map_err(|e| ProvisioningError::propagation(resource, e))?;
        debug!(resource, key = %record.key, "Create propagated");
        Ok(())
    }

    async fn update(
        &self,
        resource: &str,
        record: &LocalRecord,
        enabled: Option<bool>,
    ) -> ProvisioningResult<()> {
        let Some((binding, provision)) = self.target(resource, record.kind) else {
            warn!(resource, key = %record.key, "No connector registered, update not propagated");
            return Ok(());
        };

        let uid = Self::uid_for(provision, record)?;
        let mut attrs = provision.outbound(record)?;
        if let Some(enabled) = enabled {
            attrs.set(ENABLE_ATTRIBUTE, enabled);
        }

        let exists = binding
            .connector
            .get(provision.object_class, &uid)
            .await
            .map_err(|e| ProvisioningError::propagation(resource, e))?
            .is_some();

        // A missing object is recreated, matching an update on a fresh resource.
        let result = if exists {
            binding
                .connector
                .update(provision.object_class, &uid, AttributeDelta::replacing(&attrs))
                .await
                .map(|_| ())
        } else {
            binding
                .connector
                .create(provision.object_class, attrs)
                .await
                .map(|_| ())
        };
        result.map_err(|e| ProvisioningError::propagation(resource, e))?;
        debug!(resource, key = %record.key, "Update propagated");
        Ok(())
    }

    async fn delete(&self, resource: &str, record: &LocalRecord) -> ProvisioningResult<()> {
        let Some((binding, provision)) = self.target(resource, record.kind) else {
            warn!(resource, key = %record.key, "No connector registered, delete not propagated");
            return Ok(());
        };

        let uid = Self::uid_for(provision, record)?;
        match binding.connector.delete(provision.object_class, &uid).await {
            Ok(()) => {
                debug!(resource, key = %record.key, "Delete propagated");
                Ok(())
            }
            // Already gone is the desired end state.
            Err(idsync_connector::ConnectorError::ObjectNotFound { .. }) => Ok(()),
            Err(e) => Err(ProvisioningError::propagation(resource, e)),
        }
    }
}
