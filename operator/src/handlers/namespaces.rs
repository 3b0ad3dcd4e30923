use crate::{Handler, Result};
use async_trait::async_trait;
use common::{
    entities::{Application, Customer},
    identity::{label, Tenancy, APPLICATION_LABEL, TENANT_LABEL},
    storage::{Applications, Customers},
    Repositories,
};
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::*;

/// Namespace to Customer and Application
pub struct NamespacesHandler {
    customers: Arc<dyn Customers>,
    applications: Arc<dyn Applications>,
}

impl NamespacesHandler {
    #[must_use]
    pub fn new(repositories: &Repositories) -> Self {
        Self {
            customers: repositories.customers.clone(),
            applications: repositories.applications.clone(),
        }
    }
}

#[async_trait]
impl Handler<Namespace> for NamespacesHandler {
    #[instrument(skip(self, namespace), fields(name = %namespace.name_any()))]
    async fn handle(&self, namespace: Arc<Namespace>, deleted: bool) -> Result<()> {
        if deleted {
            trace!("Skipping deleted namespace");
            return Ok(());
        }
        let meta = &namespace.metadata;
        let Some(tenancy) = Tenancy::from_metadata(meta) else {
            trace!("Skipping namespace because it is missing tenant identifiers");
            return Ok(());
        };

        let customer = Customer::new(&tenancy.tenant_id, label(meta, TENANT_LABEL).unwrap_or_default());
        self.customers.set(&customer).await?;
        debug!(uid = %customer.uid, "Updated customer");

        let application = Application::new(
            &tenancy.tenant_id,
            &tenancy.application_id,
            label(meta, APPLICATION_LABEL).unwrap_or_default(),
        );
        self.applications.set(&application).await?;
        debug!(uid = %application.uid, "Updated application");
        Ok(())
    }
}
