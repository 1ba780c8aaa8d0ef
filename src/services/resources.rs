use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::cache::ProfileCache;
use crate::models::{
    resources::{NewResource, PurchaseReceipt, Resource},
    transactions::{NewCreditTransaction, TransactionCategory},
};
use crate::repositories::{RepositoryError, Store};
use crate::utils::locks::KeyedLocks;

const SERVICE: &str = "ResourceService";

pub enum ResourceRequest {
    CreateResource {
        resource: NewResource,
        response: oneshot::Sender<Result<Resource, ServiceError>>,
    },
    GetResource {
        resource_id: String,
        response: oneshot::Sender<Result<Resource, ServiceError>>,
    },
    /// Answers `None` when the user already owns the resource.
    Purchase {
        user_id: String,
        resource_id: String,
        response: oneshot::Sender<Result<Option<PurchaseReceipt>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct ResourceRequestHandler {
    store: Arc<dyn Store>,
    locks: KeyedLocks,
    cache: ProfileCache,
}

impl ResourceRequestHandler {
    pub fn new(store: Arc<dyn Store>, locks: KeyedLocks, cache: ProfileCache) -> Self {
        ResourceRequestHandler {
            store,
            locks,
            cache,
        }
    }

    async fn create_resource(&self, resource: NewResource) -> Result<Resource, ServiceError> {
        resource.validate()?;

        self.store
            .insert_resource(&resource)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))
    }

    async fn get_resource(&self, resource_id: &str) -> Result<Resource, ServiceError> {
        self.store
            .get_resource(resource_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?
            .ok_or_else(|| ServiceError::NotFound(format!("resource {}", resource_id)))
    }

    async fn purchase(
        &self,
        user_id: &str,
        resource_id: &str,
    ) -> Result<Option<PurchaseReceipt>, ServiceError> {
        let resource = self.get_resource(resource_id).await?;
        if resource.uploader_id == user_id {
            return Err(ServiceError::Validation(
                "uploaders already own their resources".to_string(),
            ));
        }

        let _guard = self.locks.lock(user_id).await;

        let owned = self
            .store
            .has_purchased(user_id, resource_id)
            .await
            .map_err(|e| ServiceError::repository(SERVICE, e))?;
        if owned {
            log::debug!("{} already owns resource {}.", user_id, resource_id);
            return Ok(None);
        }

        let debit = NewCreditTransaction::new(
            user_id,
            -resource.price,
            TransactionCategory::ResourcePurchase,
            format!("Purchased \"{}\"", resource.title),
        )
        .with_reference(resource.id.clone());
        if resource.price > 0 {
            debit.validate()?;
        }

        match self.store.purchase_resource(&resource, &debit).await {
            Ok(receipt) => {
                self.cache.invalidate(user_id);
                log::info!(
                    "{} purchased resource {} for {} credits.",
                    user_id,
                    resource.id,
                    resource.price
                );
                Ok(Some(receipt))
            }
            Err(RepositoryError::Conflict(_)) => Ok(None),
            Err(e) => Err(ServiceError::repository(SERVICE, e)),
        }
    }
}

#[async_trait]
impl RequestHandler<ResourceRequest> for ResourceRequestHandler {
    async fn handle_request(&self, request: ResourceRequest) {
        match request {
            ResourceRequest::CreateResource { resource, response } => {
                let result = self.create_resource(resource).await;
                let _ = response.send(result);
            }
            ResourceRequest::GetResource {
                resource_id,
                response,
            } => {
                let result = self.get_resource(&resource_id).await;
                let _ = response.send(result);
            }
            ResourceRequest::Purchase {
                user_id,
                resource_id,
                response,
            } => {
                let result = self.purchase(&user_id, &resource_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct ResourceService;

impl ResourceService {
    pub fn new() -> Self {
        ResourceService {}
    }
}

#[async_trait]
impl Service<ResourceRequest, ResourceRequestHandler> for ResourceService {}
