#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use dispatch_kernel_contracts::reference::ReferenceOption;
use dispatch_kernel_contracts::roster::{RosterRow, SaveSlotRequest};
use dispatch_kernel_contracts::session::DispatcherUser;

use crate::feed::ChangeFeedSubscription;
use crate::roster::StorageError;

/// Typed accessor over the remote roster table, the single source of truth.
#[async_trait]
pub trait RosterStore: Send + Sync {
    /// Every slot, lead tag first then the rest lexicographically.
    async fn fetch_all(&self) -> Result<Vec<RosterRow>, StorageError>;

    /// Writes the provided fields of one slot atomically and returns the
    /// stored row.
    async fn save(&self, request: &SaveSlotRequest) -> Result<RosterRow, StorageError>;

    /// Subscribes to the signal-only change feed of the roster table.
    fn subscribe(&self) -> Result<ChangeFeedSubscription, StorageError>;
}

#[async_trait]
impl<S> RosterStore for Arc<S>
where
    S: RosterStore + ?Sized,
{
    async fn fetch_all(&self) -> Result<Vec<RosterRow>, StorageError> {
        (**self).fetch_all().await
    }

    async fn save(&self, request: &SaveSlotRequest) -> Result<RosterRow, StorageError> {
        (**self).save(request).await
    }

    fn subscribe(&self) -> Result<ChangeFeedSubscription, StorageError> {
        (**self).subscribe()
    }
}

/// Personnel, vehicle and status catalogs. Read once per view load.
#[async_trait]
pub trait ReferenceCatalog: Send + Sync {
    async fn list_active_persons(&self) -> Result<Vec<ReferenceOption>, StorageError>;
    async fn list_vehicles(&self) -> Result<Vec<ReferenceOption>, StorageError>;
    async fn list_status_codes(&self) -> Result<Vec<ReferenceOption>, StorageError>;
}

pub trait SessionGate: Send + Sync {
    fn current_user(&self) -> Option<DispatcherUser>;
}
