#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dispatch_kernel_contracts::reference::ReferenceOption;
use dispatch_kernel_contracts::session::DispatcherUser;

use crate::repo::{ReferenceCatalog, SessionGate};
use crate::roster::StorageError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonEntry {
    pub option: ReferenceOption,
    pub active: bool,
}

/// Fixed reference catalogs. Persons list ordered by name, vehicles by code,
/// statuses in their configured order.
#[derive(Debug, Default)]
pub struct InMemoryReferenceCatalog {
    persons: Vec<PersonEntry>,
    vehicles: Vec<ReferenceOption>,
    statuses: Vec<ReferenceOption>,
    unavailable: AtomicBool,
}

impl InMemoryReferenceCatalog {
    pub fn new(
        persons: Vec<PersonEntry>,
        vehicles: Vec<ReferenceOption>,
        statuses: Vec<ReferenceOption>,
    ) -> Self {
        Self {
            persons,
            vehicles,
            statuses,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::StoreUnavailable(
                "reference catalog unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ReferenceCatalog for InMemoryReferenceCatalog {
    async fn list_active_persons(&self) -> Result<Vec<ReferenceOption>, StorageError> {
        self.check_available()?;
        let mut out: Vec<ReferenceOption> = self
            .persons
            .iter()
            .filter(|p| p.active)
            .map(|p| p.option.clone())
            .collect();
        out.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(out)
    }

    async fn list_vehicles(&self) -> Result<Vec<ReferenceOption>, StorageError> {
        self.check_available()?;
        let mut out = self.vehicles.clone();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn list_status_codes(&self) -> Result<Vec<ReferenceOption>, StorageError> {
        self.check_available()?;
        Ok(self.statuses.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticSessionGate {
    user: Option<DispatcherUser>,
}

impl StaticSessionGate {
    pub fn signed_in(user: DispatcherUser) -> Self {
        Self { user: Some(user) }
    }

    pub fn signed_out() -> Self {
        Self { user: None }
    }
}

impl SessionGate for StaticSessionGate {
    fn current_user(&self) -> Option<DispatcherUser> {
        self.user.clone()
    }
}
