#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use dispatch_kernel_contracts::reference::ReferenceOption;
use dispatch_kernel_contracts::roster::{SlotField, TeamTag};
use dispatch_kernel_contracts::session::DispatcherUser;
use dispatch_kernel_contracts::{ContractViolation, MonotonicTimeNs};
use dispatch_os::board::{BoardSnapshot, Notice};
use dispatch_os::change_feed::{ChangeFeedConfig, DEBOUNCE_MS_MAX};
use dispatch_os::dispatch_view::{DispatchView, DispatchViewConfig};
use dispatch_os::error::DispatchError;
use dispatch_os::save_coordinator::SaveOutcome;
use dispatch_storage::collaborators::{InMemoryReferenceCatalog, PersonEntry, StaticSessionGate};
use dispatch_storage::roster::{InMemoryRosterStore, StorageError};
use tracing::info;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";

type RosterView = DispatchView<InMemoryRosterStore>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdapterError {
    #[error("{key} {reason}")]
    InvalidConfig { key: &'static str, reason: String },
    #[error("unknown view {0}")]
    UnknownView(u64),
    #[error("invalid request: {0}")]
    InvalidRequest(ContractViolation),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<ContractViolation> for AdapterError {
    fn from(v: ContractViolation) -> Self {
        AdapterError::InvalidRequest(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub bind: SocketAddr,
    pub view: DispatchViewConfig,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, AdapterError> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    pub fn from_env_var_map<F>(mut env_getter: F) -> Result<Self, AdapterError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let bind_raw = env_getter("DISPATCH_HTTP_BIND")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());
        let bind = bind_raw
            .parse::<SocketAddr>()
            .map_err(|err| AdapterError::InvalidConfig {
                key: "DISPATCH_HTTP_BIND",
                reason: format!("is not a socket address: {err}"),
            })?;

        let mut view = DispatchViewConfig::mvp_v1();
        view.feed = ChangeFeedConfig {
            debounce_ms: parse_ranged_ms(
                "DISPATCH_FEED_DEBOUNCE_MS",
                env_getter("DISPATCH_FEED_DEBOUNCE_MS"),
                0..=DEBOUNCE_MS_MAX,
                0,
            )?,
            ..ChangeFeedConfig::mvp_v1()
        };
        view.saved_affordance_ms = parse_ranged_ms(
            "DISPATCH_SAVED_AFFORDANCE_MS",
            env_getter("DISPATCH_SAVED_AFFORDANCE_MS"),
            100..=10_000,
            1_000,
        )?;
        if let Some(v) = env_getter("DISPATCH_TEAM_TAGS") {
            view.tags = parse_team_tags(&v)?;
        }
        Ok(Self { bind, view })
    }
}

fn parse_ranged_ms(
    key: &'static str,
    value: Option<String>,
    range: std::ops::RangeInclusive<u64>,
    default: u64,
) -> Result<u64, AdapterError> {
    let Some(raw) = value else {
        return Ok(default);
    };
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| AdapterError::InvalidConfig {
            key,
            reason: format!("must be an integer, got '{raw}'"),
        })?;
    if !range.contains(&parsed) {
        return Err(AdapterError::InvalidConfig {
            key,
            reason: format!("must be within {}..={}", range.start(), range.end()),
        });
    }
    Ok(parsed)
}

fn parse_team_tags(value: &str) -> Result<Vec<TeamTag>, AdapterError> {
    let mut tags = Vec::new();
    for part in value.split(',') {
        let tag = TeamTag::new(part.trim()).map_err(|v| AdapterError::InvalidConfig {
            key: "DISPATCH_TEAM_TAGS",
            reason: v.to_string(),
        })?;
        if tags.contains(&tag) {
            return Err(AdapterError::InvalidConfig {
                key: "DISPATCH_TEAM_TAGS",
                reason: format!("lists {tag} twice"),
            });
        }
        tags.push(tag);
    }
    Ok(tags)
}

/// Installs the process-wide subscriber. `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AdapterResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
}

impl AdapterResponse {
    pub fn ok(outcome: &str) -> Self {
        Self {
            status: "ok".to_string(),
            outcome: outcome.to_string(),
            reason: None,
        }
    }

    pub fn error(err: &AdapterError) -> Self {
        Self {
            status: "error".to_string(),
            outcome: error_outcome(err).to_string(),
            reason: Some(err.to_string()),
        }
    }
}

fn error_outcome(err: &AdapterError) -> &'static str {
    match err {
        AdapterError::Dispatch(DispatchError::Unauthorized)
        | AdapterError::Dispatch(DispatchError::Storage(StorageError::Unauthorized)) => {
            "UNAUTHORIZED"
        }
        AdapterError::UnknownView(_) => "UNKNOWN_VIEW",
        AdapterError::Dispatch(DispatchError::ViewClosed) => "VIEW_CLOSED",
        AdapterError::Dispatch(DispatchError::Storage(_)) => "STORE_UNAVAILABLE",
        _ => "REJECTED",
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OpenViewResponse {
    pub status: String,
    pub view_id: u64,
    pub user: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FieldFocusRequest {
    pub tag: String,
    pub field: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FieldValueRequest {
    pub tag: String,
    pub field: String,
    /// Select value or textarea text; empty or absent unsets the field.
    pub value: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FieldValueResponse {
    pub status: String,
    pub accepted: bool,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SaveResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub updated_at: Option<MonotonicTimeNs>,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub open_views: usize,
    pub roster_writes: u64,
    pub feed_subscribers: usize,
}

/// Hosts the shared roster store and every open dispatch view.
pub struct AdapterRuntime {
    store: Arc<InMemoryRosterStore>,
    catalog: InMemoryReferenceCatalog,
    config: AdapterConfig,
    views: Mutex<BTreeMap<u64, Arc<RosterView>>>,
    next_view_id: AtomicU64,
    started: Instant,
}

impl AdapterRuntime {
    pub fn new(config: AdapterConfig, catalog: InMemoryReferenceCatalog) -> Self {
        Self {
            store: Arc::new(InMemoryRosterStore::new_in_memory(&config.view.tags)),
            catalog,
            config,
            views: Mutex::new(BTreeMap::new()),
            next_view_id: AtomicU64::new(1),
            started: Instant::now(),
        }
    }

    pub fn default_from_env() -> Result<Self, AdapterError> {
        Ok(Self::new(AdapterConfig::from_env()?, demo_reference_catalog()))
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<InMemoryRosterStore> {
        &self.store
    }

    pub fn now(&self) -> MonotonicTimeNs {
        MonotonicTimeNs(u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX))
    }

    fn views(&self) -> MutexGuard<'_, BTreeMap<u64, Arc<RosterView>>> {
        self.views
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn view(&self, view_id: u64) -> Result<Arc<RosterView>, AdapterError> {
        self.views()
            .get(&view_id)
            .cloned()
            .ok_or(AdapterError::UnknownView(view_id))
    }

    pub fn health_report(&self) -> AdapterHealthResponse {
        AdapterHealthResponse {
            status: "ok".to_string(),
            open_views: self.views().len(),
            roster_writes: self.store.write_count(),
            feed_subscribers: self.store.subscriber_count(),
        }
    }

    /// Opens a view for the dispatcher named by `user_id`; a missing or
    /// blank id is treated as signed out.
    pub async fn open_view(&self, user_id: Option<&str>) -> Result<OpenViewResponse, AdapterError> {
        let session = match user_id.map(str::trim).filter(|v| !v.is_empty()) {
            Some(id) => StaticSessionGate::signed_in(DispatcherUser::v1(id, None)?),
            None => StaticSessionGate::signed_out(),
        };
        let view = DispatchView::open(
            Arc::clone(&self.store),
            &self.catalog,
            &session,
            self.config.view.clone(),
        )
        .await?;
        let user = view.user().display_name().to_string();
        let view_id = self.next_view_id.fetch_add(1, Ordering::SeqCst);
        self.views().insert(view_id, Arc::new(view));
        info!(view_id, user = %user, "view registered");
        Ok(OpenViewResponse {
            status: "ok".to_string(),
            view_id,
            user,
        })
    }

    pub fn board(&self, view_id: u64) -> Result<BoardSnapshot, AdapterError> {
        Ok(self.view(view_id)?.snapshot(self.now()))
    }

    pub fn focus(&self, view_id: u64, request: &FieldFocusRequest) -> Result<(), AdapterError> {
        let (tag, field) = parse_target(&request.tag, &request.field)?;
        self.view(view_id)?.focus(&tag, field)?;
        Ok(())
    }

    pub fn blur(&self, view_id: u64, request: &FieldFocusRequest) -> Result<(), AdapterError> {
        let (tag, field) = parse_target(&request.tag, &request.field)?;
        self.view(view_id)?.blur(&tag, field);
        Ok(())
    }

    pub fn set_field(
        &self,
        view_id: u64,
        request: &FieldValueRequest,
    ) -> Result<FieldValueResponse, AdapterError> {
        let (tag, field) = parse_target(&request.tag, &request.field)?;
        let view = self.view(view_id)?;
        let change = view.set_field_raw(&tag, field, request.value.as_deref())?;
        Ok(FieldValueResponse {
            status: "ok".to_string(),
            accepted: change.accepted,
            notices: view.take_notices(),
        })
    }

    pub async fn save(&self, view_id: u64, tag: &str) -> Result<SaveResponse, AdapterError> {
        let tag = TeamTag::new(tag)?;
        let view = self.view(view_id)?;
        let outcome = view.commit(&tag, self.now()).await?;
        let notices = view.take_notices();
        let response = match outcome {
            SaveOutcome::Saved { row, .. } => SaveResponse {
                status: "ok".to_string(),
                outcome: "SAVED".to_string(),
                reason: None,
                updated_at: Some(row.updated_at),
                notices,
            },
            SaveOutcome::RejectedLocally(conflicts) => SaveResponse {
                status: "error".to_string(),
                outcome: "REJECTED".to_string(),
                reason: conflicts.first().map(|c| c.to_string()),
                updated_at: None,
                notices,
            },
            SaveOutcome::Failed(err) => {
                if err == StorageError::Unauthorized {
                    self.views().remove(&view_id);
                    return Err(DispatchError::Unauthorized.into());
                }
                SaveResponse {
                    status: "error".to_string(),
                    outcome: "STORE_UNAVAILABLE".to_string(),
                    reason: Some(err.to_string()),
                    updated_at: None,
                    notices,
                }
            }
        };
        Ok(response)
    }

    pub fn clear(&self, view_id: u64, tag: &str) -> Result<(), AdapterError> {
        let tag = TeamTag::new(tag)?;
        self.view(view_id)?.clear(&tag)?;
        Ok(())
    }

    pub fn close_view(&self, view_id: u64) -> Result<(), AdapterError> {
        let view = self
            .views()
            .remove(&view_id)
            .ok_or(AdapterError::UnknownView(view_id))?;
        view.close();
        Ok(())
    }
}

fn parse_target(tag: &str, field: &str) -> Result<(TeamTag, SlotField), AdapterError> {
    Ok((TeamTag::new(tag)?, SlotField::parse(field)?))
}

/// Small fixed catalog for running the adapter without a backing database.
pub fn demo_reference_catalog() -> InMemoryReferenceCatalog {
    let person = |id: &str, label: &str, active: bool| {
        ReferenceOption::v1(id, label).map(|option| PersonEntry { option, active })
    };
    let persons = [
        person("M-101", "Martin Roy", true),
        person("M-102", "Julie Caron", true),
        person("M-103", "Samir Haddad", true),
        person("M-104", "Anne Tremblay", true),
        person("M-105", "Paul Gagnon", false),
    ];
    let vehicles = [
        ReferenceOption::v1("U-11", "Ford Explorer"),
        ReferenceOption::v1("U-12", "Dodge Charger"),
        ReferenceOption::v1("U-30", "Chevrolet Tahoe"),
    ];
    let statuses = [
        ReferenceOption::v1("DISPO", "Disponible"),
        ReferenceOption::v1("EN PATROUILLE", "En patrouille"),
        ReferenceOption::v1("HORS SERVICE", "Hors service"),
    ];
    InMemoryReferenceCatalog::new(
        persons.into_iter().flatten().collect(),
        vehicles.into_iter().flatten().collect(),
        statuses.into_iter().flatten().collect(),
    )
}
