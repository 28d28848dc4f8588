//! Mission repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentInvocation, DraftVersion, Mission, MissionPhase, Note};

/// Filter criteria for listing missions.
#[derive(Debug, Clone, Default)]
pub struct MissionFilter {
    /// Only missions owned by this user.
    pub owner: Option<String>,
    /// Only missions in this phase.
    pub phase: Option<MissionPhase>,
    /// At most this many rows.
    pub limit: Option<usize>,
}

/// Durable storage for missions.
///
/// Notes, draft versions, and invocation records are append-only: there is
/// no operation that rewrites or removes them.
#[async_trait]
pub trait MissionRepository: Send + Sync {
    /// Insert a new mission record (without notes or drafts).
    async fn create(&self, mission: &Mission) -> DomainResult<()>;

    /// Load a mission with its full note log and draft history.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Mission>>;

    /// Persist the mutable part of the mission record.
    async fn update_state(&self, mission: &Mission) -> DomainResult<()>;

    async fn append_notes(&self, mission_id: Uuid, notes: &[Note]) -> DomainResult<()>;

    /// Append a draft version. Fails unless it is exactly one past the latest.
    async fn append_draft(&self, mission_id: Uuid, draft: &DraftVersion) -> DomainResult<()>;

    async fn record_invocations(&self, invocations: &[AgentInvocation]) -> DomainResult<()>;

    async fn invocations(&self, mission_id: Uuid) -> DomainResult<Vec<AgentInvocation>>;

    /// Missions matching the filter, newest first, without notes or drafts.
    async fn list(&self, filter: MissionFilter) -> DomainResult<Vec<Mission>>;
}
