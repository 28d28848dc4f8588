//! In-memory mission repository with the same append-only contract as SQLite.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentInvocation, DraftVersion, Mission, Note};
use crate::domain::ports::{MissionFilter, MissionRepository};

#[derive(Debug, Default)]
struct Stored {
    mission: Option<Mission>,
    notes: Vec<Note>,
    drafts: Vec<DraftVersion>,
    invocations: Vec<AgentInvocation>,
}

/// In-memory [`MissionRepository`] for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryMissionRepository {
    missions: RwLock<HashMap<Uuid, Stored>>,
}

impl InMemoryMissionRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

fn without_history(mission: &Mission) -> Mission {
    let mut record = mission.clone();
    record.restore_history(Vec::new(), Vec::new());
    record
}

#[async_trait]
impl MissionRepository for InMemoryMissionRepository {
    async fn create(&self, mission: &Mission) -> DomainResult<()> {
        let mut missions = self.missions.write().await;
        if missions.contains_key(&mission.id) {
            return Err(DomainError::ConcurrencyConflict {
                entity: "mission".to_string(),
                id: mission.id.to_string(),
            });
        }
        missions.insert(
            mission.id,
            Stored {
                mission: Some(without_history(mission)),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Mission>> {
        let missions = self.missions.read().await;
        Ok(missions.get(&id).and_then(|stored| {
            stored.mission.clone().map(|mut m| {
                m.restore_history(stored.notes.clone(), stored.drafts.clone());
                let recorded = stored.invocations.iter().map(|i| i.sequence).max().unwrap_or(0);
                m.invocation_count = m.invocation_count.max(recorded);
                m
            })
        }))
    }

    async fn update_state(&self, mission: &Mission) -> DomainResult<()> {
        let mut missions = self.missions.write().await;
        let stored = missions
            .get_mut(&mission.id)
            .ok_or(DomainError::MissionNotFound(mission.id))?;
        stored.mission = Some(without_history(mission));
        Ok(())
    }

    async fn append_notes(&self, mission_id: Uuid, notes: &[Note]) -> DomainResult<()> {
        let mut missions = self.missions.write().await;
        let stored = missions
            .get_mut(&mission_id)
            .ok_or(DomainError::MissionNotFound(mission_id))?;
        for note in notes {
            if stored.notes.iter().any(|n| n.id == note.id || n.sequence == note.sequence) {
                return Err(DomainError::ConcurrencyConflict {
                    entity: "note".to_string(),
                    id: note.id.to_string(),
                });
            }
        }
        stored.notes.extend_from_slice(notes);
        Ok(())
    }

    async fn append_draft(&self, mission_id: Uuid, draft: &DraftVersion) -> DomainResult<()> {
        let mut missions = self.missions.write().await;
        let stored = missions
            .get_mut(&mission_id)
            .ok_or(DomainError::MissionNotFound(mission_id))?;
        let latest = stored.drafts.last().map(|d| d.version);
        if draft.version != latest.unwrap_or(0) + 1 || draft.parent_version != latest {
            return Err(DomainError::ConcurrencyConflict {
                entity: "draft".to_string(),
                id: format!("{mission_id} v{}", draft.version),
            });
        }
        stored.drafts.push(draft.clone());
        Ok(())
    }

    async fn record_invocations(&self, invocations: &[AgentInvocation]) -> DomainResult<()> {
        let mut missions = self.missions.write().await;
        for invocation in invocations {
            let stored = missions
                .get_mut(&invocation.mission_id)
                .ok_or(DomainError::MissionNotFound(invocation.mission_id))?;
            if stored.invocations.iter().any(|i| i.sequence == invocation.sequence) {
                return Err(DomainError::ConcurrencyConflict {
                    entity: "invocation".to_string(),
                    id: format!("{} #{}", invocation.mission_id, invocation.sequence),
                });
            }
            stored.invocations.push(invocation.clone());
        }
        Ok(())
    }

    async fn invocations(&self, mission_id: Uuid) -> DomainResult<Vec<AgentInvocation>> {
        let missions = self.missions.read().await;
        let mut records = missions
            .get(&mission_id)
            .map(|s| s.invocations.clone())
            .unwrap_or_default();
        records.sort_by_key(|i| i.sequence);
        Ok(records)
    }

    async fn list(&self, filter: MissionFilter) -> DomainResult<Vec<Mission>> {
        let missions = self.missions.read().await;
        let mut result: Vec<Mission> = missions
            .values()
            .filter_map(|s| s.mission.clone())
            .filter(|m| filter.owner.as_ref().is_none_or(|o| &m.owner == o))
            .filter(|m| filter.phase.is_none_or(|p| m.phase == p))
            .collect();
        result.sort_by_key(|m| std::cmp::Reverse(m.created_at));
        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }
        Ok(result)
    }
}
