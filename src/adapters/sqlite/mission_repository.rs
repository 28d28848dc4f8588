//! SQLite implementation of the MissionRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_json_or_default, parse_optional_datetime, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AgentInvocation, AgentRole, DraftContent, DraftVersion, EffectiveSettings, InvocationOutcome,
    Mission, MissionPhase, MissionScope, ModelTier, Note, NoteSource, SourceKind,
};
use crate::domain::ports::{MissionFilter, MissionRepository};

/// `invocation_count` is only written between steps while audit rows are
/// written per attempt, so the highest recorded sequence wins after a crash.
const MISSION_COLUMNS: &str = "id, owner, goal, scope, settings, phase, iteration_count, plan, \
    revision_instructions, last_error, forced_finalization, unverified_claims, \
    MAX(invocation_count, (SELECT COALESCE(MAX(sequence), 0) FROM agent_invocations \
        WHERE agent_invocations.mission_id = missions.id)) AS invocation_count, \
    parent_id, created_at, updated_at, finished_at";

/// SQLite-backed [`MissionRepository`].
#[derive(Clone)]
pub struct SqliteMissionRepository {
    pool: SqlitePool,
}

impl SqliteMissionRepository {
    /// Repository over an already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_notes(&self, mission_id: Uuid) -> DomainResult<Vec<Note>> {
        let rows: Vec<NoteRow> = sqlx::query_as(
            r#"SELECT id, sequence, iteration, source_kind, source_reference, source_title, content,
                      query, section_ids, invocation_seq, supersedes, created_at
               FROM mission_notes WHERE mission_id = ? ORDER BY sequence"#,
        )
        .bind(mission_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Note::try_from).collect()
    }

    async fn load_drafts(&self, mission_id: Uuid) -> DomainResult<Vec<DraftVersion>> {
        let rows: Vec<DraftRow> = sqlx::query_as(
            r#"SELECT version, parent_version, iteration, content, invocation_seq, created_at
               FROM draft_versions WHERE mission_id = ? ORDER BY version"#,
        )
        .bind(mission_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DraftVersion::try_from).collect()
    }
}

#[async_trait]
impl MissionRepository for SqliteMissionRepository {
    async fn create(&self, mission: &Mission) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO missions (id, owner, goal, scope, settings, phase, iteration_count, plan,
                   revision_instructions, last_error, forced_finalization, unverified_claims,
                   invocation_count, parent_id, created_at, updated_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(mission.id.to_string())
        .bind(&mission.owner)
        .bind(&mission.goal)
        .bind(serde_json::to_string(&mission.scope)?)
        .bind(serde_json::to_string(&mission.settings)?)
        .bind(mission.phase.as_str())
        .bind(i64::from(mission.iteration_count))
        .bind(mission.plan.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&mission.revision_instructions)
        .bind(mission.last_error.as_ref().map(serde_json::to_string).transpose()?)
        .bind(mission.forced_finalization)
        .bind(serde_json::to_string(&mission.unverified_claims)?)
        .bind(mission.invocation_count as i64)
        .bind(mission.parent_id.map(|id| id.to_string()))
        .bind(mission.created_at.to_rfc3339())
        .bind(mission.updated_at.to_rfc3339())
        .bind(mission.finished_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Mission>> {
        let row: Option<MissionRow> =
            sqlx::query_as(&format!("SELECT {MISSION_COLUMNS} FROM missions WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut mission = Mission::try_from(row)?;
        let notes = self.load_notes(id).await?;
        let drafts = self.load_drafts(id).await?;
        mission.restore_history(notes, drafts);
        Ok(Some(mission))
    }

    async fn update_state(&self, mission: &Mission) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE missions SET phase = ?, iteration_count = ?, plan = ?, revision_instructions = ?,
                   last_error = ?, forced_finalization = ?, unverified_claims = ?, invocation_count = ?,
                   updated_at = ?, finished_at = ?
               WHERE id = ?"#,
        )
        .bind(mission.phase.as_str())
        .bind(i64::from(mission.iteration_count))
        .bind(mission.plan.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&mission.revision_instructions)
        .bind(mission.last_error.as_ref().map(serde_json::to_string).transpose()?)
        .bind(mission.forced_finalization)
        .bind(serde_json::to_string(&mission.unverified_claims)?)
        .bind(mission.invocation_count as i64)
        .bind(mission.updated_at.to_rfc3339())
        .bind(mission.finished_at.map(|t| t.to_rfc3339()))
        .bind(mission.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::MissionNotFound(mission.id));
        }
        Ok(())
    }

    async fn append_notes(&self, mission_id: Uuid, notes: &[Note]) -> DomainResult<()> {
        if notes.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for note in notes {
            sqlx::query(
                r#"INSERT INTO mission_notes (id, mission_id, sequence, iteration, source_kind,
                       source_reference, source_title, content, query, section_ids, invocation_seq,
                       supersedes, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(note.id.to_string())
            .bind(mission_id.to_string())
            .bind(note.sequence as i64)
            .bind(i64::from(note.iteration))
            .bind(note.source.kind.as_str())
            .bind(&note.source.reference)
            .bind(&note.source.title)
            .bind(&note.content)
            .bind(&note.query)
            .bind(serde_json::to_string(&note.section_ids)?)
            .bind(note.invocation_seq as i64)
            .bind(note.supersedes.map(|id| id.to_string()))
            .bind(note.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn append_draft(&self, mission_id: Uuid, draft: &DraftVersion) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        let (latest,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(version), 0) FROM draft_versions WHERE mission_id = ?",
        )
        .bind(mission_id.to_string())
        .fetch_one(&mut *tx)
        .await?;

        let expected_parent = u32::try_from(latest).ok().filter(|v| *v > 0);
        if i64::from(draft.version) != latest + 1 || draft.parent_version != expected_parent {
            return Err(DomainError::ConcurrencyConflict {
                entity: "draft".to_string(),
                id: format!("{mission_id} v{}", draft.version),
            });
        }

        sqlx::query(
            r#"INSERT INTO draft_versions (mission_id, version, parent_version, iteration, content,
                   invocation_seq, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(mission_id.to_string())
        .bind(i64::from(draft.version))
        .bind(draft.parent_version.map(i64::from))
        .bind(i64::from(draft.iteration))
        .bind(serde_json::to_string(&draft.content)?)
        .bind(draft.invocation_seq as i64)
        .bind(draft.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_invocations(&self, invocations: &[AgentInvocation]) -> DomainResult<()> {
        if invocations.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for invocation in invocations {
            sqlx::query(
                r#"INSERT INTO agent_invocations (mission_id, sequence, role, tier, model, attempt,
                       started_at, finished_at, outcome, error)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(invocation.mission_id.to_string())
            .bind(invocation.sequence as i64)
            .bind(invocation.role.as_str())
            .bind(invocation.tier.as_str())
            .bind(&invocation.model)
            .bind(i64::from(invocation.attempt))
            .bind(invocation.started_at.to_rfc3339())
            .bind(invocation.finished_at.to_rfc3339())
            .bind(invocation.outcome.as_str())
            .bind(&invocation.error)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn invocations(&self, mission_id: Uuid) -> DomainResult<Vec<AgentInvocation>> {
        let rows: Vec<InvocationRow> = sqlx::query_as(
            r#"SELECT mission_id, sequence, role, tier, model, attempt, started_at, finished_at,
                      outcome, error
               FROM agent_invocations WHERE mission_id = ? ORDER BY sequence"#,
        )
        .bind(mission_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AgentInvocation::try_from).collect()
    }

    async fn list(&self, filter: MissionFilter) -> DomainResult<Vec<Mission>> {
        let mut query = format!("SELECT {MISSION_COLUMNS} FROM missions WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(owner) = &filter.owner {
            query.push_str(" AND owner = ?");
            bindings.push(owner.clone());
        }
        if let Some(phase) = &filter.phase {
            query.push_str(" AND phase = ?");
            bindings.push(phase.as_str().to_string());
        }
        query.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, MissionRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let rows: Vec<MissionRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Mission::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct MissionRow {
    id: String,
    owner: String,
    goal: String,
    scope: String,
    settings: String,
    phase: String,
    iteration_count: i64,
    plan: Option<String>,
    revision_instructions: Option<String>,
    last_error: Option<String>,
    forced_finalization: bool,
    unverified_claims: Option<String>,
    invocation_count: i64,
    parent_id: Option<String>,
    created_at: String,
    updated_at: String,
    finished_at: Option<String>,
}

impl TryFrom<MissionRow> for Mission {
    type Error = DomainError;

    fn try_from(row: MissionRow) -> Result<Self, Self::Error> {
        let scope: MissionScope = serde_json::from_str(&row.scope)?;
        let settings: EffectiveSettings = serde_json::from_str(&row.settings)?;
        let phase = MissionPhase::from_str(&row.phase)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid phase: {}", row.phase)))?;

        let mut mission = Mission::new(row.owner, row.goal, scope, settings);
        mission.id = parse_uuid(&row.id)?;
        mission.phase = phase;
        mission.iteration_count = to_u32(row.iteration_count, "iteration_count")?;
        mission.plan = row.plan.map(|p| serde_json::from_str(&p)).transpose()?;
        mission.revision_instructions = row.revision_instructions;
        mission.last_error = row.last_error.map(|e| serde_json::from_str(&e)).transpose()?;
        mission.forced_finalization = row.forced_finalization;
        mission.unverified_claims = parse_json_or_default(row.unverified_claims)?;
        mission.invocation_count = to_u64(row.invocation_count, "invocation_count")?;
        mission.parent_id = parse_optional_uuid(row.parent_id)?;
        mission.created_at = parse_datetime(&row.created_at)?;
        mission.updated_at = parse_datetime(&row.updated_at)?;
        mission.finished_at = parse_optional_datetime(row.finished_at)?;
        Ok(mission)
    }
}

#[derive(sqlx::FromRow)]
struct NoteRow {
    id: String,
    sequence: i64,
    iteration: i64,
    source_kind: String,
    source_reference: String,
    source_title: String,
    content: String,
    query: String,
    section_ids: Option<String>,
    invocation_seq: i64,
    supersedes: Option<String>,
    created_at: String,
}

impl TryFrom<NoteRow> for Note {
    type Error = DomainError;

    fn try_from(row: NoteRow) -> Result<Self, Self::Error> {
        let kind = SourceKind::from_str(&row.source_kind).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid source kind: {}", row.source_kind))
        })?;
        Ok(Note {
            id: parse_uuid(&row.id)?,
            sequence: to_u64(row.sequence, "sequence")?,
            iteration: to_u32(row.iteration, "iteration")?,
            source: NoteSource {
                kind,
                reference: row.source_reference,
                title: row.source_title,
            },
            content: row.content,
            query: row.query,
            section_ids: parse_json_or_default(row.section_ids)?,
            invocation_seq: to_u64(row.invocation_seq, "invocation_seq")?,
            supersedes: parse_optional_uuid(row.supersedes)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DraftRow {
    version: i64,
    parent_version: Option<i64>,
    iteration: i64,
    content: String,
    invocation_seq: i64,
    created_at: String,
}

impl TryFrom<DraftRow> for DraftVersion {
    type Error = DomainError;

    fn try_from(row: DraftRow) -> Result<Self, Self::Error> {
        let content: DraftContent = serde_json::from_str(&row.content)?;
        Ok(DraftVersion {
            version: to_u32(row.version, "version")?,
            parent_version: row
                .parent_version
                .map(|v| to_u32(v, "parent_version"))
                .transpose()?,
            iteration: to_u32(row.iteration, "iteration")?,
            content,
            invocation_seq: to_u64(row.invocation_seq, "invocation_seq")?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InvocationRow {
    mission_id: String,
    sequence: i64,
    role: String,
    tier: String,
    model: String,
    attempt: i64,
    started_at: String,
    finished_at: String,
    outcome: String,
    error: Option<String>,
}

impl TryFrom<InvocationRow> for AgentInvocation {
    type Error = DomainError;

    fn try_from(row: InvocationRow) -> Result<Self, Self::Error> {
        let role = AgentRole::from_str(&row.role)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid role: {}", row.role)))?;
        let tier = ModelTier::from_str(&row.tier)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid tier: {}", row.tier)))?;
        let outcome = InvocationOutcome::from_str(&row.outcome).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid outcome: {}", row.outcome))
        })?;
        Ok(AgentInvocation {
            mission_id: parse_uuid(&row.mission_id)?,
            sequence: to_u64(row.sequence, "sequence")?,
            role,
            tier,
            model: row.model,
            attempt: to_u32(row.attempt, "attempt")?,
            started_at: parse_datetime(&row.started_at)?,
            finished_at: parse_datetime(&row.finished_at)?,
            outcome,
            error: row.error,
        })
    }
}

fn to_u32(value: i64, column: &str) -> DomainResult<u32> {
    u32::try_from(value)
        .map_err(|_| DomainError::SerializationError(format!("{column} out of range: {value}")))
}

fn to_u64(value: i64, column: &str) -> DomainResult<u64> {
    u64::try_from(value)
        .map_err(|_| DomainError::SerializationError(format!("{column} out of range: {value}")))
}
