//! Mission domain model.
//!
//! A mission is one research request driven from Planning to a terminal phase.
//! Notes and draft versions are append-only; the rest of the record is mutated
//! only by the mission engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::agent::{DraftContent, NoteCandidate, Plan, UnsupportedClaim};
use super::knowledge::SourceKind;
use super::settings::EffectiveSettings;
use crate::domain::errors::{DomainError, DomainResult, ErrorKind};

/// Mission lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionPhase {
    Planning,
    Researching,
    Writing,
    Reflecting,
    Verifying,
    Finalized,
    Failed,
    Cancelled,
}

impl MissionPhase {
    /// Lowercase phase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Researching => "researching",
            Self::Writing => "writing",
            Self::Reflecting => "reflecting",
            Self::Verifying => "verifying",
            Self::Finalized => "finalized",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a stored phase name.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "planning" => Some(Self::Planning),
            "researching" => Some(Self::Researching),
            "writing" => Some(Self::Writing),
            "reflecting" => Some(Self::Reflecting),
            "verifying" => Some(Self::Verifying),
            "finalized" => Some(Self::Finalized),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Finalized, Failed and Cancelled are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Failed | Self::Cancelled)
    }

    /// Phases reachable in one step, excluding Failed and Cancelled which any
    /// non-terminal phase may enter.
    pub fn valid_transitions(&self) -> &'static [MissionPhase] {
        match self {
            Self::Planning => &[Self::Researching],
            Self::Researching => &[Self::Writing],
            Self::Writing => &[Self::Reflecting],
            Self::Reflecting => &[Self::Researching, Self::Verifying, Self::Finalized],
            Self::Verifying => &[Self::Researching, Self::Finalized],
            Self::Finalized | Self::Failed | Self::Cancelled => &[],
        }
    }

    /// Whether the lifecycle permits moving to `target`.
    pub fn can_transition_to(&self, target: MissionPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(target, Self::Failed | Self::Cancelled) || self.valid_transitions().contains(&target)
    }
}

impl fmt::Display for MissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Knowledge scope a mission may draw from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionScope {
    #[serde(default)]
    pub document_groups: Vec<String>,
    #[serde(default)]
    pub web_search_enabled: bool,
}

impl MissionScope {
    /// Search the given document groups only.
    pub fn documents(groups: Vec<String>) -> Self {
        Self {
            document_groups: groups,
            web_search_enabled: false,
        }
    }

    /// Also search the web.
    pub fn with_web(mut self) -> Self {
        self.web_search_enabled = true;
        self
    }

    /// Whether the library is in scope.
    pub fn searches_library(&self) -> bool {
        !self.document_groups.is_empty()
    }
}

/// Origin of a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteSource {
    pub kind: SourceKind,
    /// Document id or URL. Notes with the same reference supersede each other.
    pub reference: String,
    #[serde(default)]
    pub title: String,
}

/// Immutable unit of evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    /// Position in the mission's note log, starting at 1.
    pub sequence: u64,
    pub iteration: u32,
    pub source: NoteSource,
    pub content: String,
    pub query: String,
    pub section_ids: Vec<String>,
    pub invocation_seq: u64,
    /// Earlier note with the same source reference that this one replaces.
    pub supersedes: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// One immutable version of the mission's draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftVersion {
    /// Starts at 1.
    pub version: u32,
    pub parent_version: Option<u32>,
    pub iteration: u32,
    pub content: DraftContent,
    pub invocation_seq: u64,
    pub created_at: DateTime<Utc>,
}

/// Last fatal error of a failed mission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Phase the mission was in when it failed.
    pub phase: MissionPhase,
}

/// Notes supporting one section of the latest draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionProvenance {
    pub section_id: String,
    pub heading: String,
    pub notes: Vec<Note>,
}

/// A research mission and its accumulated history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: Uuid,
    pub owner: String,
    pub goal: String,
    pub scope: MissionScope,
    pub settings: EffectiveSettings,
    pub phase: MissionPhase,
    pub iteration_count: u32,
    pub plan: Option<Plan>,
    pub(crate) notes: Vec<Note>,
    pub(crate) drafts: Vec<DraftVersion>,
    /// Instructions carried into the next research round and draft.
    pub revision_instructions: Option<String>,
    pub last_error: Option<MissionFailure>,
    /// Set when the iteration cap finalized a draft Reflection did not accept.
    pub forced_finalization: bool,
    pub unverified_claims: Vec<UnsupportedClaim>,
    /// Next invocation sequence number is `invocation_count + 1`.
    pub invocation_count: u64,
    /// Mission this one revises, if any.
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Mission {
    /// A new mission in the Created phase.
    pub fn new(
        owner: impl Into<String>,
        goal: impl Into<String>,
        scope: MissionScope,
        settings: EffectiveSettings,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            goal: goal.into(),
            scope,
            settings,
            phase: MissionPhase::Planning,
            iteration_count: 0,
            plan: None,
            notes: Vec::new(),
            drafts: Vec::new(),
            revision_instructions: None,
            last_error: None,
            forced_finalization: false,
            unverified_claims: Vec::new(),
            invocation_count: 0,
            parent_id: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Mark this mission as a revision of `parent_id`.
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Iteration cap from the mission's settings.
    pub fn max_iterations(&self) -> u32 {
        self.settings.max_iterations()
    }

    /// Whether another write/reflect cycle is allowed.
    pub fn iterations_remaining(&self) -> bool {
        self.iteration_count < self.max_iterations()
    }

    /// Notes collected so far, oldest first.
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Draft versions, oldest first.
    pub fn drafts(&self) -> &[DraftVersion] {
        &self.drafts
    }

    /// The newest draft, if any.
    pub fn latest_draft(&self) -> Option<&DraftVersion> {
        self.drafts.last()
    }

    /// Notes that have not been superseded by a newer note.
    pub fn active_notes(&self) -> Vec<&Note> {
        let superseded: std::collections::HashSet<Uuid> =
            self.notes.iter().filter_map(|n| n.supersedes).collect();
        self.notes
            .iter()
            .filter(|n| !superseded.contains(&n.id))
            .collect()
    }

    /// Append a note built from a research candidate and return a copy of it.
    pub fn append_note(&mut self, candidate: NoteCandidate) -> Note {
        let supersedes = self
            .active_notes()
            .into_iter()
            .rev()
            .find(|n| n.source.reference == candidate.source.reference)
            .map(|n| n.id);

        let note = Note {
            id: Uuid::new_v4(),
            sequence: self.notes.len() as u64 + 1,
            iteration: self.iteration_count,
            source: candidate.source,
            content: candidate.content,
            query: candidate.query,
            section_ids: candidate.section_ids,
            invocation_seq: candidate.invocation_seq,
            supersedes,
            created_at: Utc::now(),
        };
        self.notes.push(note.clone());
        self.touch();
        note
    }

    /// Append the next draft version, parented on the current latest.
    pub fn push_draft(&mut self, content: DraftContent, invocation_seq: u64) -> DraftVersion {
        let parent_version = self.latest_draft().map(|d| d.version);
        let draft = DraftVersion {
            version: parent_version.unwrap_or(0) + 1,
            parent_version,
            iteration: self.iteration_count,
            content,
            invocation_seq,
            created_at: Utc::now(),
        };
        self.drafts.push(draft.clone());
        self.touch();
        draft
    }

    /// Move to `target`, rejecting transitions the lifecycle forbids.
    pub fn transition_to(&mut self, target: MissionPhase) -> DomainResult<()> {
        if !self.phase.can_transition_to(target) {
            return Err(DomainError::InvalidPhaseTransition {
                from: self.phase,
                to: target,
            });
        }
        self.phase = target;
        if target.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    /// Move to Failed and record the error. Notes and drafts are untouched.
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) -> DomainResult<()> {
        let phase = self.phase;
        self.transition_to(MissionPhase::Failed)?;
        self.last_error = Some(MissionFailure {
            kind,
            message: message.into(),
            phase,
        });
        Ok(())
    }

    /// Section → supporting notes for the latest draft.
    pub fn provenance(&self) -> Vec<SectionProvenance> {
        let Some(draft) = self.latest_draft() else {
            return Vec::new();
        };
        draft
            .content
            .sections
            .iter()
            .map(|section| SectionProvenance {
                section_id: section.section_id.clone(),
                heading: section.heading.clone(),
                notes: section
                    .note_ids
                    .iter()
                    .filter_map(|id| self.notes.iter().find(|n| n.id == *id).cloned())
                    .collect(),
            })
            .collect()
    }

    pub(crate) fn restore_history(&mut self, notes: Vec<Note>, drafts: Vec<DraftVersion>) {
        self.notes = notes;
        self.drafts = drafts;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DraftSection, SettingsLayer};
    use crate::services::settings_resolver::resolve;
    use crate::domain::models::ModelBinding;

    fn settings() -> EffectiveSettings {
        let mut defaults = SettingsLayer::system_defaults();
        defaults.models.mid = Some(ModelBinding::new("test-model"));
        resolve(
            &SettingsLayer::default(),
            &SettingsLayer::default(),
            &SettingsLayer::default(),
            &defaults,
        )
        .unwrap()
    }

    fn mission() -> Mission {
        Mission::new("alice", "Why is the sky blue?", MissionScope::default(), settings())
    }

    fn candidate(reference: &str, content: &str) -> NoteCandidate {
        NoteCandidate {
            source: NoteSource {
                kind: SourceKind::Web,
                reference: reference.to_string(),
                title: String::new(),
            },
            content: content.to_string(),
            query: "q".to_string(),
            section_ids: vec!["s1".to_string()],
            invocation_seq: 1,
        }
    }

    #[test]
    fn test_phase_transitions() {
        use MissionPhase::*;
        assert!(Planning.can_transition_to(Researching));
        assert!(!Planning.can_transition_to(Writing));
        assert!(Reflecting.can_transition_to(Researching));
        assert!(Verifying.can_transition_to(Researching));
        assert!(!Writing.can_transition_to(Researching));
        assert!(Writing.can_transition_to(Cancelled));
        assert!(Researching.can_transition_to(Failed));
        for terminal in [Finalized, Failed, Cancelled] {
            assert!(!terminal.can_transition_to(Failed));
            assert!(!terminal.can_transition_to(Researching));
        }
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut m = mission();
        let err = m.transition_to(MissionPhase::Finalized).unwrap_err();
        assert!(matches!(err, DomainError::InvalidPhaseTransition { .. }));
        assert_eq!(m.phase, MissionPhase::Planning);
    }

    #[test]
    fn test_draft_versions_chain() {
        let mut m = mission();
        let v1 = m.push_draft(DraftContent::default(), 1);
        let v2 = m.push_draft(DraftContent::default(), 2);
        assert_eq!(v1.version, 1);
        assert_eq!(v1.parent_version, None);
        assert_eq!(v2.version, 2);
        assert_eq!(v2.parent_version, Some(1));
        assert_eq!(m.latest_draft().unwrap().version, 2);
    }

    #[test]
    fn test_note_supersedes_same_reference() {
        let mut m = mission();
        let first = m.append_note(candidate("https://a", "old"));
        let other = m.append_note(candidate("https://b", "other"));
        let second = m.append_note(candidate("https://a", "new"));

        assert_eq!(second.supersedes, Some(first.id));
        assert_eq!(other.supersedes, None);
        assert_eq!(m.notes().len(), 3);
        let active: Vec<Uuid> = m.active_notes().iter().map(|n| n.id).collect();
        assert_eq!(active, vec![other.id, second.id]);
    }

    #[test]
    fn test_fail_preserves_history() {
        let mut m = mission();
        m.append_note(candidate("doc-1", "evidence"));
        m.fail(ErrorKind::Fatal, "provider rejected key").unwrap();

        assert_eq!(m.phase, MissionPhase::Failed);
        assert_eq!(m.notes().len(), 1);
        let failure = m.last_error.as_ref().unwrap();
        assert_eq!(failure.phase, MissionPhase::Planning);
        assert!(m.finished_at.is_some());
        assert!(m.fail(ErrorKind::Fatal, "again").is_err());
    }

    #[test]
    fn test_provenance_follows_latest_draft() {
        let mut m = mission();
        let note = m.append_note(candidate("doc-1", "evidence"));
        m.push_draft(
            DraftContent {
                title: "T".to_string(),
                sections: vec![DraftSection {
                    section_id: "s1".to_string(),
                    heading: "One".to_string(),
                    body: "text".to_string(),
                    note_ids: vec![note.id],
                }],
            },
            2,
        );

        let trail = m.provenance();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].notes[0].source.reference, "doc-1");
    }
}
