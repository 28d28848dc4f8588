//! Research coverage policies.
//!
//! The mission engine leaves Researching once the policy reports every plan
//! section covered, or when the round cap for the iteration is reached.

use std::collections::HashMap;

use crate::domain::models::{IterationTargets, Note, Plan};

/// Decides when research has gathered enough evidence.
pub trait CoveragePolicy: Send + Sync {
    /// Plan section ids that still need evidence, in plan order.
    fn uncovered_sections(&self, plan: &Plan, notes: &[&Note], targets: &IterationTargets) -> Vec<String>;

    fn is_sufficient(&self, plan: &Plan, notes: &[&Note], targets: &IterationTargets) -> bool {
        self.uncovered_sections(plan, notes, targets).is_empty()
    }
}

/// A section is covered once it has `notes_per_section` active notes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SectionNoteCount;

impl CoveragePolicy for SectionNoteCount {
    fn uncovered_sections(&self, plan: &Plan, notes: &[&Note], targets: &IterationTargets) -> Vec<String> {
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for note in notes {
            for section in &note.section_ids {
                *counts.entry(section.as_str()).or_default() += 1;
            }
        }
        plan.sections
            .iter()
            .filter(|s| counts.get(s.id.as_str()).copied().unwrap_or(0) < targets.notes_per_section)
            .map(|s| s.id.clone())
            .collect()
    }
}
