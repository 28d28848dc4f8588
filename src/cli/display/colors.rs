//! Phase color mapping for CLI output.
//!
//! `console` drops styling when stdout is not a terminal or `NO_COLOR` is set.

use console::{style, StyledObject};

use crate::domain::models::MissionPhase;

/// Color scheme:
/// - Green:  finalized
/// - Yellow: researching, writing
/// - Blue:   planning
/// - Cyan:   reflecting, verifying
/// - Red:    failed
/// - Dim:    cancelled
pub fn colorize_phase(phase: MissionPhase) -> StyledObject<&'static str> {
    let text = phase.as_str();
    match phase {
        MissionPhase::Finalized => style(text).green().bold(),
        MissionPhase::Researching | MissionPhase::Writing => style(text).yellow(),
        MissionPhase::Planning => style(text).blue(),
        MissionPhase::Reflecting | MissionPhase::Verifying => style(text).cyan(),
        MissionPhase::Failed => style(text).red().bold(),
        MissionPhase::Cancelled => style(text).dim(),
    }
}

/// Dimmed field label for detail views.
pub fn label(text: &str) -> StyledObject<String> {
    style(format!("{text}:")).dim()
}

/// Bold heading for a detail section.
pub fn section_header(text: &str) -> StyledObject<&str> {
    style(text).bold().underlined()
}
