//! Mission CLI commands.

use anyhow::{anyhow, bail, Result};
use clap::{Args, Subcommand};
use std::collections::HashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::cli::context::AppContext;
use crate::cli::display::{
    action_success, colorize_phase, count_label, list_table, output, relative_time, render_list,
    section_header, short_id, truncate_ellipsis, CommandOutput, DetailView,
};
use crate::cli::id_resolver::resolve_mission_id;
use crate::cli::progress::{create_spinner, ProgressBarExt};
use crate::domain::models::{Mission, MissionPhase, MissionScope, SettingsLayer};
use crate::domain::ports::MissionFilter;
use crate::services::mission_control::{MissionControl, MissionReport, MissionStatus};
use crate::services::mission_engine::MissionEvent;

/// Arguments for `maestro mission`.
#[derive(Args, Debug)]
pub struct MissionArgs {
    #[command(subcommand)]
    pub command: MissionCommands,
}

/// Mission subcommands.
#[derive(Subcommand, Debug)]
pub enum MissionCommands {
    /// Start a research mission and follow it until it ends
    Run {
        /// What to research and write about
        goal: String,
        /// Document group to search (repeatable)
        #[arg(short, long = "group")]
        groups: Vec<String>,
        /// Allow live web search
        #[arg(long)]
        web: bool,
        /// Iteration preset (quick, standard, deep, custom)
        #[arg(short, long)]
        preset: Option<String>,
        /// Override the preset's iteration cap
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Skip the verification pass
        #[arg(long)]
        no_verify: bool,
        /// Any other mission setting (format: "key=value", repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// Show mission status
    Status {
        /// Mission ID or unique prefix
        id: String,
    },
    /// Cancel a mission
    Cancel {
        /// Mission ID or unique prefix
        id: String,
    },
    /// List missions
    List {
        /// Filter by phase
        #[arg(short, long)]
        phase: Option<String>,
        /// Maximum number of missions to display
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Include missions of every owner
        #[arg(long)]
        all: bool,
    },
    /// Print the latest draft with its sources
    Report {
        /// Mission ID or unique prefix
        id: String,
    },
    /// Continue an interrupted mission from its stored phase
    Resume {
        /// Mission ID or unique prefix
        id: String,
    },
}

impl CommandOutput for MissionStatus {
    fn to_human(&self) -> String {
        let draft = self
            .latest_draft
            .as_ref()
            .map(|d| format!("v{} ({})", d.version, d.content.title));
        let error = self
            .last_error
            .as_ref()
            .map(|e| format!("{} in {}: {}", e.kind.as_str(), e.phase, e.message));

        DetailView::new(&format!("Mission {}", self.mission_id))
            .field("Goal", truncate_ellipsis(&self.goal, 72))
            .field("Owner", self.owner.clone())
            .field("Phase", colorize_phase(self.phase).to_string())
            .field(
                "Iteration",
                format!("{}/{}", self.iteration_count, self.max_iterations),
            )
            .field("Notes", self.note_count.to_string())
            .field_opt("Draft", draft)
            .field_opt("Error", error)
            .field_opt(
                "Finalized",
                self.forced_finalization
                    .then_some("at the iteration cap without acceptance"),
            )
            .field_opt("Running", self.running.then_some("in this process"))
            .render()
    }
}

impl CommandOutput for MissionReport {
    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        match &self.markdown {
            Some(markdown) => lines.push(markdown.trim_end().to_string()),
            None => lines.push(format!(
                "Mission {} produced no draft ({}).",
                self.mission_id,
                colorize_phase(self.phase)
            )),
        }

        if let Some(error) = &self.last_error {
            lines.push(String::new());
            lines.push(format!(
                "Mission failed in {}: {}",
                error.phase, error.message
            ));
        }
        if self.forced_finalization {
            lines.push(String::new());
            lines.push("Note: finalized at the iteration cap without a passing review.".to_string());
        }
        if !self.unverified_claims.is_empty() {
            lines.push(String::new());
            lines.push(section_header("Unverified claims").to_string());
            for claim in &self.unverified_claims {
                if claim.reason.is_empty() {
                    lines.push(format!("  - {}", claim.claim));
                } else {
                    lines.push(format!("  - {} ({})", claim.claim, claim.reason));
                }
            }
        }
        if !self.provenance.is_empty() {
            lines.push(String::new());
            lines.push(section_header("Sources").to_string());
            for section in &self.provenance {
                lines.push(format!(
                    "  {} ({})",
                    section.heading,
                    count_label(section.notes.len(), "note", "notes")
                ));
                for note in &section.notes {
                    let title = if note.source.title.is_empty() {
                        &note.source.reference
                    } else {
                        &note.source.title
                    };
                    lines.push(format!("    [{}] {title} <{}>", note.sequence, note.source.reference));
                }
            }
        }
        lines.join("\n")
    }
}

/// One mission row in list output.
#[derive(Debug, serde::Serialize)]
pub struct MissionSummary {
    pub id: Uuid,
    pub owner: String,
    pub goal: String,
    pub phase: MissionPhase,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub note_count: usize,
    pub draft_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Mission> for MissionSummary {
    fn from(mission: &Mission) -> Self {
        Self {
            id: mission.id,
            owner: mission.owner.clone(),
            goal: mission.goal.clone(),
            phase: mission.phase,
            iteration_count: mission.iteration_count,
            max_iterations: mission.max_iterations(),
            note_count: mission.notes().len(),
            draft_count: mission.drafts().len(),
            created_at: mission.created_at,
        }
    }
}

/// JSON output of `maestro mission list`.
#[derive(Debug, serde::Serialize)]
pub struct MissionListOutput {
    pub missions: Vec<MissionSummary>,
    pub total: usize,
}

impl CommandOutput for MissionListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "phase", "iter", "notes", "created", "goal"]);
        for mission in &self.missions {
            table.add_row(vec![
                short_id(&mission.id),
                mission.phase.to_string(),
                format!("{}/{}", mission.iteration_count, mission.max_iterations),
                mission.note_count.to_string(),
                relative_time(&mission.created_at),
                truncate_ellipsis(&mission.goal, 48),
            ]);
        }
        render_list("mission", &table, self.total)
    }
}

/// JSON output of mission actions such as cancel or resume.
#[derive(Debug, serde::Serialize)]
pub struct MissionActionOutput {
    pub mission_id: Uuid,
    pub phase: MissionPhase,
    pub message: String,
}

impl CommandOutput for MissionActionOutput {
    fn to_human(&self) -> String {
        action_success(&self.message)
    }
}

/// Mission-tier settings from the `run` flags. Unknown keys are rejected here
/// rather than silently ignored.
pub fn parse_overrides(
    preset: Option<String>,
    max_iterations: Option<u32>,
    no_verify: bool,
    set: &[String],
) -> Result<SettingsLayer> {
    let mut values = HashMap::new();
    for pair in set {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid setting '{pair}': expected KEY=VALUE"))?;
        let key = key.trim();
        if !SettingsLayer::is_known_key(key) {
            bail!("Unknown setting: {key}");
        }
        values.insert(key.to_string(), value.trim().to_string());
    }
    if let Some(preset) = preset {
        values.insert("iteration_preset".to_string(), preset);
    }
    if let Some(max) = max_iterations {
        values.insert("max_iterations".to_string(), max.to_string());
    }
    if no_verify {
        values.insert("verification_enabled".to_string(), "false".to_string());
    }
    Ok(SettingsLayer::from_key_values(&values)?)
}

fn describe(event: &MissionEvent) -> Option<String> {
    match event {
        MissionEvent::PhaseChanged { to, iteration, .. } => {
            Some(format!("{to} (iteration {})", iteration + 1))
        }
        MissionEvent::NotesAdded { added, total, .. } => {
            Some(format!("researching: +{added} notes ({total} total)"))
        }
        MissionEvent::DraftProduced { version, .. } => Some(format!("draft v{version} written")),
        MissionEvent::Finished { .. } => None,
    }
}

/// Follow a mission this process is running until it stops. Ctrl-C cancels
/// it and waits for the cancellation to land.
pub(crate) async fn follow(
    control: &MissionControl,
    mut events: broadcast::Receiver<MissionEvent>,
    id: Uuid,
    json_mode: bool,
) -> Result<Mission> {
    let spinner = create_spinner(json_mode);
    spinner.set_message(format!("mission {} started", short_id(&id)));

    let finished = control.wait(id);
    tokio::pin!(finished);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelling = false;
    let mut events_open = true;

    let mission = loop {
        tokio::select! {
            mission = &mut finished => break mission?,
            event = events.recv(), if events_open => match event {
                Ok(event) if event.mission_id() == id => {
                    if let Some(message) = describe(&event) {
                        spinner.set_message(message);
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => events_open = false,
            },
            _ = &mut ctrl_c, if !cancelling => {
                cancelling = true;
                spinner.set_message("cancelling");
                control.cancel(id).await?;
            }
        }
    };

    let summary = format!("mission {} {}", short_id(&id), mission.phase);
    match mission.phase {
        MissionPhase::Finalized => spinner.finish_success(summary),
        MissionPhase::Failed => spinner.finish_error(summary),
        _ => spinner.finish_warning(summary),
    }
    Ok(mission)
}

/// Dispatch a mission subcommand.
pub async fn execute(args: MissionArgs, owner: &str, json_mode: bool) -> Result<()> {
    let ctx = AppContext::build().await?;
    let control = &ctx.control;

    match args.command {
        MissionCommands::Run {
            goal,
            groups,
            web,
            preset,
            max_iterations,
            no_verify,
            set,
        } => {
            let overrides = parse_overrides(preset, max_iterations, no_verify, &set)?;
            let mut scope = MissionScope::documents(groups);
            if web {
                scope = scope.with_web();
            }

            let events = control.subscribe();
            let id = control.create_mission(owner, &goal, scope, overrides).await?;
            follow(control, events, id, json_mode).await?;
            output(&control.report(id).await?, json_mode);
        }
        MissionCommands::Status { id } => {
            let id = resolve_mission_id(&ctx.pool, &id).await?;
            output(&control.get_status(id).await?, json_mode);
        }
        MissionCommands::Cancel { id } => {
            let id = resolve_mission_id(&ctx.pool, &id).await?;
            let phase = control.cancel(id).await?;
            let message = if phase == MissionPhase::Cancelled {
                format!("Mission {} cancelled", short_id(&id))
            } else {
                format!("Mission {} already ended in {phase}", short_id(&id))
            };
            output(
                &MissionActionOutput {
                    mission_id: id,
                    phase,
                    message,
                },
                json_mode,
            );
        }
        MissionCommands::List { phase, limit, all } => {
            let phase = phase
                .map(|p| MissionPhase::from_str(&p).ok_or_else(|| anyhow!("Invalid phase: {p}")))
                .transpose()?;
            let filter = MissionFilter {
                owner: (!all).then(|| owner.to_string()),
                phase,
                limit: Some(limit),
            };
            let missions: Vec<MissionSummary> =
                control.list(filter).await?.iter().map(MissionSummary::from).collect();
            let total = missions.len();
            output(&MissionListOutput { missions, total }, json_mode);
        }
        MissionCommands::Report { id } => {
            let id = resolve_mission_id(&ctx.pool, &id).await?;
            output(&control.report(id).await?, json_mode);
        }
        MissionCommands::Resume { id } => {
            let id = resolve_mission_id(&ctx.pool, &id).await?;
            let events = control.subscribe();
            control.resume(id).await?;
            follow(control, events, id, json_mode).await?;
            output(&control.report(id).await?, json_mode);
        }
    }

    control.shutdown().await;
    Ok(())
}
