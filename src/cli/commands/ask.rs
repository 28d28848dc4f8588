//! `maestro ask`: direct questions and routed instructions.

use anyhow::Result;
use clap::Args;
use uuid::Uuid;

use crate::cli::commands::mission::follow;
use crate::cli::context::AppContext;
use crate::cli::display::{output, short_id, CommandOutput};
use crate::cli::id_resolver::resolve_mission_id;
use crate::services::mission_control::InstructionOutcome;

/// Arguments for `maestro ask`.
#[derive(Args, Debug)]
pub struct AskArgs {
    /// Question or instruction
    pub question: String,

    /// Answer from (or revise) this mission's latest draft
    #[arg(short, long)]
    pub mission: Option<String>,

    /// Let the router decide whether to answer, research, or revise
    #[arg(long)]
    pub route: bool,
}

/// JSON output of `maestro ask`.
#[derive(Debug, serde::Serialize)]
pub struct AnswerOutput {
    pub answer: String,
    pub mission_id: Option<Uuid>,
}

impl CommandOutput for AnswerOutput {
    fn to_human(&self) -> String {
        self.answer.trim_end().to_string()
    }
}

/// Answer a question, optionally in the context of a mission.
pub async fn execute(args: AskArgs, owner: &str, json_mode: bool) -> Result<()> {
    let ctx = AppContext::build().await?;
    let control = &ctx.control;
    let mission_id = match &args.mission {
        Some(prefix) => Some(resolve_mission_id(&ctx.pool, prefix).await?),
        None => None,
    };

    if !args.route {
        let answer = control.ask(owner, &args.question, mission_id).await?;
        output(&AnswerOutput { answer, mission_id }, json_mode);
        return Ok(());
    }

    let events = control.subscribe();
    match control.instruct(owner, &args.question, mission_id).await? {
        InstructionOutcome::Answered { answer } => {
            output(&AnswerOutput { answer, mission_id }, json_mode);
        }
        InstructionOutcome::MissionStarted { mission_id, parent_id } => {
            if let Some(parent) = parent_id {
                tracing::info!(parent = %short_id(&parent), "revising through a follow-up mission");
            }
            follow(control, events, mission_id, json_mode).await?;
            output(&control.report(mission_id).await?, json_mode);
        }
    }

    control.shutdown().await;
    Ok(())
}
