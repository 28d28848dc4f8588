//! Short ID prefix resolution for mission commands.
//!
//! Any unique prefix of a mission UUID is accepted, similar to git short
//! hashes.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

const MISSION_QUERY: &str = "SELECT id FROM missions WHERE id LIKE ? ORDER BY created_at LIMIT 10";

/// Resolve a full or unique prefix of a mission id.
pub async fn resolve_mission_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(prefix) {
        return Ok(uuid);
    }

    validate_prefix(prefix)?;

    let pattern = format!("{}%", prefix.to_lowercase());
    let rows: Vec<(String,)> = sqlx::query_as(MISSION_QUERY)
        .bind(&pattern)
        .fetch_all(pool)
        .await?;

    match rows.as_slice() {
        [] => bail!("No mission found matching '{prefix}'"),
        [(id,)] => Ok(Uuid::parse_str(id)?),
        _ => {
            let mut msg = format!("Ambiguous prefix '{prefix}' matches several missions:");
            for (id,) in &rows {
                msg.push_str(&format!("\n  {id}"));
            }
            bail!("{msg}")
        }
    }
}

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("ID prefix must not be empty");
    }
    if !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        bail!("Invalid ID prefix '{prefix}': must contain only hex characters and dashes");
    }
    Ok(())
}
