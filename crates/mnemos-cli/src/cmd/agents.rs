use super::open_adapter;
use crate::table::Table;
use crate::ui;
use mnemos_types::agent::DeleteOutcome;
use mnemos_types::error::StoreResult;
use std::path::Path;
use uuid::Uuid;

pub async fn cmd_agents(config_path: Option<&Path>, json: bool) -> StoreResult<()> {
    let adapter = open_adapter(config_path).await?;
    let agents = adapter.agents().get_agents().await?;
    adapter.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
        return Ok(());
    }
    if agents.is_empty() {
        ui::hint("No agents stored yet.");
        return Ok(());
    }
    let mut table = Table::new(&["ID", "Name", "Enabled", "Plugins", "Created"]).numeric(3);
    for agent in &agents {
        table.row([
            agent.id.to_string(),
            agent.name.clone(),
            if agent.enabled { "yes" } else { "no" }.to_string(),
            agent.plugins.len().to_string(),
            agent.created_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    table.print();
    Ok(())
}

/// Returns `false` when nothing was deleted.
pub async fn cmd_delete_agent(config_path: Option<&Path>, id: Uuid, yes: bool) -> StoreResult<bool> {
    if !yes {
        ui::hint(&format!(
            "This removes agent {id} and every record it owns. Re-run with --yes to confirm."
        ));
        return Ok(false);
    }
    let adapter = open_adapter(config_path).await?;
    let outcome = adapter.agents().delete_agent(id).await?;
    adapter.close().await;

    match outcome {
        DeleteOutcome::NotFound => {
            ui::kv_warn("Agent", &format!("{id} not found"));
            Ok(false)
        }
        DeleteOutcome::Deleted(report) => {
            let mut table = Table::new(&["Table", "Rows"]).numeric(1);
            for (name, rows) in &report.removed {
                table.row([name.clone(), rows.to_string()]);
            }
            table.print();
            ui::success(&format!("Deleted agent {id} ({} rows)", report.total()));
            Ok(true)
        }
    }
}
