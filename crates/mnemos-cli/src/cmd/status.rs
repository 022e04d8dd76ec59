use super::open_adapter;
use crate::table::Table;
use crate::ui;
use mnemos_store::migration::applied_modules;
use mnemos_types::error::StoreResult;
use std::path::Path;

pub async fn cmd_status(config_path: Option<&Path>, json: bool) -> StoreResult<()> {
    let adapter = open_adapter(config_path).await?;
    let ready = adapter.is_ready().await;
    let modules = applied_modules(adapter.connection().as_ref()).await?;
    let agents = adapter.agents().count_agents().await?;
    let dimension = adapter.memories().embedding_dimension();
    adapter.close().await;

    if json {
        let body = serde_json::json!({
            "backend": adapter.backend().as_str(),
            "ready": ready,
            "agents": agents,
            "embedding_dimension": dimension,
            "modules": modules
                .iter()
                .map(|m| serde_json::json!({
                    "module": m.module,
                    "checksum": m.checksum,
                    "applied_at": m.applied_at.to_rfc3339(),
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    ui::section("Mnemos Storage Status");
    ui::blank();
    ui::kv("Backend", adapter.backend().as_str());
    if ready {
        ui::kv_ok("Health", "ready");
    } else {
        ui::kv_warn("Health", "not ready");
    }
    ui::kv("Agents", &agents.to_string());
    match dimension {
        Some(width) => ui::kv("Embeddings", &format!("{width} dimensions")),
        None => ui::kv_warn("Embeddings", "dimension not configured"),
    }
    ui::blank();

    let mut table = Table::new(&["Module", "Checksum", "Applied"]);
    for m in &modules {
        table.row([
            m.module.clone(),
            m.checksum.chars().take(12).collect(),
            m.applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    table.print();
    Ok(())
}
