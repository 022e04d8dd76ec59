use super::open_adapter;
use crate::table::Table;
use crate::ui;
use mnemos_types::error::StoreResult;
use std::path::Path;

pub async fn cmd_migrate(config_path: Option<&Path>) -> StoreResult<()> {
    let adapter = open_adapter(config_path).await?;
    let report = adapter.migration_report().clone();
    adapter.close().await;

    ui::section(&format!("Schema migration ({})", adapter.backend()));
    ui::blank();
    let mut table = Table::new(&["Module", "Result"]);
    for module in &report.applied {
        table.row([module.as_str(), "applied"]);
    }
    for module in &report.reconciled {
        table.row([module.as_str(), "reconciled"]);
    }
    for module in &report.skipped {
        table.row([module.as_str(), "up to date"]);
    }
    table.print();
    ui::blank();
    if report.applied.is_empty() && report.reconciled.is_empty() {
        ui::success("Schema already up to date");
    } else {
        ui::success(&format!(
            "{} module(s) applied, {} reconciled",
            report.applied.len(),
            report.reconciled.len()
        ));
    }
    Ok(())
}
