use anyhow::{Context, Result};

use linecount::{ApiClient, ClientConfig};

use super::output::{print_json, truncate_text};
use crate::OutputFormat;

pub async fn cmd_history(config: &ClientConfig, format: OutputFormat) -> Result<()> {
    let api = ApiClient::from_config(config)?;
    let records = api
        .last_counts()
        .await
        .context("failed to fetch count history")?;

    if format == OutputFormat::Json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("(no counting runs yet)");
        return Ok(());
    }

    let processed = api.processed_videos_url()?;
    println!(
        "{:>4}  {:<28} {:<12} {:<10} {:>6}  {:<19} {:>8}  VIDEO",
        "ID", "SOURCE", "MODEL", "TRACKER", "COUNT", "STARTED", "TOOK"
    );
    for record in &records {
        let count = record
            .final_count
            .map_or_else(|| "-".to_string(), |c| c.to_string());
        let started = record.started_at().map_or_else(
            || "-".to_string(),
            |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
        );
        let took = record
            .elapsed()
            .map_or_else(|| "-".to_string(), |d| format!("{}s", d.num_seconds()));
        let link = record
            .playable_url(&processed)
            .map_or_else(|| "-".to_string(), String::from);
        println!(
            "{:>4}  {:<28} {:<12} {:<10} {:>6}  {:<19} {:>8}  {link}",
            record.id,
            truncate_text(&record.video_name, 28),
            truncate_text(&record.model_used, 12),
            truncate_text(&record.tracker_used, 10),
            count,
            started,
            took,
        );
    }
    Ok(())
}
