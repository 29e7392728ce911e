use std::path::Path;

use anyhow::{Context, Result};

use linecount::session::validate_model_file;
use linecount::{ApiClient, ClientConfig};

use super::output::print_json;
use crate::OutputFormat;

pub async fn cmd_upload_model(config: &ClientConfig, file: &Path, format: OutputFormat) -> Result<()> {
    // Checked before building a client so a wrong file never costs a request
    let name = validate_model_file(file)?;
    anyhow::ensure!(file.is_file(), "model file not found: {}", file.display());

    let api = ApiClient::from_config(config)?;
    eprintln!("📤 Uploading {name}...");
    let message = api
        .upload_model(file)
        .await
        .with_context(|| format!("failed to upload {name}"))?;

    if format == OutputFormat::Json {
        print_json(&serde_json::json!({ "model": name, "message": message }))
    } else {
        println!("✅ {message}");
        Ok(())
    }
}
