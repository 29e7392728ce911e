use anyhow::{Context, Result};

use linecount::{ApiClient, ClientConfig};

use super::output::{print_json, print_list};
use crate::OutputFormat;

pub async fn cmd_models(config: &ClientConfig, format: OutputFormat) -> Result<()> {
    let api = ApiClient::from_config(config)?;
    let models = api.models().await.context("failed to list models")?;
    print_list("models", &models, format == OutputFormat::Json)
}

pub async fn cmd_trackers(config: &ClientConfig, format: OutputFormat) -> Result<()> {
    let api = ApiClient::from_config(config)?;
    let trackers = api.trackers().await.context("failed to list trackers")?;
    print_list("trackers", &trackers, format == OutputFormat::Json)
}

pub async fn cmd_custom_models(config: &ClientConfig, format: OutputFormat) -> Result<()> {
    let api = ApiClient::from_config(config)?;
    let models = api
        .custom_models()
        .await
        .context("failed to list custom models")?;
    print_list("custom models", &models, format == OutputFormat::Json)
}

pub async fn cmd_classes(config: &ClientConfig, model: &str, format: OutputFormat) -> Result<()> {
    let api = ApiClient::from_config(config)?;
    let classes = api
        .model_classes(model)
        .await
        .with_context(|| format!("failed to list classes of {model}"))?;

    if format == OutputFormat::Json {
        return print_json(&classes);
    }
    println!("🏷️  {model}: {} classes", classes.len());
    for class in &classes {
        println!("{:>4}  {}", class.id, class.name);
    }
    Ok(())
}
