use std::path::Path;

use serde::Serialize;
use stocksync_core::config::ConfigOverrides;
use stocksync_core::util::is_http_url;

use crate::cli::ConfigCommands;
use crate::commands::common::CliContext;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct ConfigItem {
    pub config_file: String,
    pub url: String,
    pub database: String,
    pub username: String,
    pub password_set: bool,
    pub request_timeout_secs: Option<u64>,
}

pub fn run_config(command: ConfigCommands, context: &CliContext) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show { json } => run_config_show(json, context),
        ConfigCommands::Init {
            url,
            database,
            username,
            password,
            request_timeout_secs,
        } => {
            let overrides = ConfigOverrides {
                platform: context.platform,
                url,
                database,
                username,
                password,
                request_timeout_secs,
            };
            run_config_init(overrides, &context.config_path)?;
            println!("{}", context.config_path.display());
            Ok(())
        }
    }
}

pub fn run_config_show(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let config = context.remote_config()?;
    let item = ConfigItem {
        config_file: context.config_path.display().to_string(),
        url: config.url,
        database: config.database,
        username: config.username,
        password_set: !config.password.is_empty(),
        request_timeout_secs: config.request_timeout_secs,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    println!("Config file: {}", item.config_file);
    println!("URL:         {}", item.url);
    println!("Database:    {}", item.database);
    println!("Username:    {}", item.username);
    println!(
        "Password:    {}",
        if item.password_set { "********" } else { "(empty)" }
    );
    if let Some(timeout) = item.request_timeout_secs {
        println!("Timeout:     {timeout}s");
    }
    Ok(())
}

/// Merge `overrides` into the config file at `path`, keeping values not given.
pub fn run_config_init(overrides: ConfigOverrides, path: &Path) -> Result<(), CliError> {
    if let Some(url) = overrides.url.as_deref() {
        if !is_http_url(url.trim()) {
            return Err(CliError::Config(format!(
                "remote URL must start with http:// or https://, got '{url}'"
            )));
        }
    }
    if overrides.request_timeout_secs == Some(0) {
        return Err(CliError::Config(
            "request timeout must be at least one second".to_string(),
        ));
    }

    let merged = ConfigOverrides::load(path).merge(overrides);
    merged.save(path)?;
    tracing::info!("Wrote remote configuration to {}", path.display());
    Ok(())
}
