//! Process model CLI commands: list, show, install.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use tasklane_core::repository::model::ProcessModelStore;
use tasklane_infra::models::FsModelStore;

use super::plural;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum ModelCommand {
    /// List installed models.
    #[command(alias = "ls")]
    List,

    /// Show the processes, lanes and tasks of a model.
    Show {
        /// Model identifier.
        id: String,

        /// Exact version (default: latest).
        #[arg(id = "model_version", long = "model-version", value_name = "VERSION")]
        version: Option<semver::Version>,
    },

    /// Validate a YAML model file and copy it into the models directory.
    Install {
        /// Path to the model file.
        path: PathBuf,
    },
}

pub async fn run(state: &AppState, command: ModelCommand, json: bool) -> Result<()> {
    match command {
        ModelCommand::List => list(state, json).await,
        ModelCommand::Show { id, version } => show(state, &id, version.as_ref(), json).await,
        ModelCommand::Install { path } => install(state, path, json),
    }
}

async fn list(state: &AppState, json: bool) -> Result<()> {
    let models = state.service.models().list_models().await?;

    if json {
        let out: Vec<_> = models
            .iter()
            .map(|m| {
                serde_json::json!({
                    "id": m.id,
                    "name": m.name,
                    "version": m.version.to_string(),
                    "processes": m.processes.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if models.is_empty() {
        println!();
        println!(
            "  {} No models in {}. Add one with: {}",
            style("i").blue().bold(),
            style(state.models_dir.display()).dim(),
            style("tlane model install <file.yaml>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Version").fg(Color::White),
        Cell::new("Processes").fg(Color::White),
    ]);
    for model in &models {
        table.add_row(vec![
            Cell::new(&model.id).fg(Color::Cyan),
            Cell::new(&model.name),
            Cell::new(&model.version).fg(Color::DarkGrey),
            Cell::new(model.processes.len()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!("  {} model{}", style(models.len()).bold(), plural(models.len()));
    println!();
    Ok(())
}

async fn show(
    state: &AppState,
    id: &str,
    version: Option<&semver::Version>,
    json: bool,
) -> Result<()> {
    let Some(model) = state.service.models().get_model(id, version).await? else {
        bail!("process model not found: {id}");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(model.as_ref())?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style(&model.name).cyan().bold(),
        style(format!("v{}", model.version)).dim()
    );
    for process in &model.processes {
        let primary = if process.id == model.primary_process {
            format!(" {}", style("(primary)").green())
        } else {
            String::new()
        };
        println!();
        println!("  {}{primary}", style(format!("── {} ──", process.id)).dim());

        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL_CONDENSED);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("Task").fg(Color::White),
            Cell::new("Type").fg(Color::White),
            Cell::new("Lane").fg(Color::White),
        ]);
        for task in &process.tasks {
            table.add_row(vec![
                Cell::new(&task.id).fg(Color::Cyan),
                Cell::new(task.kind.as_str()),
                Cell::new(task.lane.as_deref().unwrap_or("-")),
            ]);
        }
        println!("{table}");
    }
    println!();
    Ok(())
}

fn install(state: &AppState, path: PathBuf, json: bool) -> Result<()> {
    let mut store = FsModelStore::load(&state.models_dir)?;
    let installed = store.install(&path)?;

    if json {
        println!(
            "{}",
            serde_json::json!({"installed": true, "path": installed.display().to_string()})
        );
    } else {
        println!(
            "  {} Installed {}",
            style("✓").green().bold(),
            style(installed.display()).cyan()
        );
    }
    Ok(())
}
