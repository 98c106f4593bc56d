//! Process instance CLI commands.
//!
//! Every command loads the instance, applies one service operation and
//! prints the outcome. Task arguments accept either a task id or a symbolic
//! task name; names resolve to the most recent occurrence.

use anyhow::{Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use tasklane_core::engine::persistence::LoadedInstance;
use tasklane_core::repository::SortOrder;
use tasklane_core::service::RunReport;
use tasklane_types::identity::UserId;
use tasklane_types::instance::{ProcessInstanceStatus, StrategyKind};
use tasklane_types::task::{Task, TaskState};

use super::{format_relative_time, plural};
use crate::state::{AppState, ConcreteInstanceService};

#[derive(Subcommand)]
pub enum InstanceCommand {
    /// Create an instance of a process model.
    Create {
        /// Model identifier.
        model: String,

        /// User who starts the instance.
        #[arg(long)]
        owner: String,

        /// Run the first steps right away.
        #[arg(long)]
        run: bool,

        /// Strategy for --run (default, greedy).
        #[arg(long)]
        strategy: Option<String>,
    },

    /// List instances, newest first.
    #[command(alias = "ls")]
    List {
        /// Maximum number of instances.
        #[arg(long, default_value = "20")]
        limit: i64,

        /// Oldest first.
        #[arg(long)]
        asc: bool,
    },

    /// Show an instance with its tasks and human tasks.
    Show {
        id: Uuid,

        /// Include predicted (likely/maybe) tasks.
        #[arg(long)]
        all: bool,
    },

    /// Advance an instance.
    Run {
        id: Uuid,

        /// Strategy (default, greedy). Falls back to the configured default.
        #[arg(long)]
        strategy: Option<String>,

        /// Run without saving; prints what would happen.
        #[arg(long)]
        dry_run: bool,
    },

    /// List tasks that are ready or waiting.
    Tasks { id: Uuid },

    /// Complete a human task with submitted data.
    Complete {
        id: Uuid,

        /// Task id or symbolic name.
        task: String,

        /// Acting user.
        #[arg(long)]
        user: String,

        /// JSON object with the submitted data.
        #[arg(long)]
        data: Option<String>,
    },

    /// Complete a ready or failed task by hand (admins only).
    Skip {
        id: Uuid,

        /// Task id or symbolic name.
        task: String,

        /// Acting admin.
        #[arg(long)]
        user: String,

        /// Run the task's work instead of skipping it.
        #[arg(long)]
        execute: bool,
    },

    /// Suspend a running or waiting instance.
    Suspend {
        id: Uuid,
        #[arg(long)]
        user: Option<String>,
    },

    /// Resume a suspended instance.
    Resume {
        id: Uuid,
        #[arg(long)]
        user: Option<String>,
    },

    /// Terminate an instance for good.
    Terminate {
        id: Uuid,
        #[arg(long)]
        user: Option<String>,
    },

    /// Rewind an instance to an earlier task.
    Reset {
        id: Uuid,

        /// Task id or symbolic name to rewind to.
        task: String,

        #[arg(long)]
        user: Option<String>,

        /// Skip confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Print the merged data of all completed tasks.
    Data { id: Uuid },

    /// Show the event log, including error details.
    Events { id: Uuid },
}

pub async fn run(state: &AppState, command: InstanceCommand, json: bool) -> Result<()> {
    let service = state.service.as_ref();
    match command {
        InstanceCommand::Create {
            model,
            owner,
            run,
            strategy,
        } => {
            let strategy = parse_strategy(strategy.as_deref())?;
            create(service, &model, &UserId::new(owner), run, strategy, json).await
        }
        InstanceCommand::List { limit, asc } => {
            let order = if asc { SortOrder::Asc } else { SortOrder::Desc };
            list(service, limit, order, json).await
        }
        InstanceCommand::Show { id, all } => show(service, id, all, json).await,
        InstanceCommand::Run {
            id,
            strategy,
            dry_run,
        } => {
            let strategy = parse_strategy(strategy.as_deref())?;
            let mut loaded = service.load(id).await?;
            let report = service.run_steps(&mut loaded, strategy, !dry_run).await?;
            print_report(&loaded, &report, json)
        }
        InstanceCommand::Tasks { id } => tasks(service, id, json).await,
        InstanceCommand::Complete {
            id,
            task,
            user,
            data,
        } => {
            let data = parse_data(data.as_deref())?;
            let mut loaded = service.load(id).await?;
            let task_id = resolve_task(service, &loaded, &task)?;
            let report = service
                .complete_human_task(&mut loaded, task_id, data, &UserId::new(user))
                .await?;
            print_report(&loaded, &report, json)
        }
        InstanceCommand::Skip {
            id,
            task,
            user,
            execute,
        } => {
            let mut loaded = service.load(id).await?;
            let task_id = resolve_task(service, &loaded, &task)?;
            let report = service
                .manual_complete_task(&mut loaded, task_id, execute, &UserId::new(user))
                .await?;
            print_report(&loaded, &report, json)
        }
        InstanceCommand::Suspend { id, user } => {
            let mut loaded = service.load(id).await?;
            let user = user.map(UserId::new);
            service.suspend(&mut loaded, user.as_ref()).await?;
            print_status(&loaded, "suspended", json)
        }
        InstanceCommand::Resume { id, user } => {
            let mut loaded = service.load(id).await?;
            let user = user.map(UserId::new);
            service.resume(&mut loaded, user.as_ref()).await?;
            print_status(&loaded, "resumed", json)
        }
        InstanceCommand::Terminate { id, user } => {
            let mut loaded = service.load(id).await?;
            let user = user.map(UserId::new);
            service.terminate(&mut loaded, user.as_ref()).await?;
            print_status(&loaded, "terminated", json)
        }
        InstanceCommand::Reset {
            id,
            task,
            user,
            force,
        } => reset(service, id, &task, user.map(UserId::new), force, json).await,
        InstanceCommand::Data { id } => {
            let loaded = service.load(id).await?;
            let data = service.get_merged_data(&loaded);
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }
        InstanceCommand::Events { id } => events(service, id, json).await,
    }
}

async fn create(
    service: &ConcreteInstanceService,
    model: &str,
    owner: &UserId,
    run: bool,
    strategy: Option<StrategyKind>,
    json: bool,
) -> Result<()> {
    let mut loaded = service.create_instance(model, owner).await?;
    let report = if run {
        Some(service.run_steps(&mut loaded, strategy, true).await?)
    } else {
        None
    };

    if json {
        let mut out = json!({ "instance": loaded.instance });
        if let Some(report) = &report {
            out["run"] = report_json(report);
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Created instance of {} {}",
        style("✓").green().bold(),
        style(&loaded.model.name).cyan(),
        style(format!("v{}", loaded.model.version)).dim()
    );
    println!();
    println!("  {} {}", style("ID:").bold(), loaded.id());
    println!("  {} {}", style("Owner:").bold(), owner);
    println!("  {} {}", style("Status:").bold(), status_label(loaded.instance.status));
    if let Some(report) = &report {
        println!();
        print_report_lines(&loaded, report);
    } else {
        println!();
        println!(
            "  Start it with: {}",
            style(format!("tlane instance run {}", loaded.id())).yellow()
        );
    }
    println!();
    Ok(())
}

async fn list(
    service: &ConcreteInstanceService,
    limit: i64,
    order: SortOrder,
    json: bool,
) -> Result<()> {
    let instances = service.list_instances(Some(limit), order).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    if instances.is_empty() {
        println!();
        println!(
            "  {} No instances yet. Create one with: {}",
            style("i").blue().bold(),
            style("tlane instance create <model> --owner <user>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Model").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Owner").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
    ]);

    for instance in &instances {
        table.add_row(vec![
            Cell::new(instance.id).fg(Color::DarkGrey),
            Cell::new(format!("{} v{}", instance.model_id, instance.model_version)).fg(Color::Cyan),
            status_cell(instance.status),
            Cell::new(&instance.owner),
            Cell::new(format_relative_time(&instance.updated_at)).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} instance{}",
        style(instances.len()).bold(),
        plural(instances.len())
    );
    println!();
    Ok(())
}

async fn show(service: &ConcreteInstanceService, id: Uuid, all: bool, json: bool) -> Result<()> {
    let loaded = service.load(id).await?;
    let tasks: Vec<&Task> = loaded
        .graph
        .tasks_by_sequence()
        .into_iter()
        .filter(|t| all || !t.state.is_predicted())
        .collect();
    let human_tasks = service.human_tasks(&loaded);

    if json {
        let out = json!({
            "instance": loaded.instance,
            "tasks": tasks,
            "human_tasks": human_tasks,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let instance = &loaded.instance;
    println!();
    println!(
        "  {} {}",
        style(&loaded.model.name).cyan().bold(),
        style(format!("v{}", instance.model_version)).dim()
    );
    println!();
    println!("  {}", style("── Details ──").dim());
    println!("  {} {}", style("ID:").bold(), instance.id);
    println!("  {} {}", style("Status:").bold(), status_label(instance.status));
    println!("  {} {}", style("Owner:").bold(), instance.owner);
    println!(
        "  {} {}",
        style("Created:").bold(),
        instance.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(ended) = instance.ended_at {
        println!(
            "  {} {}",
            style("Ended:").bold(),
            ended.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    println!();
    println!("  {}", style("── Tasks ──").dim());
    println!("{}", task_table(&loaded, &tasks));

    if !human_tasks.is_empty() {
        println!();
        println!("  {}", style("── Human Tasks ──").dim());
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL_CONDENSED);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("Task").fg(Color::White),
            Cell::new("Lane").fg(Color::White),
            Cell::new("Potential Owners").fg(Color::White),
            Cell::new("Completed By").fg(Color::White),
        ]);
        for human in human_tasks {
            let owners: Vec<&str> = human.potential_owners.iter().map(|u| u.as_str()).collect();
            let completed_by = match (&human.completed_by, human.completed) {
                (Some(user), _) => Cell::new(user).fg(Color::Green),
                (None, true) => Cell::new("(cancelled)").fg(Color::DarkGrey),
                (None, false) => Cell::new("pending").fg(Color::Yellow),
            };
            table.add_row(vec![
                Cell::new(&human.task_name).fg(Color::Cyan),
                Cell::new(
                    human
                        .lane_assignment
                        .as_ref()
                        .map(|g| g.as_str())
                        .unwrap_or("-"),
                ),
                Cell::new(owners.join(", ")),
                completed_by,
            ]);
        }
        println!("{table}");
    }
    println!();
    Ok(())
}

async fn tasks(service: &ConcreteInstanceService, id: Uuid, json: bool) -> Result<()> {
    let loaded = service.load(id).await?;
    let tasks = service.list_ready_or_waiting_tasks(&loaded);

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!();
        println!(
            "  {} Nothing is ready or waiting ({}).",
            style("i").blue().bold(),
            status_label(loaded.instance.status)
        );
        println!();
        return Ok(());
    }

    println!();
    println!("{}", task_table(&loaded, &tasks));
    println!();
    Ok(())
}

async fn reset(
    service: &ConcreteInstanceService,
    id: Uuid,
    task: &str,
    user: Option<UserId>,
    force: bool,
    json: bool,
) -> Result<()> {
    let mut loaded = service.load(id).await?;
    let target = resolve_task(service, &loaded, task)?;

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Rewind instance to '{}'? Everything after it is discarded.",
                style(task).red().bold()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let plan = service.reset(&mut loaded, target, user.as_ref()).await?;

    if json {
        println!(
            "{}",
            json!({
                "instance_id": loaded.id(),
                "target_task_id": plan.target_task_id,
                "tasks_removed": plan.tasks_removed,
                "processes_removed": plan.processes_removed,
                "tasks_reopened": plan.tasks_reopened,
                "human_tasks_removed": plan.human_tasks_removed,
                "status": loaded.instance.status,
            })
        );
    } else {
        println!(
            "  {} Rewound to '{}': {} task{} removed, {} reopened, {} human task{} dropped.",
            style("✓").green().bold(),
            task,
            plan.tasks_removed,
            plural(plan.tasks_removed),
            plan.tasks_reopened,
            plan.human_tasks_removed,
            plural(plan.human_tasks_removed)
        );
    }
    Ok(())
}

async fn events(service: &ConcreteInstanceService, id: Uuid, json: bool) -> Result<()> {
    let loaded = service.load(id).await?;
    let events = service.list_events(id).await?;
    let details = service.list_error_details(id).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "events": events, "error_details": details }))?
        );
        return Ok(());
    }

    if events.is_empty() {
        println!();
        println!("  {} No events recorded.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("When").fg(Color::White),
        Cell::new("Event").fg(Color::White),
        Cell::new("Task").fg(Color::White),
        Cell::new("User").fg(Color::White),
    ]);
    for event in &events {
        let task = event
            .task_id
            .and_then(|task_id| loaded.graph.task(task_id))
            .map(|t| t.definition_id.as_str())
            .unwrap_or("-");
        let kind = event.event_type.to_string();
        let kind_cell = if details.iter().any(|d| d.event_id == event.id) {
            Cell::new(kind).fg(Color::Red)
        } else {
            Cell::new(kind)
        };
        table.add_row(vec![
            Cell::new(event.timestamp.format("%Y-%m-%d %H:%M:%S")).fg(Color::DarkGrey),
            kind_cell,
            Cell::new(task).fg(Color::Cyan),
            Cell::new(event.user.as_ref().map(|u| u.as_str()).unwrap_or("-")),
        ]);
    }

    println!();
    println!("{table}");
    for detail in &details {
        println!();
        println!("  {} {}", style("✗").red().bold(), style(&detail.message).red());
        if let (Some(line), Some(contents)) = (detail.line_number, &detail.line_contents) {
            println!("    {} {}", style(format!("{line:>4} |")).dim(), contents);
            if let Some(offset) = detail.offset {
                let pad = " ".repeat(offset.saturating_sub(1) as usize);
                println!("    {} {pad}{}", style("     |").dim(), style("^").red());
            }
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_strategy(strategy: Option<&str>) -> Result<Option<StrategyKind>> {
    strategy
        .map(|s| s.parse::<StrategyKind>().map_err(|e| anyhow::anyhow!(e)))
        .transpose()
}

/// Parse `--data` into an object. Absent means empty.
fn parse_data(data: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = data else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => bail!("--data must be a JSON object, got {other}"),
    }
}

/// Resolve a task id or symbolic name against the instance.
fn resolve_task(
    service: &ConcreteInstanceService,
    loaded: &LoadedInstance,
    reference: &str,
) -> Result<Uuid> {
    let task = match reference.parse::<Uuid>() {
        Ok(id) => service.get_task_by_id(loaded, id),
        Err(_) => service.get_task_by_symbolic_name(loaded, reference),
    };
    match task {
        Some(task) => Ok(task.id),
        None => bail!("no task '{reference}' in instance {}", loaded.id()),
    }
}

fn task_table(loaded: &LoadedInstance, tasks: &[&Task]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("#").fg(Color::White),
        Cell::new("Task").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("Process").fg(Color::White),
        Cell::new("State").fg(Color::White),
        Cell::new("ID").fg(Color::White),
    ]);

    for task in tasks {
        let (process, kind) = match loaded.graph.definition_of(&loaded.model, task.id) {
            Some((process, definition)) => (process.id.as_str(), definition.kind.as_str()),
            None => ("?", "?"),
        };
        table.add_row(vec![
            Cell::new(task.sequence).fg(Color::DarkGrey),
            Cell::new(&task.definition_id).fg(Color::Cyan),
            Cell::new(kind),
            Cell::new(process),
            state_cell(task.state),
            Cell::new(task.id).fg(Color::DarkGrey),
        ]);
    }
    table
}

fn print_report(loaded: &LoadedInstance, report: &RunReport, json: bool) -> Result<()> {
    if json {
        let mut out = report_json(report);
        out["instance_id"] = json!(loaded.id());
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        print_report_lines(loaded, report);
        println!();
    }
    Ok(())
}

fn print_report_lines(loaded: &LoadedInstance, report: &RunReport) {
    println!(
        "  {} Ran {} task{}, instance is {}",
        style("✓").green().bold(),
        style(report.executed.len()).bold(),
        plural(report.executed.len()),
        status_label(report.status)
    );
    if !report.executed.is_empty() {
        println!("    {}", style(report.executed.join(" → ")).dim());
    }
    if report.rows_saved == 0 && loaded.has_changes() {
        println!("  {} Not saved.", style("!").yellow().bold());
    }

    let waiting: Vec<_> = loaded
        .human_tasks
        .iter()
        .filter(|h| !h.completed)
        .collect();
    for human in waiting {
        let owners: Vec<&str> = human.potential_owners.iter().map(|u| u.as_str()).collect();
        println!(
            "  {} {} awaits {}",
            style("•").dim(),
            style(&human.task_name).cyan(),
            owners.join(", ")
        );
    }
}

fn print_status(loaded: &LoadedInstance, verb: &str, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            json!({ "instance_id": loaded.id(), "status": loaded.instance.status })
        );
    } else {
        println!(
            "  {} Instance {} {} ({}).",
            style("✓").green().bold(),
            style(loaded.id()).dim(),
            verb,
            status_label(loaded.instance.status)
        );
    }
    Ok(())
}

fn report_json(report: &RunReport) -> Value {
    json!({
        "status": report.status,
        "executed": report.executed,
        "human_tasks_created": report.human_tasks_created,
        "rows_saved": report.rows_saved,
    })
}

fn status_label(status: ProcessInstanceStatus) -> String {
    let label = status.as_str();
    match status {
        ProcessInstanceStatus::Complete => format!("{}", style(label).green()),
        ProcessInstanceStatus::Running | ProcessInstanceStatus::Waiting => {
            format!("{}", style(label).cyan())
        }
        ProcessInstanceStatus::Suspended => format!("{}", style(label).yellow()),
        ProcessInstanceStatus::Error => format!("{}", style(label).red().bold()),
        ProcessInstanceStatus::NotStarted | ProcessInstanceStatus::Terminated => {
            format!("{}", style(label).dim())
        }
    }
}

fn status_cell(status: ProcessInstanceStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        ProcessInstanceStatus::Complete => cell.fg(Color::Green),
        ProcessInstanceStatus::Running | ProcessInstanceStatus::Waiting => cell.fg(Color::Cyan),
        ProcessInstanceStatus::Suspended => cell.fg(Color::Yellow),
        ProcessInstanceStatus::Error => cell.fg(Color::Red),
        ProcessInstanceStatus::NotStarted | ProcessInstanceStatus::Terminated => {
            cell.fg(Color::DarkGrey)
        }
    }
}

fn state_cell(state: TaskState) -> Cell {
    let cell = Cell::new(state.as_str());
    match state {
        TaskState::Completed => cell.fg(Color::Green),
        TaskState::Ready => cell.fg(Color::Cyan),
        TaskState::Waiting | TaskState::Started => cell.fg(Color::Yellow),
        TaskState::Error => cell.fg(Color::Red),
        TaskState::Future | TaskState::Likely | TaskState::Maybe | TaskState::Cancelled => {
            cell.fg(Color::DarkGrey)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_data_accepts_objects_only() {
        let data = parse_data(Some(r#"{"amount": 120, "approved": true}"#)).unwrap();
        assert_eq!(data.get("amount"), Some(&json!(120)));
        assert!(parse_data(None).unwrap().is_empty());
        assert!(parse_data(Some("[1, 2]")).is_err());
        assert!(parse_data(Some("{not json")).is_err());
    }

    #[test]
    fn parse_strategy_names() {
        assert_eq!(parse_strategy(None).unwrap(), None);
        assert_eq!(
            parse_strategy(Some("greedy")).unwrap(),
            Some(StrategyKind::Greedy)
        );
        assert!(parse_strategy(Some("eager")).is_err());
    }
}
