//! CLI command definitions for the `tlane` binary.
//!
//! Uses clap derive macros. Commands are grouped by noun
//! (e.g., `tlane instance create`, `tlane model list`).

pub mod directory;
pub mod instance;
pub mod model;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run and inspect BPMN process instances.
#[derive(Parser)]
#[command(name = "tlane", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logs (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "TASKLANE_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process instances (create, run, complete, reset, ...).
    #[command(alias = "i")]
    Instance {
        #[command(subcommand)]
        action: instance::InstanceCommand,
    },

    /// Process models (list, show, install).
    Model {
        #[command(subcommand)]
        action: model::ModelCommand,
    },

    /// Users allowed to own and complete human tasks.
    User {
        #[command(subcommand)]
        action: directory::UserCommand,
    },

    /// Groups that lanes are bound to.
    Group {
        #[command(subcommand)]
        action: directory::GroupCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Render a timestamp relative to now ("3m ago"), falling back to a date.
pub(crate) fn format_relative_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    let diff = chrono::Utc::now() - *dt;

    if diff.num_minutes() < 1 {
        "just now".to_string()
    } else if diff.num_hours() < 1 {
        format!("{}m ago", diff.num_minutes())
    } else if diff.num_days() < 1 {
        format!("{}h ago", diff.num_hours())
    } else if diff.num_days() < 30 {
        format!("{}d ago", diff.num_days())
    } else {
        dt.format("%Y-%m-%d").to_string()
    }
}

pub(crate) fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["tlane", "instance", "list", "--json", "-vv"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Instance {
                action: instance::InstanceCommand::List { .. }
            }
        ));
    }

    #[test]
    fn model_show_takes_a_model_version() {
        let cli =
            Cli::try_parse_from(["tlane", "model", "show", "approval", "--model-version", "1.0.0"])
                .unwrap();
        match cli.command {
            Commands::Model {
                action: model::ModelCommand::Show { id, version },
            } => {
                assert_eq!(id, "approval");
                assert_eq!(version, Some(semver::Version::new(1, 0, 0)));
            }
            _ => panic!("expected model show"),
        }

        assert!(Cli::try_parse_from(["tlane", "model", "show", "approval", "--model-version", "one"]).is_err());
    }

    #[test]
    fn relative_time_buckets() {
        let now = chrono::Utc::now();
        assert_eq!(format_relative_time(&now), "just now");
        assert_eq!(
            format_relative_time(&(now - chrono::Duration::minutes(5))),
            "5m ago"
        );
        assert_eq!(
            format_relative_time(&(now - chrono::Duration::hours(3))),
            "3h ago"
        );
    }
}
