//! User and group CLI commands.

use anyhow::Result;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use tasklane_types::identity::{Group, GroupId, User, UserId};

use super::plural;
use crate::state::AppState;

#[derive(Subcommand)]
pub enum UserCommand {
    /// Add or update a user.
    Add {
        /// User id (login name).
        id: String,

        /// Display name (default: the id).
        #[arg(long)]
        name: Option<String>,

        /// Allow manual completion and skipping of tasks.
        #[arg(long)]
        admin: bool,
    },

    /// List users.
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand)]
pub enum GroupCommand {
    /// Create a group or replace its members.
    Set {
        /// Group id, as referenced by lane names.
        id: String,

        /// Members in order; repeat for each user.
        #[arg(long = "member", short = 'm')]
        members: Vec<String>,

        /// Display name (default: the id).
        #[arg(long)]
        name: Option<String>,
    },

    /// List groups with their members.
    #[command(alias = "ls")]
    List,
}

pub async fn run_user(state: &AppState, command: UserCommand, json: bool) -> Result<()> {
    let directory = state.service.directory();
    match command {
        UserCommand::Add { id, name, admin } => {
            let display_name = name.unwrap_or_else(|| id.clone());
            let user = User {
                id: UserId::new(id),
                display_name,
                is_admin: admin,
            };
            directory.upsert_user(&user).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&user)?);
            } else {
                println!(
                    "  {} User '{}' saved{}.",
                    style("✓").green().bold(),
                    style(&user.id).cyan(),
                    if user.is_admin { " as admin" } else { "" }
                );
            }
            Ok(())
        }
        UserCommand::List => {
            let users = directory.list_users().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&users)?);
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(presets::UTF8_FULL_CONDENSED);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec![
                Cell::new("ID").fg(Color::White),
                Cell::new("Name").fg(Color::White),
                Cell::new("Admin").fg(Color::White),
            ]);
            for user in &users {
                table.add_row(vec![
                    Cell::new(&user.id).fg(Color::Cyan),
                    Cell::new(&user.display_name),
                    if user.is_admin {
                        Cell::new("yes").fg(Color::Yellow)
                    } else {
                        Cell::new("")
                    },
                ]);
            }
            println!();
            println!("{table}");
            println!();
            println!("  {} user{}", style(users.len()).bold(), plural(users.len()));
            println!();
            Ok(())
        }
    }
}

pub async fn run_group(state: &AppState, command: GroupCommand, json: bool) -> Result<()> {
    let directory = state.service.directory();
    match command {
        GroupCommand::Set { id, members, name } => {
            let group = Group {
                name: name.unwrap_or_else(|| id.clone()),
                id: GroupId::new(id),
                members: members.into_iter().map(UserId::new).collect(),
            };
            directory.upsert_group(&group).await.map_err(|e| {
                anyhow::anyhow!("could not save group '{}': {e} (are all members added as users?)", group.id)
            })?;

            if json {
                println!("{}", serde_json::to_string_pretty(&group)?);
            } else {
                println!(
                    "  {} Group '{}' saved with {} member{}.",
                    style("✓").green().bold(),
                    style(&group.id).cyan(),
                    group.members.len(),
                    plural(group.members.len())
                );
            }
            Ok(())
        }
        GroupCommand::List => {
            let groups = directory.list_groups().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&groups)?);
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(presets::UTF8_FULL_CONDENSED);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec![
                Cell::new("ID").fg(Color::White),
                Cell::new("Name").fg(Color::White),
                Cell::new("Members").fg(Color::White),
            ]);
            for group in &groups {
                let members: Vec<&str> = group.members.iter().map(|u| u.as_str()).collect();
                table.add_row(vec![
                    Cell::new(&group.id).fg(Color::Cyan),
                    Cell::new(&group.name),
                    Cell::new(members.join(", ")),
                ]);
            }
            println!();
            println!("{table}");
            println!();
            println!("  {} group{}", style(groups.len()).bold(), plural(groups.len()));
            println!();
            Ok(())
        }
    }
}
