use anyhow::{Context, Result};
use console::style;
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::AssistantError;
use crate::auth::verify_user;
use crate::chat::{ChatClient, ChatModel};
use crate::config::Config;
use crate::indexer::VectorStoreManager;
use crate::session::{Role, Session, Turn};

/// What the user asked for at the chat prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Quit,
    Logout,
    History,
    Empty,
    Question(String),
}

impl ChatInput {
    #[inline]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.to_lowercase().as_str() {
            "" => Self::Empty,
            "/quit" | "/exit" => Self::Quit,
            "/logout" => Self::Logout,
            "/history" => Self::History,
            _ => Self::Question(line.to_string()),
        }
    }
}

/// Language model built from the `[llm]` configuration
#[inline]
pub fn chat_model_from_config(config: &Config) -> crate::Result<Arc<dyn ChatModel>> {
    let client = ChatClient::from_config(&config.llm)
        .map_err(|e| AssistantError::Config(e.to_string()))?;
    Ok(Arc::new(client))
}

/// Interactive login form followed by a chat loop, until `/quit`
#[inline]
pub async fn run_chat(config: &Config, manager: Arc<VectorStoreManager>) -> Result<()> {
    let mut session = Session::new(config.roster_path(), config.retrieval.top_k);

    'login: loop {
        eprintln!();
        eprintln!("{}", style("🔐 Departmental Knowledge Assistant").bold().cyan());

        let name: String = Input::new()
            .with_prompt("Full Name")
            .allow_empty(true)
            .interact_text()?;
        let department: String = Input::new()
            .with_prompt("Department (HR, Finance, Marketing)")
            .allow_empty(true)
            .interact_text()?;

        match session.authenticate(&name, &department) {
            Ok(()) => {}
            Err(e @ (AssistantError::InvalidInput(_) | AssistantError::AccessDenied(_))) => {
                eprintln!("{}", style(format!("❌ {}", e)).red());
                continue 'login;
            }
            Err(e) => {
                eprintln!("{}", style(format!("❌ {}", e)).red());
                return Err(e.into());
            }
        }

        let department = session.department().unwrap_or_default().to_string();

        let spinner = spinner("🔍 Loading department knowledge base...");
        let opened = session
            .open_chat(&manager, || chat_model_from_config(config))
            .await;
        spinner.finish_and_clear();

        if let Err(e) = opened {
            eprintln!("{}", style(format!("❌ {}", e)).red());
            return Ok(());
        }

        eprintln!();
        eprintln!(
            "{}",
            style(format!("💬 {} Department Assistant", department))
                .bold()
                .cyan()
        );
        eprintln!(
            "{}",
            style("Type /history to review, /logout to switch user, /quit to exit.").dim()
        );

        loop {
            let line: String = Input::new()
                .with_prompt(format!("Ask about {} department", department))
                .allow_empty(true)
                .interact_text()?;

            match ChatInput::parse(&line) {
                ChatInput::Empty => {}
                ChatInput::Quit => return Ok(()),
                ChatInput::Logout => {
                    session.logout();
                    eprintln!("{}", style("Logged out.").yellow());
                    continue 'login;
                }
                ChatInput::History => print_transcript(session.transcript()),
                ChatInput::Question(question) => {
                    let spinner = self::spinner("💭 Thinking...");
                    let result = session.ask(&question).await;
                    spinner.finish_and_clear();

                    match result {
                        Ok(answer) => {
                            println!("{}", answer.answer);
                            println!();
                        }
                        Err(e) => eprintln!("{}", style(format!("❌ {}", e)).red()),
                    }
                }
            }
        }
    }
}

/// Print the departments that have documents
#[inline]
pub fn list_departments(manager: &VectorStoreManager) -> Result<()> {
    let departments = manager
        .list_available_departments()
        .context("Failed to list departments")?;

    if departments.is_empty() {
        println!(
            "No departments with documents found under {}",
            manager.data_root().display()
        );
        return Ok(());
    }

    println!("Departments ({} total):", departments.len());
    for department in &departments {
        let files = manager.list_department_files(department)?;
        println!("  📁 {} ({} files)", department, files.len());
    }

    Ok(())
}

/// Check a name and department against the roster; returns whether access is granted
#[inline]
pub fn verify(config: &Config, name: &str, department: &str) -> bool {
    let roster = config.roster_path();
    let allowed = verify_user(&roster, name, department);

    if allowed {
        println!(
            "{}",
            style(format!(
                "✓ {} is registered in {}",
                name.trim(),
                department.trim()
            ))
            .green()
        );
    } else {
        println!(
            "{}",
            style("❌ Access denied. You are not registered in that department.").red()
        );
    }

    allowed
}

/// Build a department's index and report how long it took.
///
/// With `prune`, builds older than the newest are dropped afterwards; chats in
/// other processes still searching one of them lose their index.
#[inline]
pub async fn ingest(
    manager: &VectorStoreManager,
    department: &str,
    rebuild: bool,
    prune: bool,
) -> Result<()> {
    if !rebuild {
        if let Some(existing) = manager.store().open_index(department).await? {
            println!(
                "{} is already indexed: {} chunks ({} dimensions), built {}",
                existing.department(),
                existing.chunk_count(),
                existing.dimension(),
                existing.built_at().format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("Use --rebuild to index it again.");
            if prune {
                prune_builds(manager, department).await?;
            }
            return Ok(());
        }
    }

    manager.evict(department).await;

    let started = Instant::now();
    let spinner = spinner(&format!("Indexing {}...", department.trim()));
    let index = manager.get_department_index(department).await;
    spinner.finish_and_clear();

    let index = index?.ok_or_else(|| AssistantError::NoContent(department.trim().to_string()))?;

    info!("Ingested department '{}'", index.department());
    println!(
        "Indexed {}: {} chunks ({} dimensions) in {:.2?}",
        index.department(),
        index.chunk_count(),
        index.dimension(),
        started.elapsed()
    );

    if prune {
        prune_builds(manager, department).await?;
    }

    Ok(())
}

async fn prune_builds(manager: &VectorStoreManager, department: &str) -> Result<()> {
    let pruned = manager
        .store()
        .prune_index(department.trim())
        .await
        .context("Failed to prune earlier builds")?;
    println!("Removed {} earlier build(s) of {}", pruned, department.trim());
    Ok(())
}

fn print_transcript(transcript: &[Turn]) {
    if transcript.is_empty() {
        eprintln!("{}", style("No messages yet.").dim());
        return;
    }

    for turn in transcript {
        let label = match turn.role {
            Role::User => style("You").bold().green(),
            Role::Assistant => style("Assistant").bold().blue(),
        };
        println!("{} {} {}", style(turn.at.format("%H:%M")).dim(), label, turn.text);
    }
    println!();
}

fn spinner(message: &str) -> ProgressBar {
    let bar = if console::user_attended_stderr() {
        ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        )
    } else {
        ProgressBar::hidden()
    };
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}
