//! Command-line interface

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use nexusstore::Database;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::checkpoint::CheckpointManager;
use crate::config::Config;
use crate::coordinator::{CoordinatorConfig, NexusCoordinator};
use crate::domain::{Project, ProjectMode};
use crate::events::create_event_bus;
use crate::interview::{InterviewEngine, SessionManager, StartOpts};
use crate::llm::{TokenMeter, create_client};
use crate::merge::MergerRunner;
use crate::planning::generate_repo_map;
use crate::review::HumanReviewService;
use crate::state::StateManager;
use crate::worktree::{WorktreeConfig, WorktreeManager};

/// Nexus - autonomous software construction engine
#[derive(Parser)]
#[command(name = "nx", version, about)]
pub struct Cli {
    /// Path to a config file (default: .nexus.yml, then user config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a project in the current (or given) directory
    Init {
        /// Project name
        #[arg(long)]
        name: String,
        /// genesis (from scratch) or evolution (existing codebase)
        #[arg(long, default_value = "genesis")]
        mode: String,
        /// Project root directory
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },

    /// Interview: gather requirements conversationally
    Interview {
        /// Project id
        #[arg(long)]
        project: String,
    },

    /// Decompose, plan and execute a project
    Run {
        /// Project id
        #[arg(long)]
        project: String,
        /// Project root directory
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },

    /// Show project progress and pending reviews
    Status {
        /// Project id
        #[arg(long)]
        project: String,
    },

    /// Create a manual checkpoint
    Checkpoint {
        /// Project id
        #[arg(long)]
        project: String,
        /// Reason recorded with the checkpoint
        #[arg(long, default_value = "manual")]
        reason: String,
    },
}

/// Run the CLI
pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_ref())?;
    let db = Arc::new(Database::open(config.storage.resolved_db_path()).context("Failed to open database")?);

    match cli.command {
        Command::Init { name, mode, path } => {
            let mode: ProjectMode = mode.parse().map_err(|e: String| eyre::eyre!(e))?;
            let root = path.canonicalize().unwrap_or(path);
            let project = Project::new(&name, mode, root.display().to_string());

            let services = build_services(&config, db, &root).await?;
            services.coordinator.initialize(&project).await?;
            println!("Initialized project {} ({})", project.id, project.name);
        }

        Command::Interview { project } => {
            let row = db
                .get_project(&project)?
                .ok_or_else(|| eyre::eyre!("Unknown project: {project}"))?;
            let root = PathBuf::from(&row.root_path);
            let mode: ProjectMode = row.mode.parse().unwrap_or_default();

            let bus = create_event_bus();
            let meter = TokenMeter::new();
            let llm = create_client(&config.llm, meter)?;
            let engine = Arc::new(InterviewEngine::new(
                llm,
                db,
                bus.scope("interview"),
                config.interview.clone(),
            ));
            let _autosave = SessionManager::start(
                engine.clone(),
                std::time::Duration::from_secs(config.interview.autosave_secs),
            );

            let evolution_context = matches!(mode, ProjectMode::Evolution)
                .then(|| generate_repo_map(&root, 8_000));
            let session = engine
                .start_session(&project, StartOpts { mode, evolution_context })
                .await?;
            println!("Interview started ({}). Type your answers; /done to finish.", session.id);

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if line == "/done" {
                    break;
                }
                let turn = engine.process_message(&session.id, &line).await?;
                println!("\n{}\n", turn.response);
                for req in &turn.extracted_requirements {
                    println!("  [captured] ({}) {}", req.category, req.text);
                }
                if !turn.suggested_gaps.is_empty() {
                    println!("  [unexplored] {}", turn.suggested_gaps.join(", "));
                }
            }

            let summary = engine.end_session(&session.id).await?;
            println!(
                "Interview complete: {} requirements across {:?}",
                summary.total_requirements, summary.categories
            );
        }

        Command::Run { project, path } => {
            let root = path.canonicalize().unwrap_or(path);
            let services = build_services(&config, db, &root).await?;
            info!(%project, root = %root.display(), "Starting run");
            services.coordinator.start(&project).await?;

            let progress = services.coordinator.get_progress().await;
            println!(
                "Run finished: {}/{} tasks completed, {} failed, {} waves",
                progress.completed_tasks, progress.total_tasks, progress.failed_tasks, progress.total_waves
            );
            let cost = services.meter.total_cost_usd();
            println!("Token spend: ~${cost:.2}");
        }

        Command::Status { project } => {
            let row = db
                .get_project(&project)?
                .ok_or_else(|| eyre::eyre!("Unknown project: {project}"))?;
            let created = chrono::DateTime::from_timestamp_millis(row.created_at)
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| row.created_at.to_string());
            println!("{} ({}) - {} - created {}", row.name, row.mode, row.status, created);

            let tasks = db.list_tasks(&project)?;
            for task in &tasks {
                println!("  [{}] wave {} {}", task.status, task.wave_id, task.name);
            }

            let pending = db.list_reviews_by_status("pending")?;
            let mine: Vec<_> = pending.iter().filter(|r| r.project_id == project).collect();
            if !mine.is_empty() {
                println!("Pending reviews:");
                for review in mine {
                    println!("  {} task={} reason={}", review.id, review.task_id, review.reason);
                }
            }
        }

        Command::Checkpoint { project, reason } => {
            let row = db
                .get_project(&project)?
                .ok_or_else(|| eyre::eyre!("Unknown project: {project}"))?;
            let root = PathBuf::from(&row.root_path);
            let services = build_services(&config, db, &root).await?;
            // Checkpoints snapshot in-memory state; load it first
            services
                .state_mgr
                .load_state(&project)
                .await
                .context("No persisted state for project")?;
            let meta = services.checkpoints.create_checkpoint(&project, &reason).await?;
            println!("Checkpoint {} created", meta.id);
        }
    }

    Ok(())
}

struct Services {
    coordinator: NexusCoordinator,
    state_mgr: Arc<StateManager>,
    checkpoints: Arc<CheckpointManager>,
    meter: TokenMeter,
}

/// Wire the full service graph for a project root
async fn build_services(config: &Config, db: Arc<Database>, root: &std::path::Path) -> Result<Services> {
    let bus = create_event_bus();
    let meter = TokenMeter::new();
    let llm = create_client(&config.llm, meter.clone())?;
    let state_mgr = Arc::new(StateManager::new(db.clone(), true));

    let coordinator = NexusCoordinator::new(
        CoordinatorConfig::for_project(root),
        config.qa.clone(),
        &config.pool,
        llm,
        bus.clone(),
        db.clone(),
        state_mgr.clone(),
    );

    let checkpoints = Arc::new(CheckpointManager::new(
        db.clone(),
        state_mgr.clone(),
        bus.scope("checkpoint"),
        Some(root.to_path_buf()),
        config.storage.max_checkpoints,
    ));
    let reviews = Arc::new(HumanReviewService::new(
        db.clone(),
        bus.scope("review"),
        Some(checkpoints.clone()),
    ));
    let mut worktree_config = WorktreeConfig::for_project(root);
    worktree_config.branch_prefix = config.worktree.branch_prefix.clone();
    worktree_config.max_age = std::time::Duration::from_secs(config.worktree.max_age_minutes * 60);
    let worktrees = Arc::new(WorktreeManager::new(worktree_config));
    let merger = Arc::new(MergerRunner::new(root));

    coordinator.set_worktree_manager(worktrees).await;
    coordinator.set_merger(merger).await;
    coordinator.set_review_service(reviews).await;
    coordinator.set_checkpoint_manager(checkpoints.clone()).await;

    Ok(Services {
        coordinator,
        state_mgr,
        checkpoints,
        meter,
    })
}
