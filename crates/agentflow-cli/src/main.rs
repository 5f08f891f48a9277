mod daemon;
mod flows;
mod tasks;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use agentflow_config::AgentFlowConfig;
use agentflow_scheduler::{HttpFlowEngine, SchedulerOptions, TaskScheduler};
use agentflow_storage::SchedulerStorage;
use agentflow_types::ScheduleInterval;

#[derive(Parser)]
#[command(name = "agentflow", about = "Scheduled agent workflow runner")]
struct Cli {
    /// Config file (defaults to ~/.agentflow/config.json5)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run {
        /// Seconds between due-task checks (overrides config)
        #[arg(long)]
        tick_secs: Option<u64>,
    },
    /// Manage scheduled tasks
    Tasks {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Show recent execution records
    History {
        /// Only show executions of this task
        #[arg(short, long)]
        task: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Manage stored workflows
    Flows {
        #[command(subcommand)]
        command: FlowCommands,
    },
    /// Print scheduler statistics
    Stats,
    /// Prune execution history of every task
    Cleanup {
        /// Records kept per task (overrides config)
        #[arg(long)]
        max: Option<usize>,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// List all tasks
    List,
    /// Schedule a workflow
    Add {
        /// Workflow id
        #[arg(short, long)]
        flow: String,

        /// One of: 30seconds, minute, minutes, hourly, daily, weekly
        #[arg(short, long)]
        interval: ScheduleInterval,

        /// Time of day (HH:MM) for daily and weekly schedules
        #[arg(long)]
        time: Option<String>,

        /// Period for the "minutes" interval (1-59)
        #[arg(long)]
        minutes: Option<u32>,

        /// Text input as NODE_NAME=VALUE
        #[arg(long = "input")]
        inputs: Vec<String>,

        /// File input as NODE_NAME=PATH
        #[arg(long = "file")]
        files: Vec<String>,
    },
    /// Stop future runs of a task
    Cancel { id: String },
    /// Re-enable a cancelled task
    Enable { id: String },
    /// Delete a task and its history
    Remove { id: String },
    /// Run a task now and wait for the result
    Run { id: String },
}

#[derive(Subcommand)]
enum FlowCommands {
    /// Import a workflow from a JSON file
    Import { file: PathBuf },
    /// List stored workflows
    List,
}

/// Shared state for one command invocation.
struct Context {
    config: AgentFlowConfig,
    storage: Arc<SchedulerStorage>,
}

impl Context {
    fn open(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => agentflow_config::load_config_from(&path)?,
            None => agentflow_config::load_config().unwrap_or_default(),
        };
        let db_path = config.database_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let storage = Arc::new(SchedulerStorage::open(&db_path)?);
        Ok(Self { config, storage })
    }

    fn scheduler(&self, options: SchedulerOptions) -> anyhow::Result<TaskScheduler> {
        let engine = Arc::new(HttpFlowEngine::from_settings(&self.config.engine)?);
        Ok(TaskScheduler::new(self.storage.clone(), engine, options))
    }

    fn options(&self) -> SchedulerOptions {
        SchedulerOptions::from(&self.config.scheduler)
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let ctx = Context::open(cli.config)?;
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Run { tick_secs } => {
            let mut options = ctx.options();
            if let Some(secs) = tick_secs {
                options.tick_interval = std::time::Duration::from_secs(secs.max(1));
            }
            let scheduler = ctx.scheduler(options)?;
            rt.block_on(daemon::run(scheduler))?;
        }
        Commands::Tasks { command } => {
            let scheduler = ctx.scheduler(ctx.options())?;
            rt.block_on(async {
                match command {
                    TaskCommands::List => tasks::list(&scheduler).await,
                    TaskCommands::Add {
                        flow,
                        interval,
                        time,
                        minutes,
                        inputs,
                        files,
                    } => {
                        let request = tasks::AddRequest {
                            flow_id: flow,
                            interval,
                            time,
                            minute_interval: minutes,
                            inputs,
                            files,
                        };
                        tasks::add(&scheduler, request).await
                    }
                    TaskCommands::Cancel { id } => tasks::cancel(&scheduler, &id).await,
                    TaskCommands::Enable { id } => tasks::enable(&scheduler, &id).await,
                    TaskCommands::Remove { id } => tasks::remove(&scheduler, &id).await,
                    TaskCommands::Run { id } => tasks::run_now(&scheduler, &id).await,
                }
            })?;
        }
        Commands::History { task, limit } => {
            rt.block_on(tasks::history(&ctx.storage, task.as_deref(), limit))?;
        }
        Commands::Flows { command } => {
            rt.block_on(async {
                match command {
                    FlowCommands::Import { file } => flows::import(&ctx.storage, &file).await,
                    FlowCommands::List => flows::list(&ctx.storage).await,
                }
            })?;
        }
        Commands::Stats => {
            let scheduler = ctx.scheduler(ctx.options())?;
            let stats = rt.block_on(scheduler.get_stats())?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Cleanup { max } => {
            let mut options = ctx.options();
            if let Some(max) = max {
                options.max_executions_per_task = max;
            }
            let scheduler = ctx.scheduler(options)?;
            let deleted = rt.block_on(scheduler.cleanup_old_executions())?;
            println!("Deleted {deleted} execution record(s)");
        }
    }

    Ok(())
}
