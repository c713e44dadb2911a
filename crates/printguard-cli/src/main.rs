//! Command-line interface for the PrintGuard printer fleet.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use printguard_commands::CommandQueue;
use printguard_core::config::env_vars;
use printguard_core::{
    CommandId, CommandStatus, EventBus, FailureAction, PrintGuardConfig, SharedClock, SystemClock,
};
use printguard_devices::{FailureResponder, Fields, PrinterService, StatusCache};
use printguard_storage::{DeviceStore, StoreOptions};

/// PrintGuard - manage printers, alerts and the agent command queue.
#[derive(Parser, Debug)]
#[command(name = "printguard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (defaults to printguard.toml when present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides the configured storage path.
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Register a printer and print its record, auth token included.
    Register {
        /// Display name.
        name: String,
        /// Owning user id.
        #[arg(long)]
        owner: String,
    },
    /// List printers, optionally for a single owner.
    List {
        #[arg(long)]
        owner: Option<String>,
    },
    /// Show one printer.
    Show { device: String },
    /// Rename a printer.
    Rename { device: String, name: String },
    /// Change a printer's failure policy.
    SetPolicy {
        device: String,
        /// none, pause or cancel.
        #[arg(long)]
        action: Option<FailureAction>,
        /// Power off tool heaters when pausing on failure.
        #[arg(long)]
        tools_off: Option<bool>,
        /// Power off the bed heater when pausing on failure.
        #[arg(long)]
        bed_off: Option<bool>,
    },
    /// Delete a printer with its commands and history.
    Delete { device: String },
    /// Delete every printer of an owner.
    DeleteOwner { owner: String },
    /// Start tracking a print.
    StartPrint { device: String, filename: String },
    /// Stop tracking the current print.
    StopPrint { device: String },
    /// Raise a failure alert on the current print.
    Alert { device: String },
    /// Acknowledge the current alert.
    Ack {
        device: String,
        /// Acknowledge without clearing the alert.
        #[arg(long)]
        mute: bool,
    },
    /// Clear the current alert.
    ClearAlert { device: String },
    /// Pause the current print.
    Pause { device: String },
    /// Pause and switch heaters off per the failure policy.
    PauseOnFailure { device: String },
    /// Restore temperatures and resume the current print.
    Resume {
        device: String,
        /// Acknowledge without clearing the alert.
        #[arg(long)]
        mute: bool,
    },
    /// Cancel the current print.
    Cancel { device: String },
    /// Respond to a detected failure according to the printer's policy.
    Fail { device: String },
    /// List a printer's commands.
    Commands {
        device: String,
        /// Only commands in this status (pending, sent or aborted).
        #[arg(long)]
        status: Option<CommandStatus>,
    },
    /// Show command counts per status.
    Stats { device: String },
    /// Show the commands the agent would receive, by agent token.
    Poll { token: String },
    /// Mark a command as delivered to the agent.
    MarkSent { device: String, command: CommandId },
    /// Hand all pending commands to the agent and mark them sent.
    Dispatch { device: String },
    /// Show cached live status, with `seconds_left` coerced to an integer.
    Status {
        device: String,
        /// Write this JSON object into the cache before reading.
        #[arg(long)]
        set: Option<String>,
    },
    /// Show cached picture metadata, with progress `p` coerced to a float.
    Picture {
        device: String,
        /// Write this JSON object into the cache before reading.
        #[arg(long)]
        set: Option<String>,
    },
    /// Show the recorded state history of a printer.
    History { device: String },
    /// Print the effective configuration.
    Config,
}

/// Wired-up services for one invocation.
struct App {
    config: PrintGuardConfig,
    store: Arc<DeviceStore>,
    queue: CommandQueue,
    printers: PrinterService,
    responder: FailureResponder,
}

impl App {
    fn open(config: PrintGuardConfig) -> Result<Self> {
        debug!(path = %config.storage.path.display(), "Opening printer store");
        let store = DeviceStore::open(&config.storage.path, StoreOptions::from_config(&config))
            .with_context(|| format!("opening {}", config.storage.path.display()))?;
        let clock: SharedClock = Arc::new(SystemClock);
        let bus = EventBus::with_capacity(config.events.capacity);

        let queue = CommandQueue::new(Arc::clone(&store), bus, Arc::clone(&clock));
        let telemetry = Arc::new(StatusCache::new(&config.telemetry, clock));
        let printers = PrinterService::new(queue.clone(), telemetry);
        let responder = FailureResponder::new(printers.clone());

        Ok(Self {
            config,
            store,
            queue,
            printers,
            responder,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = PrintGuardConfig::load(args.config.as_deref())?;
    if let Some(path) = args.data {
        config.storage.path = path;
    }

    match args.command {
        Command::Config => print_json(&config),
        command => run(&App::open(config)?, command).await,
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    let default_level = if verbose { "printguard=debug" } else { "printguard=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout carries the JSON results.
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(app: &App, command: Command) -> Result<()> {
    let printers = &app.printers;
    match command {
        Command::Register { name, owner } => print_json(&printers.register(&name, &owner).await?),
        Command::List { owner } => {
            let list = match owner {
                Some(owner) => printers.list_for_owner(&owner)?,
                None => printers.list_all()?,
            };
            print_json(&list)
        }
        Command::Show { device } => print_json(&printers.get(&device)?),
        Command::Rename { device, name } => print_json(&printers.rename(&device, &name).await?),
        Command::SetPolicy {
            device,
            action,
            tools_off,
            bed_off,
        } => {
            let mut policy = printers.get(&device)?.policy;
            if let Some(action) = action {
                policy.action = action;
            }
            if let Some(tools_off) = tools_off {
                policy.tools_off_on_pause = tools_off;
            }
            if let Some(bed_off) = bed_off {
                policy.bed_off_on_pause = bed_off;
            }
            print_json(&printers.update_policy(&device, policy).await?)
        }
        Command::Delete { device } => print_json(&printers.delete(&device).await?),
        Command::DeleteOwner { owner } => print_json(&printers.delete_owner(&owner).await?),
        Command::StartPrint { device, filename } => {
            print_json(&printers.start_print(&device, &filename).await?)
        }
        Command::StopPrint { device } => print_json(&printers.stop_print(&device).await?),
        Command::Alert { device } => print_json(&printers.raise_alert(&device).await?),
        Command::Ack { device, mute } => print_json(&printers.acknowledge(&device, mute).await?),
        Command::ClearAlert { device } => print_json(&printers.clear_alert(&device).await?),
        Command::Pause { device } => print_json(&printers.pause(&device).await?),
        Command::PauseOnFailure { device } => {
            print_json(&printers.pause_on_failure(&device).await?)
        }
        Command::Resume { device, mute } => print_json(&printers.resume(&device, mute).await?),
        Command::Cancel { device } => print_json(&printers.cancel(&device).await?),
        Command::Fail { device } => print_json(&app.responder.respond(&device).await?),
        Command::Commands { device, status } => print_json(&app.queue.list(&device, status)?),
        Command::Stats { device } => print_json(&app.queue.stats(&device)?),
        Command::Poll { token } => {
            let session = app.queue.agent_session(&token)?;
            print_json(&session.poll()?)
        }
        Command::MarkSent { device, command } => {
            print_json(&app.queue.mark_sent(&device, command).await?)
        }
        Command::Dispatch { device } => print_json(&app.queue.dispatch(&device).await?),
        Command::Status { device, set } => {
            if let Some(set) = set {
                printers.get(&device)?;
                printers.telemetry().put_status(&device, parse_fields(&set)?);
            }
            print_json(&printers.status(&device)?)
        }
        Command::Picture { device, set } => {
            if let Some(set) = set {
                printers.get(&device)?;
                printers.telemetry().put_picture(&device, parse_fields(&set)?);
            }
            print_json(&printers.picture(&device)?)
        }
        Command::History { device } => {
            printers.get(&device)?;
            print_json(&app.store.history(&device)?)
        }
        Command::Config => print_json(&app.config),
    }
}

fn parse_fields(raw: &str) -> Result<Fields> {
    serde_json::from_str(raw).context("telemetry must be a JSON object")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
