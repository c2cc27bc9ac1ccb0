use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;

use commander::config::Config;
use commander::knowledge::KnowledgeDocument;
use commander::registry::Worker;
use commander::{
    describe_error, Coordinator, Decision, DecisionId, DecisionStatus, Error, Result, Task,
    TaskId, TaskPatch, TaskStatus, TaskTransition,
};

/// Commander - delegates goals to specialist workers and tracks every task
#[derive(Parser, Debug)]
#[command(name = "commander")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    COMMANDER_DEBUG=1     Enable debug logging (alternative to --debug)\n    RUST_LOG              Override the log filter"
)]
pub struct Cli {
    /// Workspace root (defaults to the current directory)
    #[arg(short = 'w', long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Enable debug logging (writes to <workspace>/.commander/commander.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Delegate a goal to the best matching worker
    Delegate {
        /// The goal in plain language
        goal: String,

        /// Preferred capability tags (repeatable or comma separated)
        #[arg(short = 't', long = "tag", value_delimiter = ',', required = true)]
        tags: Vec<String>,

        /// Coordination task this goal was split from
        #[arg(long)]
        parent: Option<TaskId>,
    },

    /// Show one task in full
    Status { id: TaskId },

    /// List tasks, oldest first
    List {
        /// Only tasks in this status
        #[arg(short, long)]
        status: Option<TaskStatus>,

        /// Only tasks spawned from this coordination task
        #[arg(long, conflicts_with = "status")]
        parent: Option<TaskId>,
    },

    /// Report progress on a task
    Update {
        id: TaskId,

        /// Who is reporting
        #[arg(short, long, default_value = "operator")]
        author: String,

        /// Lifecycle step: accept, block, resolve, complete, fail, abandon
        #[arg(long)]
        transition: Option<TaskTransition>,

        #[arg(short, long)]
        note: Option<String>,

        /// Reason for blocking
        #[arg(long)]
        blocker: Option<String>,

        /// Append a checklist item (repeatable)
        #[arg(long = "add-item")]
        add_items: Vec<String>,

        /// Mark checklist item N done, counting from 1 (repeatable)
        #[arg(long = "done")]
        done: Vec<usize>,
    },

    /// Escalate a blocked task to its owner's escalation targets
    Escalate {
        id: TaskId,

        /// Block an in-progress task first (for stale tasks)
        #[arg(long)]
        force: bool,

        /// Reason recorded when forcing
        #[arg(long, default_value = "no progress reported", requires = "force")]
        reason: String,
    },

    /// List delegated or in-progress tasks idle past the staleness threshold
    Stale,

    /// Record a decision
    Decide {
        title: String,

        #[arg(long, default_value = "")]
        context: String,

        #[arg(long, default_value = "")]
        rationale: String,

        #[arg(long, default_value = "")]
        alternatives: String,

        #[arg(long, default_value = "")]
        consequences: String,

        /// proposed, accepted or deprecated
        #[arg(long, default_value = "proposed")]
        status: DecisionStatus,

        /// Task the decision was made for
        #[arg(long)]
        task: Option<TaskId>,
    },

    /// Mark a decision as superseded by a newer one
    Supersede { old: DecisionId, new: DecisionId },

    /// Show a decision, or list all decisions
    Decision {
        id: Option<DecisionId>,

        /// Change the decision's status (only proposed -> accepted is allowed)
        #[arg(long, requires = "id")]
        set_status: Option<DecisionStatus>,
    },

    /// List registered workers
    Workers,

    /// Find a worker's knowledge documents (all of them without keywords)
    Kb {
        worker: String,
        keywords: Vec<String>,

        /// Print each document's content
        #[arg(long)]
        show: bool,
    },

    /// Create a starter commander.toml and workers.toml
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let debug = cli.debug;

    if let Err(e) = run(cli).await {
        eprintln!("{}", describe_error(&e));
        if debug {
            if let Some(path) = commander::log::log_path() {
                eprintln!("details: {}", path.display());
            }
        }
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let logging = match &cli.workspace {
        Some(dir) => commander::log::init_at(dir, cli.debug),
        None => commander::log::init_with_debug(cli.debug),
    };
    if let Err(e) = logging {
        eprintln!("warning: logging disabled: {}", e);
    }

    let workspace = match &cli.workspace {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    if cli.command == Command::Init {
        return run_init(&workspace);
    }

    let coordinator = Coordinator::open(&workspace)?;
    let json = cli.json;

    match cli.command {
        Command::Delegate { goal, tags, parent } => {
            let id = coordinator.delegate(&goal, &tags, parent).await?;
            let task = coordinator.status(&id).await?;
            output(json, &task, print_task)
        }
        Command::Status { id } => {
            let task = coordinator.status(&id).await?;
            output(json, &task, print_task)
        }
        Command::List { status, parent } => {
            let tasks = match parent {
                Some(parent) => coordinator.children(&parent).await?,
                None => coordinator.list(status).await?,
            };
            output(json, tasks.as_slice(), print_task_lines)
        }
        Command::Update {
            id,
            author,
            transition,
            note,
            blocker,
            add_items,
            done,
        } => {
            let mut patch = TaskPatch::new(&author);
            patch.transition = transition;
            patch.note = note;
            patch.blocker = blocker;
            patch.add_items = add_items;
            for n in done {
                let index = n.checked_sub(1).ok_or_else(|| Error::InvalidMutation {
                    id: id.to_string(),
                    reason: "checklist items are numbered from 1".to_string(),
                })?;
                patch = patch.done_item(index);
            }
            let task = coordinator.update(&id, patch).await?;
            output(json, &task, print_task)
        }
        Command::Escalate { id, force, reason } => {
            let task = if force {
                coordinator.force_escalate(&id, &reason).await?
            } else {
                let id = coordinator.escalate(&id).await?;
                coordinator.status(&id).await?
            };
            output(json, &task, print_task)
        }
        Command::Stale => {
            let tasks = coordinator.stale().await?;
            output(json, tasks.as_slice(), print_task_lines)
        }
        Command::Decide {
            title,
            context,
            rationale,
            alternatives,
            consequences,
            status,
            task,
        } => {
            let mut decision = Decision::new(&title)
                .with_status(status)
                .with_context(&context)
                .with_rationale(&rationale)
                .with_alternatives(&alternatives)
                .with_consequences(&consequences);
            if let Some(task) = &task {
                coordinator.status(task).await?;
                decision = decision.for_task(task);
            }
            let id = coordinator.record_decision(decision).await?;
            let decision = coordinator.decision(&id).await?;
            output(json, &decision, print_decision)
        }
        Command::Supersede { old, new } => {
            coordinator.supersede(&old, &new).await?;
            let decision = coordinator.decision(&old).await?;
            output(json, &decision, print_decision)
        }
        Command::Decision { id, set_status } => match (id, set_status) {
            (Some(id), Some(status)) => {
                let decision = coordinator.set_decision_status(&id, status).await?;
                output(json, &decision, print_decision)
            }
            (Some(id), None) => {
                let decision = coordinator.decision(&id).await?;
                output(json, &decision, print_decision)
            }
            (None, _) => {
                let decisions = coordinator.decisions().await?;
                output(json, decisions.as_slice(), print_decision_lines)
            }
        },
        Command::Workers => output(json, coordinator.workers(), print_workers),
        Command::Kb {
            worker,
            keywords,
            show,
        } => {
            let docs = if keywords.is_empty() {
                coordinator.documents(&worker)?
            } else {
                coordinator.knowledge(&worker, &keywords)?
            };
            if show && !json {
                for doc in &docs {
                    println!("==> {} <==", doc.path.display());
                    println!("{}", doc.read()?);
                }
                return Ok(());
            }
            output(json, docs.as_slice(), print_documents)
        }
        Command::Init => Ok(()),
    }
}

fn output<T: Serialize + ?Sized>(json: bool, value: &T, text: fn(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

fn print_task(task: &Task) {
    println!("{} [{}] owner: {} (v{})", task.id, task.status, task.owner_worker, task.version);
    println!("  {}", task.title);
    if let Some(parent) = &task.coordinator_ref {
        println!("  parent: {}", parent);
    }
    if !task.preferred_tags.is_empty() {
        println!("  tags: {}", task.preferred_tags.join(", "));
    }
    if task.owner_history.len() > 1 {
        println!("  owners: {}", task.owner_history.join(" -> "));
    }
    if let Some(blocker) = &task.blocker {
        println!("  blocker: {}", blocker);
    }
    if !task.checklist.is_empty() {
        println!("  checklist:");
        for (i, item) in task.checklist.iter().enumerate() {
            let mark = if item.done { "x" } else { " " };
            println!("    {}. [{}] {}", i + 1, mark, item.description);
        }
    }
    if !task.log_entries.is_empty() {
        println!("  log:");
        for entry in &task.log_entries {
            println!(
                "    {} {}: {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.author,
                entry.note
            );
        }
    }
}

fn print_task_lines(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }
    for task in tasks {
        let title = task.title.lines().next().unwrap_or_default();
        println!(
            "{}  {:<11}  {:<12}  {}",
            task.id, task.status, task.owner_worker, title
        );
    }
}

fn print_decision(decision: &Decision) {
    println!("{} [{}] {}", decision.id, decision.status, decision.title);
    if decision.is_superseded() {
        let by = decision
            .superseded_by
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "(unknown)".to_string());
        println!("  superseded by: {}", by);
    }
    if let Some(task) = &decision.task_ref {
        println!("  task: {}", task);
    }
    for (name, text) in [
        ("Context", &decision.context),
        ("Rationale", &decision.rationale),
        ("Alternatives", &decision.alternatives),
        ("Consequences", &decision.consequences),
    ] {
        if !text.is_empty() {
            println!("  {}:", name);
            for line in text.lines() {
                println!("    {}", line);
            }
        }
    }
}

fn print_decision_lines(decisions: &[Decision]) {
    if decisions.is_empty() {
        println!("No decisions.");
        return;
    }
    for decision in decisions {
        println!("{}  {:<10}  {}", decision.id, decision.status, decision.title);
    }
}

fn print_workers(workers: &[Worker]) {
    for worker in workers {
        let tags: Vec<&str> = worker.capability_tags.iter().map(String::as_str).collect();
        println!("{}  [{}]  {}", worker.id, tags.join(", "), worker.summary);
        if !worker.escalation_targets.is_empty() {
            println!("    escalates to: {}", worker.escalation_targets.join(", "));
        }
    }
}

fn print_documents(docs: &[KnowledgeDocument]) {
    if docs.is_empty() {
        println!("No matching documents.");
        return;
    }
    for doc in docs {
        let tags: Vec<&str> = doc.tags.iter().map(String::as_str).collect();
        println!("{}  [{}]", doc.path.display(), tags.join(", "));
    }
}

const SAMPLE_WORKERS: &str = r#"# Worker catalog. Tags are matched case-insensitively.

[[worker]]
id = "backend"
summary = "Builds server-side features and APIs"
tags = ["rust", "api", "database"]
kb_location = "kb/backend"
escalation_targets = ["architect"]
delegation_targets = ["tester"]

[[worker]]
id = "architect"
summary = "Owns system design and cross-cutting decisions"
tags = ["design", "architecture", "rust", "api"]
kb_location = "kb/architect"

[[worker]]
id = "tester"
summary = "Writes and maintains automated tests"
tags = ["testing", "rust"]
kb_location = "kb/tester"
escalation_targets = ["backend"]
"#;

fn run_init(workspace: &Path) -> Result<()> {
    let config_path = Config::config_path(workspace);
    if config_path.exists() {
        println!("Keeping existing {}", config_path.display());
    } else {
        Config::default().save(workspace)?;
        println!("Wrote {}", config_path.display());
    }

    let config = Config::load(workspace)?;
    let registry_path = config.registry_path(workspace);
    if registry_path.exists() {
        println!("Keeping existing {}", registry_path.display());
    } else {
        if let Some(parent) = registry_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&registry_path, SAMPLE_WORKERS)?;
        println!("Wrote {}", registry_path.display());
    }

    let coordinator = Coordinator::open(workspace)?;
    println!(
        "Workspace ready with {} worker(s).",
        coordinator.workers().len()
    );
    Ok(())
}
