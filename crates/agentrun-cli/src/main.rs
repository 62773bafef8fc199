//! AgentRun CLI - Command line interface for the AgentRun control plane.

mod client;
mod error;
mod sse;

use std::str::FromStr;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use agentrun_core::{Decision, Event, EventKind, PlanItem, Run, RunId, RunMode};

use client::{HttpClient, StartRunBody};

/// AgentRun CLI - start runs, review plans and follow their events
#[derive(Parser)]
#[command(name = "agentrun")]
#[command(about = "CLI for the AgentRun control plane", long_about = None)]
struct Cli {
    /// Control plane base URL
    #[arg(short, long, env = "AGENTRUN_URL", default_value = "http://127.0.0.1:8000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new run
    Start {
        /// Goal to plan and execute
        goal: String,

        /// Maximum number of tasks to execute
        #[arg(short = 's', long)]
        max_steps: Option<usize>,

        /// Execution mode: auto or confirm
        #[arg(short, long, default_value = "auto")]
        mode: String,

        /// Planner model
        #[arg(long)]
        model: Option<String>,

        /// Follow the run's events until it finishes, prompting for plan decisions
        #[arg(short, long)]
        watch: bool,
    },

    /// Submit a decision for a plan awaiting confirmation
    Decide {
        /// Run ID
        run_id: String,

        /// approve, edit, regenerate or cancel (a/e/r/c)
        action: String,
    },

    /// Show a run with its tasks
    Get {
        /// Run ID
        run_id: String,

        /// Also print the run's events
        #[arg(short, long)]
        events: bool,
    },

    /// List runs, most recent first
    List,

    /// Delete a finished run
    Delete {
        /// Run ID
        run_id: String,
    },

    /// Show control plane metrics
    Metrics,

    /// Tail the event stream
    Watch {
        /// Only show events for this run and stop when it finishes
        #[arg(short, long)]
        run: Option<String>,

        /// Replay events after this sequence number
        #[arg(short, long)]
        after: Option<u64>,

        /// Prompt for a decision when a watched plan awaits confirmation
        #[arg(short, long)]
        interactive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = HttpClient::new(&cli.url);

    match cli.command {
        Commands::Start {
            goal,
            max_steps,
            mode,
            model,
            watch,
        } => {
            let body = StartRunBody {
                goal,
                max_steps,
                mode: RunMode::from_str(&mode)?,
                model,
            };
            let run_id = client.start_run(&body).await?;
            println!("Run started: {run_id}");
            if watch {
                watch_events(&client, Some(run_id), Some(0), true).await?;
            }
        }
        Commands::Decide { run_id, action } => {
            let decision = Decision::from_str(&action)?;
            client.decide(&RunId::new(run_id), decision).await?;
            println!("Decision submitted: {decision}");
        }
        Commands::Get { run_id, events } => {
            let detail = client.get_run(&RunId::new(run_id)).await?;
            print_run(&detail.run);
            if !detail.tasks.is_empty() {
                println!("  Tasks:");
                for task in &detail.tasks {
                    println!(
                        "    #{:<3} {:<12} {}",
                        task.id.get(),
                        task.status.as_str(),
                        task.title
                    );
                    if let Some(reflection) = &task.reflection {
                        println!("         {reflection}");
                    }
                }
            }
            if events {
                println!("  Events:");
                for event in &detail.events {
                    print_event(event);
                }
            }
        }
        Commands::List => {
            let runs = client.list_runs().await?;
            println!("Runs ({}):", runs.len());
            println!("{:<36}  {:<22}  {:<8}  {:<19}  {}", "ID", "STATUS", "MODE", "CREATED", "GOAL");
            println!("{}", "-".repeat(100));
            for run in runs {
                println!(
                    "{:<36}  {:<22}  {:<8}  {:<19}  {}",
                    run.id.as_str(),
                    run.status.as_str(),
                    run.mode.as_str(),
                    run.created_at.format("%Y-%m-%d %H:%M:%S"),
                    run.goal
                );
            }
        }
        Commands::Delete { run_id } => {
            let run_id = RunId::new(run_id);
            client.delete_run(&run_id).await?;
            println!("Run deleted: {run_id}");
        }
        Commands::Metrics => {
            let metrics = client.metrics().await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Commands::Watch {
            run,
            after,
            interactive,
        } => {
            watch_events(&client, run.map(RunId::new), after, interactive).await?;
        }
    }

    Ok(())
}

/// Print events as they arrive. With a run filter, stops once that run ends.
async fn watch_events(
    client: &HttpClient,
    run: Option<RunId>,
    after: Option<u64>,
    interactive: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = client.events(after).await?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    while let Some(event) = stream.next().await {
        let event = event?;
        if run.as_ref().is_some_and(|id| *id != event.run_id) {
            continue;
        }
        print_event(&event);

        match &event.kind {
            EventKind::PlanConfirm { .. } if interactive && run.is_some() => {
                let decision = prompt_decision(&mut stdin).await?;
                client.decide(&event.run_id, decision).await?;
            }
            EventKind::RunComplete { .. } | EventKind::RunError { .. } if run.is_some() => break,
            _ => {}
        }
    }

    Ok(())
}

async fn prompt_decision<R>(
    lines: &mut tokio::io::Lines<R>,
) -> Result<Decision, Box<dyn std::error::Error>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    loop {
        stdout
            .write_all(b"Choose [a]pprove, [e]dit, [r]egenerate, [c]ancel: ")
            .await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            // Closed stdin cannot approve anything.
            return Ok(Decision::Cancel);
        };
        match Decision::from_str(&line) {
            Ok(decision) => return Ok(decision),
            Err(e) => println!("{e}"),
        }
    }
}

fn print_run(run: &Run) {
    println!("  ID:         {}", run.id);
    println!("  Goal:       {}", run.goal);
    println!("  Mode:       {}", run.mode);
    println!("  Status:     {}", run.status);
    if let Some(model) = &run.model {
        println!("  Model:      {model}");
    }
    println!("  Created:    {}", run.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(completed) = run.completed_at {
        println!("  Completed:  {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(error) = &run.error {
        println!("  Error:      {error}");
    }
}

fn print_event(event: &Event) {
    println!("[{:>5}] {:<16} {}", event.seq, event.event_type(), event.text);
    match &event.kind {
        EventKind::Plan { plan, .. } | EventKind::PlanConfirm { plan } => print_plan(plan),
        EventKind::TaskResult {
            result: Some(result),
            ..
        } => println!("        {result}"),
        _ => {}
    }
}

fn print_plan(plan: &[PlanItem]) {
    for item in plan {
        println!("        {}. {}", item.id, item.title);
    }
}
