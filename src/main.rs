//! Office kernel command line - validate configuration or run a demo office.
//!
//! - `check`: load configuration and print the resolved team layout
//! - `demo`: start a small office and print process outcomes and stats

use clap::{Parser, Subcommand};
use office_kernel::kernel::{
    source_fn, JobContext, JobDefinition, JobError, JobOutcome, ManagedObject, Office,
};
use office_kernel::Config;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "office-kernel", version, about = "Office kernel tools")]
struct Cli {
    /// Configuration file. Falls back to OFFICE_CONFIG, then defaults.
    #[arg(long, short, global = true, env = "OFFICE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and print it as JSON.
    Check,
    /// Run a demo office and print the outcomes.
    Demo {
        /// Processes to invoke.
        #[arg(long, default_value_t = 4)]
        processes: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    office_kernel::observability::init_tracing_with(&config.observability);

    match cli.command {
        Command::Check => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Demo { processes } => demo(config, processes).await?,
    }
    Ok(())
}

async fn demo(config: Config, processes: usize) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = Office::builder(config);
    builder.team("io", 2).team("compute", 2);

    let greeting = builder.process_object(
        "greeting",
        source_fn(|| Ok(ManagedObject::new(String::from("hello")))),
    );

    let fetch = builder.job(JobDefinition::function("fetch", "io", |ctx: &mut JobContext<'_>| {
        if let Some(value) = ctx.resumption() {
            return JobOutcome::Complete(value.clone());
        }
        let token = ctx.async_token();
        let request = ctx.parameter().clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            token.complete(json!({ "fetched": request }));
        });
        JobOutcome::Parked(token)
    }));

    let render = builder.job(
        JobDefinition::function("render", "compute", |ctx: &mut JobContext<'_>| {
            let greeting = match ctx.object::<String>(0) {
                Ok(greeting) => greeting,
                Err(err) => return JobOutcome::Escalate(err),
            };
            let n = ctx.parameter()["fetched"].as_u64().unwrap_or(0);
            if n % 3 == 2 {
                let err = JobError::new("demo.unlucky", format!("request {}", n));
                return JobOutcome::Escalate(err);
            }
            JobOutcome::Complete(json!(format!("{} #{}", greeting, n)))
        })
        .with_objects([greeting]),
    );

    let recover = builder.job(JobDefinition::function(
        "recover",
        "compute",
        |ctx: &mut JobContext<'_>| {
            let message = ctx.failure().map(|f| f.message.clone()).unwrap_or_default();
            JobOutcome::Complete(json!(format!("recovered from {}", message)))
        },
    ));

    builder
        .link_next(fetch, render)
        .escalate(render, "demo", recover)
        .entry_point("greet", fetch);
    let mut office = builder.start()?;

    let mut handles = Vec::with_capacity(processes);
    for i in 0..processes {
        handles.push(office.invoke_process("greet", json!(i), None)?);
    }
    let mut outcomes: Vec<Value> = Vec::with_capacity(processes);
    for handle in handles {
        outcomes.push(serde_json::to_value(handle.completed().await?)?);
    }

    let report = json!({
        "catalog": office.catalog(),
        "outcomes": outcomes,
        "stats": office.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    office.shutdown();
    Ok(())
}
