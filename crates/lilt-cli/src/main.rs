//! Cooperative scheduling demonstrations
//!
//! Walks through three scheduling behaviors on a single run loop:
//! sequential vs gathered awaiting of delay tasks, offloading a blocking
//! call to the worker pool, and running CPU-bound callables on pool threads.

use anyhow::Result;
use clap::Parser;
use lilt_core::{gather, Scheduler, SchedulerHandle, TaskError};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lilt")]
#[command(about = "Cooperative scheduling demonstrations", long_about = None)]
#[command(version)]
struct Cli {
    /// Worker pool threads (defaults to the number of CPU cores)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Scale the demo delays down from seconds to 100ms units
    #[arg(long)]
    fast: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let unit = if cli.fast {
        Duration::from_millis(100)
    } else {
        Duration::from_secs(1)
    };

    let mut scheduler = match cli.workers {
        Some(count) => Scheduler::with_workers(count),
        None => Scheduler::new(),
    };
    let handle = scheduler.handle();

    let root = handle.spawn(run_demos(handle.clone(), unit));
    scheduler.run_until_complete(root)?;
    Ok(())
}

async fn run_demos(handle: SchedulerHandle, unit: Duration) -> Result<(), TaskError> {
    sequential_vs_gathered(&handle, unit).await?;
    blocking_on_pool(&handle, unit).await?;
    cpu_bound_on_pool(&handle).await?;
    Ok(())
}

/// Delay task standing in for a network request.
async fn delayed_task(
    handle: SchedulerHandle,
    name: &'static str,
    delay: Duration,
) -> Result<&'static str, TaskError> {
    println!("{} started...", name);
    handle.sleep(delay).await;
    println!("{} finished after {:.1} seconds", name, delay.as_secs_f64());
    Ok(name)
}

async fn sequential_vs_gathered(handle: &SchedulerHandle, unit: Duration) -> Result<(), TaskError> {
    println!("\n=== Running Sequentially ===");
    let start = Instant::now();
    delayed_task(handle.clone(), "Task 1", unit * 2).await?;
    delayed_task(handle.clone(), "Task 2", unit * 3).await?;
    println!(
        "Sequential execution took {:.2} seconds",
        start.elapsed().as_secs_f64()
    );

    println!("\n=== Running Concurrently ===");
    let start = Instant::now();
    let t1 = handle.spawn(delayed_task(handle.clone(), "Task 1", unit * 2));
    let t2 = handle.spawn(delayed_task(handle.clone(), "Task 2", unit * 3));
    gather(vec![t1, t2]).await?;
    println!(
        "Concurrent execution took {:.2} seconds",
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

async fn blocking_on_pool(handle: &SchedulerHandle, unit: Duration) -> Result<(), TaskError> {
    println!("\n=== Running Blocking Call on the Worker Pool ===");
    let start = Instant::now();
    let delay = unit * 3;
    handle
        .submit(move || {
            println!("Blocking call started...");
            std::thread::sleep(delay);
            println!("Blocking call finished");
        })
        .await?;
    println!(
        "Worker pool finished in {:.2} seconds",
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

async fn cpu_bound_on_pool(handle: &SchedulerHandle) -> Result<(), TaskError> {
    println!("\n=== Running CPU-Bound Callables on the Worker Pool ===");
    println!(
        "With {} pool threads these run in parallel on a multi-core host",
        handle.pool_size()
    );
    let start = Instant::now();
    let first = handle.submit(|| cpu_heavy(1));
    let second = handle.submit(|| cpu_heavy(2));
    let totals = gather(vec![first, second]).await?;
    println!(
        "CPU-bound callables finished in {:.2} seconds",
        start.elapsed().as_secs_f64()
    );
    println!("Totals: {:?}", totals);
    Ok(())
}

fn cpu_heavy(n: usize) -> u64 {
    println!("CPU-heavy callable {} started...", n);
    let total: u64 = (0..1_000_000u64).map(|i| i * i).sum();
    println!("CPU-heavy callable {} finished", n);
    total
}
