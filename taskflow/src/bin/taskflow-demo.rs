//! taskflow-demo - drive the worker pool, pipeline and timeout guard from
//! the command line.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use rand::Rng;
use taskflow::{
    CancellationSignal, Engine, EngineError, EngineOptions, EngineResult, Outcome, SharedTask,
    Stage, Task,
};

#[derive(Parser, Debug)]
#[command(name = "taskflow-demo", version, about = "Concurrent task engine demo")]
struct Cli {
    /// JSON options file (see EngineOptions)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to a daily-rotated file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send simulated emails and process images on the worker pool
    Pool {
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long, default_value_t = 5)]
        emails: usize,
        #[arg(long, default_value_t = 3)]
        images: usize,
        /// Percentage of email sends that fail
        #[arg(long, default_value_t = 10)]
        failure_rate: u32,
    },
    /// Push values through +10 / +20 / +30 stages
    Pipeline {
        #[arg(long, value_delimiter = ',', default_values_t = vec![1, 2, 3])]
        values: Vec<i64>,
        /// Cancel the pipeline after this many milliseconds
        #[arg(long)]
        cancel_after_ms: Option<u64>,
        /// Delay per stage, to make cancellation observable
        #[arg(long, default_value_t = 0)]
        stage_delay_ms: u64,
        /// Drop a value whose stage transform runs longer than this
        #[arg(long)]
        stage_timeout_ms: Option<u64>,
    },
    /// Race a sleep against a timeout
    Guard {
        #[arg(long, default_value_t = 500)]
        work_ms: u64,
        #[arg(long, default_value_t = 100)]
        timeout_ms: u64,
    },
}

struct EmailTask {
    email: String,
    subject: String,
    failure_rate: u32,
}

#[async_trait]
impl Task for EmailTask {
    async fn execute(&self) -> EngineResult<()> {
        tracing::info!(to = %self.email, subject = %self.subject, "sending email");
        let (delay, roll) = {
            let mut rng = rand::rng();
            (rng.random_range(20..80), rng.random_range(0..100))
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if roll < self.failure_rate {
            return Err(EngineError::TaskExecutionFailure(format!(
                "mail server rejected {}",
                self.email
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.email
    }
}

struct ImageProcessingTask {
    image_url: String,
    processed_bytes: AtomicU32,
}

#[async_trait]
impl Task for ImageProcessingTask {
    async fn execute(&self) -> EngineResult<()> {
        tracing::info!(url = %self.image_url, "processing image");
        let delay = rand::rng().random_range(50..150);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.processed_bytes.store(delay as u32 * 1024, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.image_url
    }
}

async fn run_pool(
    engine: &Engine,
    emails: usize,
    images: usize,
    failure_rate: u32,
) -> anyhow::Result<()> {
    let image_tasks: Vec<Arc<ImageProcessingTask>> = (0..images)
        .map(|i| {
            Arc::new(ImageProcessingTask {
                image_url: format!("https://images.example.com/{i}.png"),
                processed_bytes: AtomicU32::new(0),
            })
        })
        .collect();

    let mut tasks: Vec<SharedTask> = (0..emails)
        .map(|i| {
            Arc::new(EmailTask {
                email: format!("user{i}@example.com"),
                subject: "Welcome".to_string(),
                failure_rate,
            }) as SharedTask
        })
        .collect();
    tasks.extend(image_tasks.iter().map(|t| Arc::clone(t) as SharedTask));

    let report = engine.run_tasks(tasks).await?;

    for (name, error) in report.failures() {
        tracing::warn!(task = name, %error, "task did not succeed");
    }
    for task in &image_tasks {
        tracing::info!(
            url = %task.image_url,
            bytes = task.processed_bytes.load(Ordering::Relaxed),
            "image result"
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_pipeline(
    engine: &Engine,
    values: Vec<i64>,
    cancel_after_ms: Option<u64>,
    stage_delay_ms: u64,
) -> anyhow::Result<()> {
    let delay = Duration::from_millis(stage_delay_ms);
    let stage = |name: &'static str, add: i64| {
        Stage::new(name, DelayedAdd { add, delay })
    };

    let signal = CancellationSignal::new();
    let (input, output, handle) = engine.build_pipeline(
        vec![stage("transform", 10), stage("enrich", 20), stage("result", 30)],
        signal.clone(),
    )?;

    if let Some(ms) = cancel_after_ms {
        let signal = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            signal.cancel();
        });
    }

    let producer = tokio::spawn(async move {
        for value in values {
            if let Err(e) = input.send(value).await {
                tracing::info!(value, error = %e, "stopped feeding pipeline");
                break;
            }
        }
    });

    let results = output.collect().await;
    producer.await.context("producer task failed")?;
    let metrics = handle.join().await?;

    println!("results: {:?}", results);
    println!(
        "delivered={} dropped={} timed_out={} cancel_reason={:?}",
        metrics.delivered(),
        metrics.dropped(),
        metrics.timed_out(),
        metrics.cancel_reason
    );
    Ok(())
}

struct DelayedAdd {
    add: i64,
    delay: Duration,
}

#[async_trait]
impl taskflow::Transform<i64> for DelayedAdd {
    async fn apply(&self, value: i64) -> EngineResult<i64> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(value + self.add)
    }
}

async fn run_guard(engine: &Engine, work_ms: u64, timeout_ms: u64) -> anyhow::Result<()> {
    let guard = engine.guard_for(Duration::from_millis(timeout_ms));
    let signal = CancellationSignal::new();

    let outcome = guard
        .run(
            async {
                tokio::time::sleep(Duration::from_millis(work_ms)).await;
                work_ms
            },
            &signal,
        )
        .await;

    match outcome {
        Outcome::Completed(ms) => println!("completed after {ms}ms"),
        Outcome::TimedOut(after) => println!("timed out after {after:?}"),
        Outcome::Cancelled(reason) => println!("cancelled: {reason:?}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _log_guard = match &cli.log_dir {
        Some(dir) => Some(taskflow::init_logging_to(dir)?),
        None => {
            taskflow::init_logging()?;
            None
        }
    };

    let mut options = match &cli.config {
        Some(path) => EngineOptions::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineOptions::default(),
    };

    if let Command::Pool {
        concurrency: Some(concurrency),
        ..
    } = &cli.command
    {
        options.pool.concurrency = *concurrency;
    }
    if let Command::Pipeline {
        stage_timeout_ms: Some(ms),
        ..
    } = &cli.command
    {
        options.pipeline.stage_timeout_ms = Some(*ms);
    }

    let engine = Engine::new(options)?;

    match cli.command {
        Command::Pool {
            emails,
            images,
            failure_rate,
            ..
        } => run_pool(&engine, emails, images, failure_rate).await?,
        Command::Pipeline {
            values,
            cancel_after_ms,
            stage_delay_ms,
            ..
        } => run_pipeline(&engine, values, cancel_after_ms, stage_delay_ms).await?,
        Command::Guard {
            work_ms,
            timeout_ms,
        } => run_guard(&engine, work_ms, timeout_ms).await?,
    }

    let metrics = engine.metrics();
    tracing::info!(?metrics, "engine metrics");
    Ok(())
}
