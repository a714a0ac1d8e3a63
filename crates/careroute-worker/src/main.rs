//! Periodic claim expiration and unclaimed-case notification.
//!
//! Runs the expiration sweep and the notifier as two independent tasks
//! against a shared SQLite file. Any number of instances may run side by
//! side; the store's advisory locks keep them off each other's targets.
//!
//! # Environment Variables
//! - `CAREROUTE_DB_PATH`: store file (default: "careroute.db")
//! - `CAREROUTE_TICK_SECONDS`: period of both tasks (default: 60); the sweep
//!   never runs less often than every half grace period
//! - `CAREROUTE_*`: engine configuration, see `careroute_core::config`

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::Context;
use careroute_core::models::{CaseId, Provider};
use careroute_core::{
    Clock, Database, Deadline, Env, ExpirationWorker, NotificationSink, Notifier, NotifyError,
    RoutingConfig, SystemClock,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const ENV_DB_PATH: &str = "CAREROUTE_DB_PATH";
const ENV_TICK_SECONDS: &str = "CAREROUTE_TICK_SECONDS";
const DEFAULT_DB_PATH: &str = "careroute.db";
const DEFAULT_TICK_SECONDS: u64 = 60;

/// Writes each notification to the log. SMS/push delivery is wired in by
/// the deployment.
struct LogSink;

impl NotificationSink for LogSink {
    fn notify_provider(&self, provider: &Provider, case_id: CaseId) -> Result<(), NotifyError> {
        info!(
            provider_id = %provider.id,
            provider = %provider.display_name,
            case_id = %case_id,
            "unclaimed case notification"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("careroute=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RoutingConfig::from_env().context("invalid routing configuration")?;
    let db_path = std::env::var(ENV_DB_PATH).unwrap_or_else(|_| DEFAULT_DB_PATH.into());
    let tick = match std::env::var(ENV_TICK_SECONDS) {
        Ok(v) => v
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{} is not a number: {}", ENV_TICK_SECONDS, v))?,
        Err(_) => DEFAULT_TICK_SECONDS,
    }
    .max(1);

    let notifier_period = StdDuration::from_secs(tick);
    let max_sweep = config
        .max_sweep_period()
        .to_std()
        .unwrap_or(StdDuration::from_secs(1));
    let sweep_period = notifier_period.min(max_sweep);
    let holder: Arc<str> = Uuid::new_v4().to_string().into();

    info!(
        db_path = %db_path,
        holder = %holder,
        sweep_period = ?sweep_period,
        notifier_period = ?notifier_period,
        "careroute worker starting"
    );

    let config = Arc::new(config);
    let expiration = spawn_periodic(
        "expiration",
        sweep_period,
        open_shared(&db_path)?,
        config.clone(),
        holder.clone(),
        |env, holder| {
            ExpirationWorker::new(env, holder).run_once();
        },
    );
    let notifier = spawn_periodic(
        "notifier",
        notifier_period,
        open_shared(&db_path)?,
        config,
        holder,
        |env, holder| {
            if let Err(e) = Notifier::new(env, &LogSink, holder).run_once() {
                warn!(error = %e, "notifier pass failed");
            }
        },
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    expiration.abort();
    notifier.abort();
    Ok(())
}

fn open_shared(path: &str) -> anyhow::Result<Arc<Mutex<Database>>> {
    let db = Database::open(path).with_context(|| format!("failed to open store {}", path))?;
    Ok(Arc::new(Mutex::new(db)))
}

/// Run `job` every `period` on the blocking pool, each iteration bounded by a
/// deadline of one period.
fn spawn_periodic<F>(
    name: &'static str,
    period: StdDuration,
    db: Arc<Mutex<Database>>,
    config: Arc<RoutingConfig>,
    holder: Arc<str>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn(Env<'_>, &str) + Send + Sync + 'static,
{
    let job = Arc::new(job);
    let budget = chrono::Duration::from_std(period).unwrap_or(chrono::Duration::seconds(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let (db, config, holder, job) =
                (db.clone(), config.clone(), holder.clone(), job.clone());
            let iteration = tokio::task::spawn_blocking(move || {
                let db = db.lock().unwrap_or_else(|e| e.into_inner());
                let clock = SystemClock;
                let deadline = Deadline::after(clock.now(), budget);
                let env = Env::new(&db, &config, &clock).with_deadline(deadline);
                job(env, &holder);
            })
            .await;
            if let Err(e) = iteration {
                error!(task = name, error = %e, "worker iteration panicked");
            }
        }
    })
}
