use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryOutbox, LogDelivery};
use crate::routes::with_gig_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use gigflow::clock::{Clock, SystemClock};
use gigflow::config::AppConfig;
use gigflow::error::AppError;
use gigflow::telemetry;
use gigflow::workflows::gigs::{
    GigService, InMemoryMarketplaceStore, MarketplaceStore, Notifier, PenaltyRuleTable,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(rules) = args.rules.take() {
        config.discipline.rules_path = Some(rules);
    }

    telemetry::init(&config.telemetry)?;

    let rules = Arc::new(PenaltyRuleTable::load(
        config.discipline.rules_path.as_deref(),
    )?);
    let rules_source = config
        .discipline
        .rules_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "built-in".to_string());
    info!(source = %rules_source, "penalty rules loaded");

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryMarketplaceStore::new());
    let outbox = Arc::new(InMemoryOutbox::new(Arc::new(LogDelivery)));
    let gig_service = Arc::new(GigService::new(store, outbox.clone(), rules, clock.clone()));

    let _dispatcher =
        spawn_notification_dispatcher(outbox, clock, config.scheduler.notification_poll);
    let _sweeper = spawn_job_start_sweep(gig_service.clone(), config.scheduler.job_start_sweep);

    let app = with_gig_routes(gig_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "gig lifecycle service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodically hands due reminders from the outbox to the delivery gateway.
pub(crate) fn spawn_notification_dispatcher(
    outbox: Arc<InMemoryOutbox>,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let summary = outbox.dispatch_due(clock.now());
            if summary.sent + summary.failed + summary.dropped > 0 {
                info!(
                    sent = summary.sent,
                    failed = summary.failed,
                    dropped = summary.dropped,
                    pending = outbox.pending(),
                    "scheduled notifications dispatched"
                );
            }
        }
    })
}

/// Moves staffed jobs to `in_progress` once their start time passes.
pub(crate) fn spawn_job_start_sweep<S, N>(
    service: Arc<GigService<S, N>>,
    every: Duration,
) -> JoinHandle<()>
where
    S: MarketplaceStore + 'static,
    N: Notifier + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match service.start_due_jobs() {
                Ok(started) if !started.is_empty() => {
                    info!(count = started.len(), "due jobs started")
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "job start sweep failed"),
            }
        }
    })
}
