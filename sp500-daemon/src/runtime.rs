use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use sp500_core::Config;
use sp500_sync::{PassThrough, RunOutcome, StoreWrite, SyncPipeline};

use crate::components::{build_components, Components};
use crate::error::{io_err, DaemonError};
use crate::http::{build_router, AppState};
use crate::schedule::{next_trigger_after, DAILY_TRIGGER};

/// Fallback wait when no next trigger can be computed.
const RESCHEDULE_FALLBACK: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, Default)]
pub struct ServeOptions {
    /// Run one sync as soon as the daemon is up.
    pub sync_on_start: bool,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(config: Config, options: ServeOptions) -> Result<(), DaemonError> {
    init_tracing("info");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio runtime", e))?;
    runtime.block_on(run(config, options))
}

/// Wire components, bind the configured port and run until ctrl-c.
pub async fn run(config: Config, options: ServeOptions) -> Result<(), DaemonError> {
    let components = build_components(&config)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonError::Bind { addr, source })?;
    tracing::info!(%addr, backend = %components.backend, "sp500 daemon listening");

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Task {
                            task: "signal_handler",
                            message: format!("ctrl-c handler failed: {err}"),
                        }),
                    }
                }
            }
        })
    };

    let served = serve(
        components,
        listener,
        config.server.sync_deadline,
        options,
        shutdown_tx,
    )
    .await;
    handle_join("signal_handler", signal_handle.await)?;
    served
}

/// Run the scheduler, the HTTP server and the write-feed logger on an
/// already-bound listener until `shutdown` fires or a task fails.
pub async fn serve(
    components: Components,
    listener: TcpListener,
    sync_deadline: Duration,
    options: ServeOptions,
    shutdown: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let Components {
        pipeline,
        write_feed,
        backend,
    } = components;

    let scheduler_handle = {
        let shutdown = shutdown.clone();
        let shutdown_rx = shutdown.subscribe();
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let result = scheduler_task(pipeline, sync_deadline, options, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let http_handle = {
        let shutdown = shutdown.clone();
        let shutdown_rx = shutdown.subscribe();
        let state = AppState {
            pipeline: pipeline.clone(),
            filter: Arc::new(PassThrough),
            backend,
            started_at: Utc::now(),
        };
        tokio::spawn(async move {
            let result = http_task(listener, state, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let feed_handle = {
        let shutdown = shutdown.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = write_feed_task(write_feed, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let (scheduler_result, http_result, feed_result) =
        tokio::join!(scheduler_handle, http_handle, feed_handle);

    handle_join("scheduler", scheduler_result)?;
    handle_join("http_server", http_result)?;
    handle_join("write_feed", feed_result)?;
    Ok(())
}

async fn scheduler_task(
    pipeline: Arc<SyncPipeline>,
    deadline: Duration,
    options: ServeOptions,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut in_flight = options
        .sync_on_start
        .then(|| spawn_sync(pipeline.clone(), deadline, "startup"));

    loop {
        let now = Local::now();
        let wait = match next_trigger_after(&now, DAILY_TRIGGER) {
            Some(next) => {
                tracing::info!(next = %next.to_rfc3339(), "next scheduled sync");
                (next - now).to_std().unwrap_or_default()
            }
            None => {
                tracing::warn!("could not compute next trigger; retrying later");
                RESCHEDULE_FALLBACK
            }
        };

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(wait) => {
                in_flight = Some(spawn_sync(pipeline.clone(), deadline, "schedule"));
            }
        }
    }

    if let Some(handle) = in_flight {
        stop_in_flight(handle).await;
    }
    Ok(())
}

/// Fire one run without waiting for it; overlapping runs are dropped by the
/// pipeline's own guard.
fn spawn_sync(
    pipeline: Arc<SyncPipeline>,
    deadline: Duration,
    source: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let report = pipeline.run_with_deadline(deadline).await;
        match &report.outcome {
            RunOutcome::Failed(err) => tracing::error!(
                source,
                error_kind = err.kind(),
                error = %err,
                "triggered sync failed"
            ),
            outcome => tracing::info!(source, outcome = outcome.label(), "triggered sync finished"),
        }
    })
}

/// Abort a run still in flight at shutdown. Store writes are atomic, so the
/// previous snapshot stays intact.
async fn stop_in_flight(handle: JoinHandle<()>) {
    if handle.is_finished() {
        return;
    }
    handle.abort();
    match handle.await {
        Ok(()) => tracing::info!("in-flight sync finished before shutdown"),
        Err(err) if err.is_cancelled() => tracing::warn!("in-flight sync aborted by shutdown"),
        Err(err) => tracing::error!(error = %err, "in-flight sync task failed"),
    }
}

async fn http_task(
    listener: TcpListener,
    state: AppState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let router = build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| io_err("http server", e))
}

async fn write_feed_task(
    feed: Option<broadcast::Receiver<StoreWrite>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(mut feed) = feed else {
        let _ = shutdown_rx.recv().await;
        return Ok(());
    };

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            write = feed.recv() => match write {
                Ok(write) => tracing::info!(
                    key = %write.key,
                    as_of = %write.as_of,
                    digest = %write.digest,
                    "object write observed"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "write feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Task {
            task,
            message: format!("join failure: {err}"),
        }),
    }
}

/// Install the global subscriber on stderr: `RUST_LOG` filter (falling back
/// to `default_directive`), JSON lines when `LOG_FORMAT=json`.
pub fn init_tracing(default_directive: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.with_target(false).try_init()
    };
}
