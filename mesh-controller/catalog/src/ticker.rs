use crate::metrics::{CatalogMetrics, TickerMetrics};
use mesh_controller_core::{bus::Subscription, Kind, MeshSettings, Message};
use tokio::{
    sync::{mpsc, watch},
    time::{self, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// The shortest resync interval the ticker accepts.
pub const MIN_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Periodically asks every connected proxy to resync.
///
/// The interval follows the live mesh settings. Changing it replaces the
/// running tick task; an interval shorter than the configured minimum is
/// rejected and the current tick task keeps running.
#[derive(Debug)]
pub struct Ticker {
    settings: watch::Receiver<MeshSettings>,
    min_interval: Duration,
    tx: mpsc::UnboundedSender<Message>,
    metrics: TickerMetrics,
}

#[derive(Debug)]
struct Running {
    interval: Duration,
    cancel: CancellationToken,
}

// === impl Ticker ===

impl Ticker {
    /// Returns the ticker and the stream of resync messages it produces.
    pub fn new(
        settings: watch::Receiver<MeshSettings>,
        min_interval: Duration,
        metrics: &CatalogMetrics,
    ) -> (Self, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ticker = Self {
            settings,
            min_interval,
            tx,
            metrics: metrics.ticker.clone(),
        };
        (ticker, rx)
    }

    /// Runs until shutdown is signaled or the settings sender is dropped.
    pub async fn run(mut self, shutdown: drain::Watch) {
        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);

        let mut running: Option<Running> = None;
        self.settings.mark_changed();
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::debug!("shutdown");
                    break;
                }

                res = self.settings.changed() => {
                    if res.is_err() {
                        tracing::debug!("settings closed");
                        break;
                    }
                    let interval = self.settings.borrow_and_update().config_resync_interval;
                    running = self.reconcile(running, interval);
                }
            }
        }

        if let Some(running) = running {
            running.cancel.cancel();
        }
    }

    fn reconcile(&self, running: Option<Running>, interval: Option<Duration>) -> Option<Running> {
        let Some(interval) = interval else {
            if let Some(running) = running {
                tracing::info!("stopping resync ticker");
                running.cancel.cancel();
            }
            return None;
        };

        if interval < self.min_interval {
            tracing::warn!(
                ?interval,
                min = ?self.min_interval,
                "resync interval is too short, ticker will not be updated"
            );
            self.metrics.invalid_intervals.inc();
            return running;
        }

        if let Some(running) = running {
            if running.interval == interval {
                return Some(running);
            }
            running.cancel.cancel();
        }

        tracing::info!(?interval, "starting resync ticker");
        let cancel = CancellationToken::new();
        tokio::spawn(tick(
            interval,
            self.tx.clone(),
            self.metrics.clone(),
            cancel.clone(),
        ));
        Some(Running { interval, cancel })
    }
}

async fn tick(
    interval: Duration,
    tx: mpsc::UnboundedSender<Message>,
    metrics: TickerMetrics,
    cancel: CancellationToken,
) {
    let mut ticks = time::interval_at(time::Instant::now() + interval, interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticks.tick() => {
                tracing::debug!("resyncing proxies");
                metrics.ticks.inc();
                if tx.send(Message::new(Kind::ProxyResync)).is_err() {
                    return;
                }
            }
        }
    }
}
