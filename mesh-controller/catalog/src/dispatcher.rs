use crate::metrics::{CatalogMetrics, Deadline, DispatcherMetrics};
use mesh_controller_core::{bus::Subscription, EventBus, Kind, Message};
use tokio::time::{self, Duration, Instant};

/// How long the dispatcher waits for quiet after a change before
/// broadcasting.
pub const MAX_GRACE_DEADLINE: Duration = Duration::from_secs(3);

/// The longest a change may wait for a broadcast while changes keep
/// arriving.
pub const MAX_BROADCAST_DEADLINE: Duration = Duration::from_secs(15);

/// Coalesces resource changes into proxy broadcasts.
///
/// The first change after a broadcast arms two deadlines: a moving deadline
/// that is pushed back by every later change, and a max deadline that is
/// not. Whichever expires first publishes a single
/// [`Kind::ProxyBroadcast`].
#[derive(Debug)]
pub struct Dispatcher {
    bus: EventBus,
    events: Subscription,
    grace: Duration,
    max: Duration,
    metrics: DispatcherMetrics,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Scheduled {
    moving: Instant,
    max: Instant,
}

// === impl Dispatcher ===

impl Dispatcher {
    /// Subscribes to every resource change and to explicit broadcast
    /// requests.
    pub fn new(bus: EventBus, metrics: &CatalogMetrics) -> Self {
        let events = bus.subscribe(
            Kind::RESOURCE_CHANGES
                .into_iter()
                .chain(Some(Kind::ScheduleProxyBroadcast)),
        );
        Self {
            bus,
            events,
            grace: MAX_GRACE_DEADLINE,
            max: MAX_BROADCAST_DEADLINE,
            metrics: metrics.dispatcher.clone(),
        }
    }

    pub fn with_deadlines(mut self, grace: Duration, max: Duration) -> Self {
        self.grace = grace;
        self.max = max;
        self
    }

    /// Runs until shutdown is signaled or the bus is closed.
    pub async fn run(mut self, shutdown: drain::Watch) {
        let shutdown = shutdown.signaled();
        tokio::pin!(shutdown);

        let mut scheduled: Option<Scheduled> = None;
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::debug!("shutdown");
                    return;
                }

                deadline = expiry(scheduled) => {
                    tracing::debug!(?deadline, "broadcasting to proxies");
                    self.metrics.broadcast(deadline);
                    self.bus.publish(Message::new(Kind::ProxyBroadcast));
                    scheduled = None;
                }

                msg = self.events.recv() => match msg {
                    Some(msg) => scheduled = self.schedule(scheduled, &msg),
                    None => {
                        tracing::debug!("event bus closed");
                        return;
                    }
                },
            }
        }
    }

    fn schedule(&self, scheduled: Option<Scheduled>, msg: &Message) -> Option<Scheduled> {
        if !msg.is_delta() {
            tracing::trace!(kind = %msg.kind, "ignoring unchanged resource");
            self.metrics.ignored();
            return scheduled;
        }

        tracing::trace!(kind = %msg.kind, "scheduling broadcast");
        let now = Instant::now();
        Some(match scheduled {
            None => Scheduled {
                moving: now + self.grace,
                max: now + self.max,
            },
            Some(Scheduled { max, .. }) => Scheduled {
                moving: now + self.grace,
                max,
            },
        })
    }
}

/// Completes when the earlier of the scheduled deadlines passes. Never
/// completes if no broadcast is scheduled.
async fn expiry(scheduled: Option<Scheduled>) -> Deadline {
    let Some(Scheduled { moving, max }) = scheduled else {
        return std::future::pending().await;
    };
    if moving < max {
        time::sleep_until(moving).await;
        Deadline::Moving
    } else {
        time::sleep_until(max).await;
        Deadline::Max
    }
}
