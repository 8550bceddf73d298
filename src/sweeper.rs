use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use hourglass_rs::SafeTimeProvider;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::config::SweeperConfig;
use crate::engine::RentalEngine;
use crate::errors::{RentalError, Result};
use crate::reservation::{LateFeePolicy, Reservation, TransitionRequest};
use crate::store::{LateReturnNotifier, ReservationFilter};
use crate::types::ReservationStatus;

/// counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub scanned: usize,
    pub marked_late: usize,
    pub already_late: usize,
    /// status moved on (returned, say) between scan and transition
    pub skipped: usize,
    pub not_due: usize,
    pub failed: usize,
    pub notifications_queued: usize,
    pub notifications_dropped: usize,
}

enum SweepItem {
    NotDue,
    MarkedLate { queued: bool },
    AlreadyLate,
    Skipped,
    Failed,
}

impl SweepSummary {
    fn absorb(&mut self, item: SweepItem) {
        match item {
            SweepItem::NotDue => self.not_due += 1,
            SweepItem::MarkedLate { queued } => {
                self.marked_late += 1;
                if queued {
                    self.notifications_queued += 1;
                } else {
                    self.notifications_dropped += 1;
                }
            }
            SweepItem::AlreadyLate => self.already_late += 1,
            SweepItem::Skipped => self.skipped += 1,
            SweepItem::Failed => self.failed += 1,
        }
    }
}

/// non-blocking handle onto the notification queue
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Reservation>,
}

impl NotificationDispatcher {
    /// enqueue without waiting; false when the queue is full or closed
    pub fn dispatch(&self, reservation: Reservation) -> bool {
        match self.tx.try_send(reservation) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(r)) => {
                tracing::warn!(reservation_id = %r.id, "notification queue full, dropping late notice");
                false
            }
            Err(mpsc::error::TrySendError::Closed(r)) => {
                tracing::warn!(reservation_id = %r.id, "notification worker gone, dropping late notice");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: usize,
    pub failed: usize,
    pub attempts: usize,
}

struct Delivery {
    attempts: usize,
    delivered: bool,
}

/// drains the notification queue with timeout and exponential backoff
pub struct NotificationWorker {
    rx: mpsc::Receiver<Reservation>,
    notifier: Arc<dyn LateReturnNotifier>,
    config: SweeperConfig,
}

impl NotificationWorker {
    /// runs until every dispatcher is dropped and the queue is empty
    pub async fn run(self) -> DeliveryStats {
        let NotificationWorker {
            rx,
            notifier,
            config,
        } = self;
        tracing::info!(concurrency = config.concurrency, "notification worker started");

        let queue = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|reservation| (reservation, rx))
        });
        let stats = queue
            .map(|reservation| {
                let notifier = notifier.clone();
                let config = config.clone();
                async move { deliver(notifier.as_ref(), &reservation, &config).await }
            })
            .buffer_unordered(config.concurrency.max(1))
            .fold(DeliveryStats::default(), |mut stats, delivery| async move {
                stats.attempts += delivery.attempts;
                if delivery.delivered {
                    stats.delivered += 1;
                } else {
                    stats.failed += 1;
                }
                stats
            })
            .await;

        tracing::info!(
            delivered = stats.delivered,
            failed = stats.failed,
            attempts = stats.attempts,
            "notification worker stopped"
        );
        stats
    }
}

async fn deliver(
    notifier: &dyn LateReturnNotifier,
    reservation: &Reservation,
    config: &SweeperConfig,
) -> Delivery {
    let max_attempts = config.notify_max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match tokio::time::timeout(config.notify_timeout(), notifier.notify_late_return(reservation)).await {
            Ok(Ok(())) => {
                tracing::debug!(reservation_id = %reservation.id, attempt, "late notice delivered");
                return Delivery {
                    attempts: attempt as usize,
                    delivered: true,
                };
            }
            Ok(Err(e)) => {
                tracing::warn!(reservation_id = %reservation.id, attempt, error = %e, "late notice failed");
            }
            Err(_) => {
                tracing::warn!(reservation_id = %reservation.id, attempt, "late notice timed out");
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(config.backoff_for(attempt)).await;
        }
    }

    tracing::error!(reservation_id = %reservation.id, attempts = max_attempts, "giving up on late notice");
    Delivery {
        attempts: max_attempts as usize,
        delivered: false,
    }
}

/// marks overdue rentals late and queues a notice for each
pub struct LateReturnSweeper {
    engine: Arc<RentalEngine>,
    dispatcher: NotificationDispatcher,
    config: SweeperConfig,
}

impl LateReturnSweeper {
    /// the worker must be spawned by the caller for notices to go out
    pub fn new(engine: Arc<RentalEngine>, notifier: Arc<dyn LateReturnNotifier>) -> (Self, NotificationWorker) {
        let config = engine.config().sweeper.clone();
        let (tx, rx) = mpsc::channel(config.notify_queue_capacity.max(1));
        let worker = NotificationWorker {
            rx,
            notifier,
            config: config.clone(),
        };
        let sweeper = Self {
            engine,
            dispatcher: NotificationDispatcher { tx },
            config,
        };
        (sweeper, worker)
    }

    pub fn dispatcher(&self) -> NotificationDispatcher {
        self.dispatcher.clone()
    }

    pub fn sweep(&self, time: &SafeTimeProvider) -> impl Future<Output = Result<SweepSummary>> + '_ {
        let now = time.now();
        self.sweep_at(now)
    }

    /// one pass over picked-up and extended reservations
    ///
    /// Per-item failures are counted, not returned; only the scan itself can fail.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let engine = self.engine.clone();
        let candidates = tokio::task::spawn_blocking(move || -> Result<Vec<Reservation>> {
            let mut out =
                engine.list_reservations(&ReservationFilter::with_status(ReservationStatus::PickedUp))?;
            out.extend(
                engine.list_reservations(&ReservationFilter::with_status(ReservationStatus::Extended))?,
            );
            Ok(out)
        })
        .await
        .map_err(|e| RentalError::Storage {
            message: format!("sweep scan task failed: {e}"),
        })??;

        let mut summary = SweepSummary {
            scanned: candidates.len(),
            ..SweepSummary::default()
        };
        let policy = LateFeePolicy::from(&self.engine.config().lifecycle);

        let items: Vec<SweepItem> = stream::iter(candidates)
            .map(|reservation| self.process(reservation, policy, now))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        for item in items {
            summary.absorb(item);
        }

        if summary.failed > 0 {
            tracing::warn!(?summary, "late-return sweep finished with failures");
        } else {
            tracing::info!(?summary, "late-return sweep finished");
        }
        Ok(summary)
    }

    async fn process(&self, reservation: Reservation, policy: LateFeePolicy, now: DateTime<Utc>) -> SweepItem {
        if reservation.status == ReservationStatus::Late {
            return SweepItem::AlreadyLate;
        }
        match policy.is_overdue(reservation.end_at, now) {
            Ok(true) => {}
            Ok(false) => return SweepItem::NotDue,
            Err(e) => {
                tracing::error!(reservation_id = %reservation.id, error = %e, "cannot compute grace period");
                return SweepItem::Failed;
            }
        }

        let engine = self.engine.clone();
        let id = reservation.id;
        let result =
            tokio::task::spawn_blocking(move || engine.transition_at(id, TransitionRequest::MarkLate, now)).await;

        match result {
            Ok(Ok(outcome)) if outcome.changed => {
                tracing::info!(
                    reservation_id = %id,
                    late_fee = %outcome.reservation.late_fee,
                    days_late = outcome.reservation.days_late,
                    "marked late"
                );
                SweepItem::MarkedLate {
                    queued: self.dispatcher.dispatch(outcome.reservation),
                }
            }
            Ok(Ok(_)) => SweepItem::AlreadyLate,
            Ok(Err(RentalError::InvalidTransition { from, .. })) => {
                tracing::debug!(reservation_id = %id, status = %from, "status changed since scan");
                SweepItem::Skipped
            }
            Ok(Err(e)) => {
                tracing::error!(reservation_id = %id, error = %e, "failed to mark late");
                SweepItem::Failed
            }
            Err(e) => {
                tracing::error!(reservation_id = %id, error = %e, "mark-late task panicked");
                SweepItem::Failed
            }
        }
    }

    /// sweep every interval until `shutdown` flips to true or its sender drops
    pub async fn run(&self, time: &SafeTimeProvider, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.config.interval_secs, "late-return sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(time).await {
                        tracing::error!(error = %e, "late-return sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("late-return sweeper stopped");
    }
}
