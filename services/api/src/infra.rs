use chrono::{DateTime, Utc};
use gigflow::workflows::gigs::{DispatchError, Notification, Notifier};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Scheduled notifications sent per dispatcher tick.
pub(crate) const DISPATCH_BATCH_SIZE: usize = 50;
const MAX_DELIVERY_ATTEMPTS: u32 = 3;
/// Recent deliveries kept for inspection; older entries are evicted.
pub(crate) const DELIVERED_LOG_CAPACITY: usize = 256;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Last hop to the user's device or inbox.
pub(crate) trait Delivery: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), DispatchError>;
}

/// Writes notifications to the log; stands in for the push and e-mail gateways.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LogDelivery;

impl Delivery for LogDelivery {
    fn deliver(&self, notification: &Notification) -> Result<(), DispatchError> {
        info!(
            user_id = %notification.user_id,
            kind = ?notification.kind,
            job_id = notification.related_job_id.as_ref().map(|id| id.0.as_str()),
            title = %notification.title,
            "notification delivered"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Queued {
    notification: Notification,
    scheduled_at: DateTime<Utc>,
    attempts: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DispatchSummary {
    pub(crate) sent: usize,
    pub(crate) failed: usize,
    pub(crate) dropped: usize,
}

/// Notifier that delivers immediate notifications straight away and parks scheduled ones
/// until [`InMemoryOutbox::dispatch_due`] picks them up.
#[derive(Clone)]
pub(crate) struct InMemoryOutbox {
    delivery: Arc<dyn Delivery>,
    queue: Arc<Mutex<Vec<Queued>>>,
    delivered: Arc<Mutex<VecDeque<Notification>>>,
}

impl InMemoryOutbox {
    pub(crate) fn new(delivery: Arc<dyn Delivery>) -> Self {
        Self {
            delivery,
            queue: Arc::new(Mutex::new(Vec::new())),
            delivered: Arc::new(Mutex::new(VecDeque::with_capacity(DELIVERED_LOG_CAPACITY))),
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.lock().expect("outbox mutex poisoned").len()
    }

    /// Most recent deliveries, oldest first, up to [`DELIVERED_LOG_CAPACITY`].
    pub(crate) fn delivered(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .expect("outbox mutex poisoned")
            .iter()
            .cloned()
            .collect()
    }

    fn send(&self, notification: Notification) -> Result<(), DispatchError> {
        self.delivery.deliver(&notification)?;
        let mut delivered = self.delivered.lock().expect("outbox mutex poisoned");
        if delivered.len() == DELIVERED_LOG_CAPACITY {
            delivered.pop_front();
        }
        delivered.push_back(notification);
        Ok(())
    }

    /// Sends up to one batch of notifications whose time has come, earliest first.
    /// Failed items go back on the queue until they run out of attempts.
    pub(crate) fn dispatch_due(&self, now: DateTime<Utc>) -> DispatchSummary {
        let batch = {
            let mut queue = self.queue.lock().expect("outbox mutex poisoned");
            queue.sort_by_key(|queued| queued.scheduled_at);
            let due = queue
                .iter()
                .take_while(|queued| queued.scheduled_at <= now)
                .count()
                .min(DISPATCH_BATCH_SIZE);
            queue.drain(..due).collect::<Vec<_>>()
        };

        let mut summary = DispatchSummary::default();
        let mut retry = Vec::new();
        for mut queued in batch {
            queued.attempts += 1;
            match self.send(queued.notification.clone()) {
                Ok(()) => summary.sent += 1,
                Err(err) if queued.attempts < MAX_DELIVERY_ATTEMPTS => {
                    warn!(
                        user_id = %queued.notification.user_id,
                        kind = ?queued.notification.kind,
                        attempt = queued.attempts,
                        error = %err,
                        "scheduled notification failed, will retry"
                    );
                    summary.failed += 1;
                    retry.push(queued);
                }
                Err(err) => {
                    error!(
                        user_id = %queued.notification.user_id,
                        kind = ?queued.notification.kind,
                        error = %err,
                        "scheduled notification dropped after repeated failures"
                    );
                    summary.dropped += 1;
                }
            }
        }

        if !retry.is_empty() {
            self.queue
                .lock()
                .expect("outbox mutex poisoned")
                .extend(retry);
        }
        summary
    }
}

impl Notifier for InMemoryOutbox {
    fn notify_now(&self, notification: Notification) -> Result<(), DispatchError> {
        self.send(notification)
    }

    fn schedule(
        &self,
        notification: Notification,
        scheduled_at: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        self.queue
            .lock()
            .expect("outbox mutex poisoned")
            .push(Queued {
                notification,
                scheduled_at,
                attempts: 0,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use gigflow::workflows::gigs::{JobId, NotificationKind, UserId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, 6, 0, 0).unwrap()
    }

    fn reminder(user: &str) -> Notification {
        Notification {
            user_id: UserId::from(user),
            kind: NotificationKind::JobReminder2h,
            title: "Upcoming job".to_string(),
            message: "\"Stocktake\" starts in 2 hours".to_string(),
            related_job_id: Some(JobId::from("job-000001")),
        }
    }

    /// Fails the first `failures` deliveries.
    struct FlakyDelivery {
        failures: AtomicUsize,
    }

    impl Delivery for FlakyDelivery {
        fn deliver(&self, _notification: &Notification) -> Result<(), DispatchError> {
            let fail = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if fail {
                Err(DispatchError::Transport("gateway timeout".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn only_due_notifications_are_sent() {
        let outbox = InMemoryOutbox::new(Arc::new(LogDelivery));
        outbox
            .schedule(reminder("wrk-early"), now() - Duration::minutes(5))
            .unwrap();
        outbox
            .schedule(reminder("wrk-late"), now() + Duration::hours(1))
            .unwrap();

        let summary = outbox.dispatch_due(now());
        assert_eq!(summary.sent, 1);
        assert_eq!(outbox.pending(), 1);
        assert_eq!(outbox.delivered()[0].user_id, UserId::from("wrk-early"));
    }

    #[test]
    fn dispatch_is_capped_per_batch() {
        let outbox = InMemoryOutbox::new(Arc::new(LogDelivery));
        for n in 0..(DISPATCH_BATCH_SIZE + 7) {
            outbox
                .schedule(
                    reminder(&format!("wrk-{n}")),
                    now() - Duration::minutes(n as i64),
                )
                .unwrap();
        }

        assert_eq!(outbox.dispatch_due(now()).sent, DISPATCH_BATCH_SIZE);
        assert_eq!(outbox.pending(), 7);
        assert_eq!(outbox.dispatch_due(now()).sent, 7);
        assert_eq!(outbox.pending(), 0);
    }

    #[test]
    fn delivery_log_keeps_only_recent_notifications() {
        let outbox = InMemoryOutbox::new(Arc::new(LogDelivery));
        for n in 0..(DELIVERED_LOG_CAPACITY + 10) {
            outbox.notify_now(reminder(&format!("wrk-{n}"))).unwrap();
        }

        let delivered = outbox.delivered();
        assert_eq!(delivered.len(), DELIVERED_LOG_CAPACITY);
        assert_eq!(delivered[0].user_id, UserId::from("wrk-10"));
        assert_eq!(
            delivered[DELIVERED_LOG_CAPACITY - 1].user_id,
            UserId::from(format!("wrk-{}", DELIVERED_LOG_CAPACITY + 9).as_str())
        );
    }

    #[test]
    fn failed_items_are_retried_then_dropped() {
        let outbox = InMemoryOutbox::new(Arc::new(FlakyDelivery {
            failures: AtomicUsize::new(usize::MAX),
        }));
        outbox.schedule(reminder("wrk-offline"), now()).unwrap();

        let first = outbox.dispatch_due(now());
        assert_eq!(first.failed, 1);
        assert_eq!(outbox.pending(), 1);
        outbox.dispatch_due(now());
        let last = outbox.dispatch_due(now());
        assert_eq!(last.dropped, 1);
        assert_eq!(outbox.pending(), 0);
        assert!(outbox.delivered().is_empty());
    }

    #[test]
    fn immediate_notifications_surface_delivery_errors() {
        let outbox = InMemoryOutbox::new(Arc::new(FlakyDelivery {
            failures: AtomicUsize::new(1),
        }));
        assert!(outbox.notify_now(reminder("wrk-now")).is_err());
        assert!(outbox.notify_now(reminder("wrk-now")).is_ok());
        assert_eq!(outbox.delivered().len(), 1);
    }
}
