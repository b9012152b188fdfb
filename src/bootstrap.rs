//! Process startup: wait for the control database, reconcile it, then keep
//! retrying tenant databases in the background until the wait window closes.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::database::manager::DatabaseManager;
use crate::reconcile::{self, ReconcileError, ReconcileTarget};

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(5);
const GROWTH: f64 = 1.5;

/// Capped exponential backoff bounded by a deadline
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    deadline: Instant,
}

impl Backoff {
    pub fn new(window: Duration) -> Self {
        Self {
            delay: INITIAL_DELAY,
            deadline: Instant::now() + window,
        }
    }

    /// Next sleep, or `None` once the window has closed
    pub fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.deadline.checked_duration_since(Instant::now())?;
        if remaining.is_zero() {
            return None;
        }
        let delay = self.delay.min(remaining);
        self.delay = self.delay.mul_f64(GROWTH).min(MAX_DELAY);
        Some(delay)
    }
}

/// Block until the control database answers and has been reconciled
pub async fn prepare_control(backoff: &mut Backoff) -> Result<(), ReconcileError> {
    loop {
        let attempt = match DatabaseManager::health_check().await {
            Ok(()) => reconcile::reconcile_target(&ReconcileTarget::Control).await,
            Err(e) => Err(e.into()),
        };

        match attempt {
            Ok(()) => {
                info!("Control database ready");
                return Ok(());
            }
            Err(e) => match backoff.next_delay() {
                Some(delay) => {
                    warn!("Control database not ready ({}); retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
        }
    }
}

/// Best-effort tenant reconciliation. Failures are retried until the window
/// closes; whatever still fails is left for request-time reconciliation.
pub async fn reconcile_tenants(mut backoff: Backoff) {
    loop {
        let failed = match reconcile::reconcile_tenants_best_effort().await {
            Ok(0) => {
                info!("All tenant databases reconciled");
                return;
            }
            Ok(failed) => format!("{} tenant(s) failed", failed),
            Err(e) => e.to_string(),
        };

        match backoff.next_delay() {
            Some(delay) => {
                warn!("Tenant reconciliation incomplete ({}); retrying in {:?}", failed, delay);
                tokio::time::sleep(delay).await;
            }
            None => {
                warn!("Giving up on startup tenant reconciliation: {}", failed);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_by_half_and_cap_at_five_seconds() {
        let mut backoff = Backoff::new(Duration::from_secs(3600));
        let delays: Vec<u128> = (0..6)
            .map(|_| backoff.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 1500, 2250, 3375, 5000, 5000]);
    }

    #[test]
    fn closed_window_stops_retrying() {
        let mut backoff = Backoff::new(Duration::ZERO);
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn last_delay_is_clipped_to_the_window() {
        let mut backoff = Backoff::new(Duration::from_millis(300));
        let delay = backoff.next_delay().unwrap();
        assert!(delay <= Duration::from_millis(300));
    }
}
