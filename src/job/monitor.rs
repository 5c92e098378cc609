//! Per-job payment watcher
//!
//! Polls the settlement service until the payment resolves, the deadline
//! passes, or the orchestrator cancels the watch. Exactly one terminal
//! outcome is returned per invocation.

use crate::config::MonitorConfig;
use crate::gateways::{PaymentStatus, SettlementService};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;

/// Terminal outcome of one payment watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Settlement service reported the payment confirmed
    Confirmed,
    /// Settlement service reported the payment declined or cancelled
    Declined,
    /// The deadline passed without confirmation
    Expired,
    /// Polling gave up; treated like a decline so the job cannot hang
    Exhausted(String),
    /// The orchestrator cancelled the watch (job already terminal)
    Cancelled,
}

/// Watch a payment until it resolves
///
/// Transient poll failures (including per-poll timeouts) are retried with
/// exponential backoff up to `cfg.max_retries`; they never change job state.
/// A cancel signal wins over any in-flight poll or sleep.
pub async fn watch_payment(
    settlement: Arc<dyn SettlementService>,
    payment_ref: &str,
    pay_by: DateTime<Utc>,
    cfg: &MonitorConfig,
    mut cancel: watch::Receiver<bool>,
) -> PaymentOutcome {
    let poll_timeout = Duration::from_millis(cfg.poll_timeout_ms);
    let mut retries: u32 = 0;

    loop {
        if Utc::now() >= pay_by {
            tracing::info!("Payment {} deadline passed, expiring", payment_ref);
            return PaymentOutcome::Expired;
        }

        let poll = time::timeout(poll_timeout, settlement.poll_status(payment_ref));
        let delay = tokio::select! {
            result = poll => match result {
                Ok(Ok(PaymentStatus::Confirmed)) => {
                    tracing::info!("Payment {} confirmed", payment_ref);
                    return PaymentOutcome::Confirmed;
                }
                Ok(Ok(PaymentStatus::Declined)) => {
                    tracing::info!("Payment {} declined", payment_ref);
                    return PaymentOutcome::Declined;
                }
                Ok(Ok(PaymentStatus::Pending)) => {
                    tracing::debug!("Payment {} still pending", payment_ref);
                    retries = 0;
                    Duration::from_millis(cfg.poll_interval_ms)
                }
                Ok(Err(e)) if e.is_transient() => {
                    retries += 1;
                    if retries > cfg.max_retries {
                        return PaymentOutcome::Exhausted(format!(
                            "payment polling exhausted after {} transient failures: {}",
                            retries, e
                        ));
                    }
                    tracing::warn!(
                        "Transient poll failure for payment {} (retry {}/{}): {}",
                        payment_ref,
                        retries,
                        cfg.max_retries,
                        e
                    );
                    backoff_delay(cfg.backoff_base_ms, retries)
                }
                Ok(Err(e)) => {
                    tracing::error!("Settlement service failed for payment {}: {}", payment_ref, e);
                    return PaymentOutcome::Exhausted(format!("settlement service failure: {}", e));
                }
                Err(_) => {
                    retries += 1;
                    if retries > cfg.max_retries {
                        return PaymentOutcome::Exhausted(format!(
                            "payment polling exhausted after {} timed-out polls",
                            retries
                        ));
                    }
                    tracing::warn!(
                        "Poll for payment {} timed out after {:?} (retry {}/{})",
                        payment_ref,
                        poll_timeout,
                        retries,
                        cfg.max_retries
                    );
                    backoff_delay(cfg.backoff_base_ms, retries)
                }
            },
            _ = cancel.changed() => {
                tracing::debug!("Payment watch for {} cancelled", payment_ref);
                return PaymentOutcome::Cancelled;
            }
        };

        // Never sleep past the deadline
        let until_deadline = (pay_by - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = time::sleep(delay.min(until_deadline)) => {}
            _ = cancel.changed() => return PaymentOutcome::Cancelled,
        }
    }
}

fn backoff_delay(base_ms: u64, retries: u32) -> Duration {
    // Exponential with a hard cap so the delay stays bounded
    let exponent = (retries.saturating_sub(1)).min(6);
    Duration::from_millis(base_ms.saturating_mul(1 << exponent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::stubs::{PollScript, ScriptedSettlement};

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            poll_interval_ms: 10,
            poll_timeout_ms: 50,
            max_retries: 2,
            backoff_base_ms: 5,
        }
    }

    fn cancel_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    async fn watch(
        settlement: Arc<ScriptedSettlement>,
        cfg: &MonitorConfig,
        ttl_ms: i64,
    ) -> PaymentOutcome {
        let (_tx, rx) = cancel_pair();
        let pay_by = Utc::now() + chrono::Duration::milliseconds(ttl_ms);
        watch_payment(settlement, "pay-ref", pay_by, cfg, rx).await
    }

    #[tokio::test]
    async fn test_confirmed_after_pending() {
        let settlement = Arc::new(ScriptedSettlement::new(60_000));
        settlement.enqueue(PollScript::Status(PaymentStatus::Pending));
        settlement.enqueue(PollScript::Status(PaymentStatus::Confirmed));

        let outcome = watch(settlement.clone(), &fast_config(), 60_000).await;
        assert_eq!(outcome, PaymentOutcome::Confirmed);
        assert_eq!(settlement.polls(), 2);
    }

    #[tokio::test]
    async fn test_declined_terminates() {
        let settlement = Arc::new(ScriptedSettlement::new(60_000));
        settlement.enqueue(PollScript::Status(PaymentStatus::Declined));

        let outcome = watch(settlement, &fast_config(), 60_000).await;
        assert_eq!(outcome, PaymentOutcome::Declined);
    }

    #[tokio::test]
    async fn test_past_deadline_expires_without_polling() {
        let settlement = Arc::new(ScriptedSettlement::new(60_000));

        let outcome = watch(settlement.clone(), &fast_config(), -1).await;
        assert_eq!(outcome, PaymentOutcome::Expired);
        assert_eq!(settlement.polls(), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let settlement = Arc::new(ScriptedSettlement::new(60_000));
        settlement.enqueue(PollScript::Transient);
        settlement.enqueue(PollScript::Transient);
        settlement.enqueue(PollScript::Status(PaymentStatus::Confirmed));

        let outcome = watch(settlement, &fast_config(), 60_000).await;
        assert_eq!(outcome, PaymentOutcome::Confirmed);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_retries() {
        let settlement = Arc::new(ScriptedSettlement::new(60_000));
        settlement.set_resting(PollScript::Transient);

        let outcome = watch(settlement, &fast_config(), 60_000).await;
        assert!(matches!(outcome, PaymentOutcome::Exhausted(_)));
    }

    #[tokio::test]
    async fn test_hard_failure_terminates_immediately() {
        let settlement = Arc::new(ScriptedSettlement::new(60_000));
        settlement.enqueue(PollScript::Unavailable);

        let outcome = watch(settlement.clone(), &fast_config(), 60_000).await;
        assert!(matches!(outcome, PaymentOutcome::Exhausted(_)));
        assert_eq!(settlement.polls(), 1);
    }

    #[tokio::test]
    async fn test_poll_timeout_counts_as_transient() {
        let settlement = Arc::new(ScriptedSettlement::new(60_000));
        settlement.set_resting(PollScript::Hang);

        let cfg = MonitorConfig {
            poll_timeout_ms: 20,
            ..fast_config()
        };
        let outcome = watch(settlement, &cfg, 60_000).await;
        assert!(matches!(outcome, PaymentOutcome::Exhausted(_)));
    }

    #[tokio::test]
    async fn test_cancel_wins_over_pending_poll() {
        let settlement = Arc::new(ScriptedSettlement::new(60_000));
        settlement.set_resting(PollScript::Hang);

        let (tx, rx) = cancel_pair();
        let cfg = MonitorConfig {
            poll_timeout_ms: 10_000,
            ..fast_config()
        };
        let pay_by = Utc::now() + chrono::Duration::milliseconds(60_000);

        let handle = tokio::spawn(async move {
            watch_payment(settlement, "pay-ref", pay_by, &cfg, rx).await
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), PaymentOutcome::Cancelled);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff_delay(10, 1), Duration::from_millis(10));
        assert_eq!(backoff_delay(10, 2), Duration::from_millis(20));
        assert_eq!(backoff_delay(10, 4), Duration::from_millis(80));
        // Capped exponent
        assert_eq!(backoff_delay(10, 40), Duration::from_millis(640));
    }
}
