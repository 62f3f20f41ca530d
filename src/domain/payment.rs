//! Payment reconciliation: pending intents out, webhook confirmations in.
//!
//! An intent is created `pending` before the provider is called, and becomes `succeeded`
//! exactly once, in the same store step that credits its owner. Webhook handling never fails
//! towards the provider: every delivery resolves to a `WebhookOutcome`.

use crate::domain::error::{LedgerError, LedgerResult};
use crate::domain::model::{validate_amount, validate_id, PaymentIntent};
use crate::infra::provider::{PaymentProvider, RemoteIntentRequest};
use crate::storage::{SettleOutcome, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A provider's notification about one payment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookNotice {
    /// Our payment id, or the provider's own reference for it.
    pub payment_id: String,
    /// `None` when the provider sent something that is not an amount.
    pub reported_amount: Option<i64>,
    pub success: bool,
    /// The account the provider believes it is paying into, if it says.
    pub account_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Credited { payment_id: String, balance: i64 },
    AlreadyApplied { payment_id: String },
    Declined { payment_id: String },
    Anomaly { reason: String },
}

#[derive(Clone)]
pub struct PaymentReconciler {
    store: Arc<dyn Store>,
    provider: Arc<dyn PaymentProvider>,
    timeout: Duration,
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn PaymentProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            timeout,
        }
    }

    /// Persists a pending intent under a fresh payment id, then asks the provider for a
    /// payment link. A failed or timed-out call leaves the intent pending with no ledger
    /// effect; callers retry with a new intent.
    pub async fn create_intent(
        &self,
        user_id: &str,
        amount: i64,
        provider: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<PaymentIntent> {
        validate_id("user_id", user_id)?;
        validate_amount(amount)?;
        if !self.provider.supports(provider) {
            return Err(LedgerError::InvalidInput(format!(
                "unknown payment provider '{}'",
                provider
            )));
        }
        if self.store.get_account(user_id).await?.is_none() {
            return Err(LedgerError::NotFound(format!("account '{}'", user_id)));
        }

        let payment_id = Uuid::new_v4().to_string();
        let intent = PaymentIntent::pending(payment_id.clone(), user_id, amount, provider, now);
        self.store.insert_intent(&intent).await?;
        info!(payment_id = %payment_id, user_id, amount, provider, "payment intent created");

        let request = RemoteIntentRequest {
            provider,
            amount,
            user_id,
            idempotency_key: &payment_id,
        };
        let call = self.provider.create_remote_intent(&request);
        let remote = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(remote)) => remote,
            Ok(Err(e)) => {
                warn!(payment_id = %payment_id, provider, error = %e, "provider rejected intent");
                return Err(LedgerError::Upstream(format!("{:#}", e)));
            }
            Err(_) => {
                warn!(
                    payment_id = %payment_id,
                    provider,
                    timeout = ?self.timeout,
                    "provider call timed out"
                );
                return Err(LedgerError::Upstream(format!(
                    "provider '{}' did not answer within {:?}",
                    provider, self.timeout
                )));
            }
        };

        self.store
            .attach_provider_ref(
                &payment_id,
                &remote.provider_ref,
                &remote.redirect_url,
                Utc::now(),
            )
            .await
    }

    pub async fn get_intent(&self, payment_id: &str) -> LedgerResult<PaymentIntent> {
        self.store
            .find_intent(payment_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("payment intent '{}'", payment_id)))
    }

    /// Applies a provider notification. Always returns an outcome to acknowledge; anomalies
    /// are logged for manual reconciliation.
    pub async fn apply_webhook(
        &self,
        notice: &WebhookNotice,
        now: DateTime<Utc>,
    ) -> WebhookOutcome {
        match self.try_apply(notice, now).await {
            Ok(outcome) => outcome,
            Err(LedgerError::AnomalyAcknowledged(reason)) => {
                warn!(
                    payment_id = %notice.payment_id,
                    reason = %reason,
                    "webhook anomaly acknowledged"
                );
                WebhookOutcome::Anomaly { reason }
            }
            Err(e) => {
                error!(
                    payment_id = %notice.payment_id,
                    error = %e,
                    "webhook could not be applied; intent left pending"
                );
                WebhookOutcome::Anomaly {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_apply(
        &self,
        notice: &WebhookNotice,
        now: DateTime<Utc>,
    ) -> LedgerResult<WebhookOutcome> {
        if !notice.success {
            info!(payment_id = %notice.payment_id, "provider reported a failed payment");
            return Ok(WebhookOutcome::Declined {
                payment_id: notice.payment_id.clone(),
            });
        }
        let amount = match notice.reported_amount {
            Some(amount) if amount > 0 => amount,
            other => {
                return Err(LedgerError::AnomalyAcknowledged(format!(
                    "unusable reported amount {:?}",
                    other
                )))
            }
        };

        match self.store.settle_intent(&notice.payment_id, amount, now).await? {
            SettleOutcome::Credited { intent, balance } => {
                if intent.amount != amount {
                    warn!(
                        payment_id = %intent.payment_id,
                        requested = intent.amount,
                        reported = amount,
                        "reported amount differs from requested amount"
                    );
                }
                if let Some(account_ref) = &notice.account_ref {
                    if account_ref != &intent.user_id {
                        warn!(
                            payment_id = %intent.payment_id,
                            owner = %intent.user_id,
                            account_ref = %account_ref,
                            "provider account reference does not match intent owner"
                        );
                    }
                }
                info!(
                    payment_id = %intent.payment_id,
                    user_id = %intent.user_id,
                    amount,
                    balance,
                    "payment credited"
                );
                Ok(WebhookOutcome::Credited {
                    payment_id: intent.payment_id,
                    balance,
                })
            }
            SettleOutcome::AlreadySucceeded(intent) => {
                info!(payment_id = %intent.payment_id, "duplicate webhook ignored");
                Ok(WebhookOutcome::AlreadyApplied {
                    payment_id: intent.payment_id,
                })
            }
            SettleOutcome::UnknownIntent => Err(LedgerError::AnomalyAcknowledged(format!(
                "unknown payment '{}'",
                notice.payment_id
            ))),
            SettleOutcome::UnknownAccount(intent) => Err(LedgerError::AnomalyAcknowledged(format!(
                "payment '{}' belongs to unknown account '{}'",
                intent.payment_id, intent.user_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::IntentStatus;
    use crate::infra::provider::RemoteIntent;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Ok,
        Fail,
        Hang,
    }

    struct FakeProvider {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PaymentProvider for FakeProvider {
        fn supports(&self, provider: &str) -> bool {
            provider == "A"
        }

        async fn create_remote_intent(
            &self,
            request: &RemoteIntentRequest<'_>,
        ) -> anyhow::Result<RemoteIntent> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Ok => Ok(RemoteIntent {
                    provider_ref: format!("inv-{}", request.idempotency_key),
                    redirect_url: format!("https://pay.example/{}", request.idempotency_key),
                }),
                Behaviour::Fail => Err(anyhow::anyhow!("card network down")),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }
    }

    async fn reconciler(behaviour: Behaviour) -> (PaymentReconciler, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_account("u1", None, Utc::now()).await.unwrap();
        let reconciler = PaymentReconciler::new(
            store.clone(),
            FakeProvider::new(behaviour),
            Duration::from_millis(50),
        );
        (reconciler, store)
    }

    fn paid(payment_id: &str, amount: i64) -> WebhookNotice {
        WebhookNotice {
            payment_id: payment_id.to_string(),
            reported_amount: Some(amount),
            success: true,
            account_ref: Some("u1".into()),
        }
    }

    async fn balance(store: &MemoryStore, user: &str) -> i64 {
        store.get_account(user).await.unwrap().unwrap().balance
    }

    #[tokio::test]
    async fn duplicate_webhook_credits_once() {
        let (reconciler, store) = reconciler(Behaviour::Ok).await;
        let now = Utc::now();
        let intent = reconciler.create_intent("u1", 500, "A", now).await.unwrap();
        assert_eq!(intent.status, IntentStatus::Pending);
        assert!(intent.redirect_url.is_some());

        let first = reconciler.apply_webhook(&paid(&intent.payment_id, 500), now).await;
        assert_eq!(
            first,
            WebhookOutcome::Credited {
                payment_id: intent.payment_id.clone(),
                balance: 500
            }
        );
        let second = reconciler.apply_webhook(&paid(&intent.payment_id, 500), now).await;
        assert_eq!(
            second,
            WebhookOutcome::AlreadyApplied {
                payment_id: intent.payment_id.clone()
            }
        );

        assert_eq!(balance(&store, "u1").await, 500);
        let stored = reconciler.get_intent(&intent.payment_id).await.unwrap();
        assert_eq!(stored.status, IntentStatus::Succeeded);
    }

    #[tokio::test]
    async fn webhook_may_reference_the_provider_invoice() {
        let (reconciler, store) = reconciler(Behaviour::Ok).await;
        let now = Utc::now();
        let intent = reconciler.create_intent("u1", 300, "A", now).await.unwrap();
        let invoice = intent.provider_ref.clone().unwrap();

        let outcome = reconciler.apply_webhook(&paid(&invoice, 300), now).await;
        assert!(matches!(outcome, WebhookOutcome::Credited { balance: 300, .. }));
        assert_eq!(balance(&store, "u1").await, 300);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_deliveries_credit_once() {
        let (reconciler, store) = reconciler(Behaviour::Ok).await;
        let intent = reconciler.create_intent("u1", 250, "A", Utc::now()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let reconciler = reconciler.clone();
            let notice = paid(&intent.payment_id, 250);
            handles.push(tokio::spawn(async move {
                reconciler.apply_webhook(&notice, Utc::now()).await
            }));
        }
        let mut credited = 0;
        for h in handles {
            if matches!(h.await.unwrap(), WebhookOutcome::Credited { .. }) {
                credited += 1;
            }
        }
        assert_eq!(credited, 1);
        assert_eq!(balance(&store, "u1").await, 250);
    }

    #[tokio::test]
    async fn provider_failure_leaves_intent_pending_without_credit() {
        let (reconciler, store) = reconciler(Behaviour::Fail).await;
        let err = reconciler.create_intent("u1", 500, "A", Utc::now()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Upstream(_)));
        assert_eq!(balance(&store, "u1").await, 0);
    }

    #[tokio::test]
    async fn provider_timeout_is_upstream_error() {
        let (reconciler, _) = reconciler(Behaviour::Hang).await;
        let err = reconciler.create_intent("u1", 500, "A", Utc::now()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Upstream(ref m) if m.contains("did not answer")));
    }

    #[tokio::test]
    async fn intent_creation_validates_before_persisting() {
        let (reconciler, _) = reconciler(Behaviour::Ok).await;
        let now = Utc::now();
        assert!(matches!(
            reconciler.create_intent("u1", 0, "A", now).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            reconciler.create_intent("u1", 10, "B", now).await,
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            reconciler.create_intent("ghost", 10, "A", now).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn anomalies_are_acknowledged_without_credit() {
        let (reconciler, store) = reconciler(Behaviour::Ok).await;
        let now = Utc::now();

        let unknown = reconciler.apply_webhook(&paid("no-such-payment", 100), now).await;
        assert!(matches!(unknown, WebhookOutcome::Anomaly { .. }));

        // Intent whose owner never registered.
        let orphan = PaymentIntent::pending("orphan".into(), "ghost", 100, "A", now);
        store.insert_intent(&orphan).await.unwrap();
        let outcome = reconciler.apply_webhook(&paid("orphan", 100), now).await;
        assert!(matches!(outcome, WebhookOutcome::Anomaly { .. }));
        assert_eq!(
            reconciler.get_intent("orphan").await.unwrap().status,
            IntentStatus::Pending
        );

        let intent = reconciler.create_intent("u1", 100, "A", now).await.unwrap();
        let mut bad_amount = paid(&intent.payment_id, 0);
        bad_amount.reported_amount = None;
        assert!(matches!(
            reconciler.apply_webhook(&bad_amount, now).await,
            WebhookOutcome::Anomaly { .. }
        ));
        assert_eq!(balance(&store, "u1").await, 0);
    }

    #[tokio::test]
    async fn failed_payment_is_declined_and_stays_pending() {
        let (reconciler, store) = reconciler(Behaviour::Ok).await;
        let now = Utc::now();
        let intent = reconciler.create_intent("u1", 100, "A", now).await.unwrap();
        let mut notice = paid(&intent.payment_id, 100);
        notice.success = false;

        assert!(matches!(
            reconciler.apply_webhook(&notice, now).await,
            WebhookOutcome::Declined { .. }
        ));
        assert_eq!(balance(&store, "u1").await, 0);

        // A later success still applies.
        notice.success = true;
        assert!(matches!(
            reconciler.apply_webhook(&notice, now).await,
            WebhookOutcome::Credited { balance: 100, .. }
        ));
    }
}
