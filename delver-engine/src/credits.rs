//! Credit admission controller
//!
//! Computes the cost of a research session from mutable pricing settings,
//! debits it before any work begins, and refunds the exact debited amount
//! when the session fails.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delver_core::{DelverError, DelverResult, ErrorContext, PricingConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{error, info};

/// Compute the session cost. Deterministic for fixed pricing settings.
pub fn compute_cost(pricing: &PricingConfig, depth: u32, breadth: u32) -> u32 {
    (pricing.base_credits
        + depth as f64 * pricing.depth_multiplier
        + breadth as f64 * pricing.breadth_multiplier)
        .ceil() as u32
}

/// A single usage or refund entry in the credit ledger. Refunds carry a
/// negative `credits_used`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub user_id: String,
    pub query: String,
    pub depth: u32,
    pub breadth: u32,
    pub credits_used: i64,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Credit ledger collaborator contract. The ledger owns the lock: the
/// balance check and decrement inside `debit` form one atomic transaction.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn get_balance(&self, user_id: &str) -> DelverResult<i64>;

    /// Atomically verify balance >= amount and decrement, recording the
    /// entry. Fails with `InsufficientCredits` and no mutation on shortfall.
    async fn debit(&self, user_id: &str, amount: u32, entry: LedgerEntry) -> DelverResult<()>;

    /// Credit the amount back, recording a refund entry
    async fn credit(&self, user_id: &str, amount: u32, entry: LedgerEntry) -> DelverResult<()>;
}

#[derive(Debug, Default)]
struct LedgerInner {
    balances: HashMap<String, i64>,
    entries: Vec<LedgerEntry>,
}

/// In-memory ledger for tests and the CLI's offline mode
#[derive(Debug, Default)]
pub struct InMemoryCreditLedger {
    inner: Mutex<LedgerInner>,
}

impl InMemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(user_id: &str, balance: i64) -> Self {
        let ledger = Self::new();
        ledger.set_balance(user_id, balance);
        ledger
    }

    pub fn set_balance(&self, user_id: &str, balance: i64) {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        inner.balances.insert(user_id.to_string(), balance);
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        inner.entries.clone()
    }
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn get_balance(&self, user_id: &str) -> DelverResult<i64> {
        let inner = self.inner.lock().expect("ledger lock poisoned");
        Ok(inner.balances.get(user_id).copied().unwrap_or(0))
    }

    async fn debit(&self, user_id: &str, amount: u32, entry: LedgerEntry) -> DelverResult<()> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        let balance = inner.balances.get(user_id).copied().unwrap_or(0);
        if balance < amount as i64 {
            return Err(DelverError::InsufficientCredits {
                required: amount,
                available: balance,
                context: ErrorContext::new("credit_ledger")
                    .with_operation("debit")
                    .with_metadata("user_id", user_id)
                    .with_suggestion("Top up credits or reduce depth/breadth"),
            });
        }
        inner
            .balances
            .insert(user_id.to_string(), balance - amount as i64);
        inner.entries.push(entry);
        Ok(())
    }

    async fn credit(&self, user_id: &str, amount: u32, entry: LedgerEntry) -> DelverResult<()> {
        let mut inner = self.inner.lock().expect("ledger lock poisoned");
        let balance = inner.balances.get(user_id).copied().unwrap_or(0);
        inner
            .balances
            .insert(user_id.to_string(), balance + amount as i64);
        inner.entries.push(entry);
        Ok(())
    }
}

/// Pre-flight admission gate and compensating-refund issuer
pub struct CreditController {
    ledger: Arc<dyn CreditLedger>,
    /// Mutable system-wide pricing; operators may change it while sessions
    /// run, which is why refunds use the debit-time cost snapshot
    pricing: Arc<RwLock<PricingConfig>>,
}

impl CreditController {
    pub fn new(ledger: Arc<dyn CreditLedger>, pricing: Arc<RwLock<PricingConfig>>) -> Self {
        Self { ledger, pricing }
    }

    /// Current cost for the given depth/breadth under the pricing settings
    /// in effect right now
    pub fn current_cost(&self, depth: u32, breadth: u32) -> u32 {
        let pricing = self.pricing.read().expect("pricing lock poisoned");
        compute_cost(&pricing, depth, breadth)
    }

    /// Verify the user can afford the session and debit the cost. The
    /// returned cost snapshot must be passed to `refund` on failure.
    pub async fn check_and_reserve(
        &self,
        user_id: &str,
        query: &str,
        depth: u32,
        breadth: u32,
    ) -> DelverResult<u32> {
        let cost = self.current_cost(depth, breadth);

        self.ledger
            .debit(
                user_id,
                cost,
                LedgerEntry {
                    user_id: user_id.to_string(),
                    query: query.to_string(),
                    depth,
                    breadth,
                    credits_used: cost as i64,
                    note: None,
                    timestamp: Utc::now(),
                },
            )
            .await?;

        info!(user_id = user_id, cost = cost, "Debited research credits");
        Ok(cost)
    }

    /// Refund the exact debit-time cost. A ledger failure here is logged and
    /// swallowed; the session error that triggered the refund still
    /// propagates to the caller.
    pub async fn refund(
        &self,
        user_id: &str,
        query: &str,
        depth: u32,
        breadth: u32,
        cost: u32,
        reason: &str,
    ) {
        let result = self
            .ledger
            .credit(
                user_id,
                cost,
                LedgerEntry {
                    user_id: user_id.to_string(),
                    query: query.to_string(),
                    depth,
                    breadth,
                    credits_used: -(cost as i64),
                    note: Some(reason.to_string()),
                    timestamp: Utc::now(),
                },
            )
            .await;

        match result {
            Ok(()) => info!(user_id = user_id, cost = cost, reason = reason, "Refunded research credits"),
            Err(e) => error!(
                user_id = user_id,
                cost = cost,
                error = %e,
                "Refund failed, user may be under-refunded"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing() -> PricingConfig {
        PricingConfig {
            base_credits: 2.0,
            depth_multiplier: 1.0,
            breadth_multiplier: 0.5,
        }
    }

    fn controller(ledger: Arc<InMemoryCreditLedger>) -> CreditController {
        CreditController::new(ledger, Arc::new(RwLock::new(pricing())))
    }

    #[test]
    fn cost_formula_is_deterministic() {
        // base=2, dM=1, bM=0.5, depth=2, breadth=4 => ceil(6.0) = 6
        assert_eq!(compute_cost(&pricing(), 2, 4), 6);
        // Fractional sums round up
        assert_eq!(compute_cost(&pricing(), 1, 1), 4); // ceil(3.5)
        assert_eq!(compute_cost(&pricing(), 0, 0), 2);
    }

    #[tokio::test]
    async fn insufficient_balance_fails_without_mutation() {
        let ledger = Arc::new(InMemoryCreditLedger::with_balance("u1", 1));
        let controller = controller(Arc::clone(&ledger));

        let result = controller.check_and_reserve("u1", "q", 2, 4).await;
        assert!(matches!(
            result,
            Err(DelverError::InsufficientCredits { required: 6, available: 1, .. })
        ));
        assert_eq!(ledger.get_balance("u1").await.unwrap(), 1);
        assert!(ledger.entries().is_empty());
    }

    #[tokio::test]
    async fn debit_then_refund_is_a_noop_on_balance() {
        let ledger = Arc::new(InMemoryCreditLedger::with_balance("u1", 10));
        let controller = controller(Arc::clone(&ledger));

        let cost = controller.check_and_reserve("u1", "q", 2, 4).await.unwrap();
        assert_eq!(cost, 6);
        assert_eq!(ledger.get_balance("u1").await.unwrap(), 4);

        controller.refund("u1", "q", 2, 4, cost, "planner failure").await;
        assert_eq!(ledger.get_balance("u1").await.unwrap(), 10);

        let entries = ledger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].credits_used, 6);
        assert_eq!(entries[1].credits_used, -6);
        assert_eq!(entries[1].note.as_deref(), Some("planner failure"));
    }

    #[tokio::test]
    async fn refund_uses_debit_time_cost_despite_pricing_changes() {
        let ledger = Arc::new(InMemoryCreditLedger::with_balance("u1", 10));
        let pricing = Arc::new(RwLock::new(self::pricing()));
        let controller = CreditController::new(Arc::clone(&ledger) as Arc<dyn CreditLedger>, Arc::clone(&pricing));

        let cost = controller.check_and_reserve("u1", "q", 2, 4).await.unwrap();

        // Operator doubles prices mid-session
        pricing.write().unwrap().base_credits = 50.0;

        controller.refund("u1", "q", 2, 4, cost, "failure").await;
        assert_eq!(ledger.get_balance("u1").await.unwrap(), 10);
    }
}
