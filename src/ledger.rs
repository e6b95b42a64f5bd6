//! # ledger
//!
//! Per-agent cash balance + symbol positions.
//!
//! ## Concurrency
//! Accounts live in a [`DashMap`] keyed by agent id, each behind its own
//! `tokio::sync::RwLock`. The map guard is dropped before any lock is awaited,
//! so two agents never contend with each other. Within an account a trade is
//! a single write-locked read-modify-write: readers either see the state before
//! the trade or after it, never in between.
//!
//! ## Rules
//! 1. **Buy**: cost = quantity × fill; rejected if cash < cost
//! 2. **Sell**: rejected without a position or with too few shares
//! 3. A position that reaches zero quantity is removed

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{PortfolioSnapshot, Position, PriceUpdate, Trade, TradeAction, TradeRequest};

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("account {0} is already initialized")]
    AlreadyInitialized(Uuid),

    #[error("account {0} is not initialized")]
    NotInitialized(Uuid),

    #[error("insufficient cash: required {required:.2}, available {available:.2}")]
    InsufficientCash { required: f64, available: f64 },

    #[error("no open position in {0}")]
    NoPosition(String),

    #[error("insufficient quantity of {symbol}: held {held}, requested {requested}")]
    InsufficientQuantity { symbol: String, held: u64, requested: u64 },

    #[error("trade quantity must be positive")]
    InvalidQuantity,

    #[error("invalid fill price {0}")]
    InvalidPrice(f64),

    #[error("invalid initial capital {0}")]
    InvalidCapital(f64),

    #[error("return is undefined for zero initial capital")]
    DivisionUndefined,
}

// ─── Account ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Account {
    cash:      f64,
    /// BTreeMap keeps snapshots ordered by symbol.
    positions: BTreeMap<String, Position>,
}

impl Account {
    fn new(cash: f64) -> Self {
        Self { cash, positions: BTreeMap::new() }
    }

    fn snapshot(&self, agent_id: Uuid) -> PortfolioSnapshot {
        let positions: Vec<Position> = self.positions.values().cloned().collect();
        let positions_value: f64 = positions.iter().map(Position::market_value).sum();

        PortfolioSnapshot {
            agent_id,
            cash:        self.cash,
            positions,
            total_value: self.cash + positions_value,
        }
    }

    /// Everything is validated before the first field is written, so an `Err`
    /// always leaves the account untouched.
    fn apply(
        &mut self,
        agent_id: Uuid,
        req: &TradeRequest,
        fill_price: f64,
    ) -> Result<Trade, LedgerError> {
        let notional = req.quantity as f64 * fill_price;

        let profit = match req.action {
            TradeAction::Buy => {
                if self.cash < notional {
                    return Err(LedgerError::InsufficientCash {
                        required:  notional,
                        available: self.cash,
                    });
                }

                self.cash -= notional;

                match self.positions.get_mut(&req.symbol) {
                    Some(pos) => {
                        let new_qty = pos.quantity + req.quantity;
                        pos.average_price =
                            (pos.average_price * pos.quantity as f64 + notional) / new_qty as f64;
                        pos.quantity = new_qty;
                        pos.mark(fill_price);
                    }
                    None => {
                        self.positions.insert(
                            req.symbol.clone(),
                            Position::open(&req.symbol, req.quantity, fill_price),
                        );
                    }
                }
                None
            }

            TradeAction::Sell => {
                let pos = self
                    .positions
                    .get_mut(&req.symbol)
                    .ok_or_else(|| LedgerError::NoPosition(req.symbol.clone()))?;

                let remaining = pos.quantity.checked_sub(req.quantity).ok_or_else(|| {
                    LedgerError::InsufficientQuantity {
                        symbol:    req.symbol.clone(),
                        held:      pos.quantity,
                        requested: req.quantity,
                    }
                })?;

                let realized = (fill_price - pos.average_price) * req.quantity as f64;
                self.cash += notional;

                if remaining == 0 {
                    self.positions.remove(&req.symbol);
                } else {
                    pos.quantity = remaining;
                    pos.mark(fill_price);
                }
                Some(realized)
            }
        };

        debug_assert!(self.cash >= 0.0, "cash went negative");
        debug_assert!(self.positions.values().all(|p| p.quantity > 0), "zero-quantity position kept");

        Ok(Trade {
            id:        Uuid::new_v4(),
            agent_id,
            symbol:    req.symbol.clone(),
            action:    req.action,
            quantity:  req.quantity,
            price:     fill_price,
            timestamp: Utc::now(),
            profit,
            reasoning: req.reasoning.clone(),
        })
    }
}

// ─── Ledger ───────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Ledger {
    accounts: DashMap<Uuid, Arc<RwLock<Account>>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    fn account(&self, agent_id: Uuid) -> Option<Arc<RwLock<Account>>> {
        // Clone the Arc out so the shard guard is released before any await.
        self.accounts.get(&agent_id).map(|a| Arc::clone(a.value()))
    }

    /// Open a fresh account. A second call for the same id is rejected rather
    /// than silently resetting the balance.
    pub fn initialize_account(&self, agent_id: Uuid, initial_capital: f64) -> Result<(), LedgerError> {
        if !initial_capital.is_finite() || initial_capital < 0.0 {
            return Err(LedgerError::InvalidCapital(initial_capital));
        }

        match self.accounts.entry(agent_id) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyInitialized(agent_id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RwLock::new(Account::new(initial_capital))));
                info!(agent_id = %agent_id, initial_capital, "💼 Ledger account opened");
                Ok(())
            }
        }
    }

    pub fn has_account(&self, agent_id: Uuid) -> bool {
        self.accounts.contains_key(&agent_id)
    }

    /// Drop an account and its positions. Returns `false` if none existed.
    pub fn close_account(&self, agent_id: Uuid) -> bool {
        let closed = self.accounts.remove(&agent_id).is_some();
        if closed {
            info!(agent_id = %agent_id, "💼 Ledger account closed");
        }
        closed
    }

    /// Apply one fill atomically and mint the resulting [`Trade`].
    pub async fn apply_trade(
        &self,
        agent_id: Uuid,
        request: &TradeRequest,
        fill_price: f64,
    ) -> Result<Trade, LedgerError> {
        if request.quantity == 0 {
            return Err(LedgerError::InvalidQuantity);
        }
        if !fill_price.is_finite() || fill_price <= 0.0 {
            return Err(LedgerError::InvalidPrice(fill_price));
        }

        let account = self.account(agent_id).ok_or(LedgerError::NotInitialized(agent_id))?;
        let mut guard = account.write().await;
        let trade = guard.apply(agent_id, request, fill_price)?;

        debug!(
            agent_id = %agent_id,
            symbol   = %trade.symbol,
            action   = %trade.action,
            quantity = trade.quantity,
            price    = trade.price,
            cash     = guard.cash,
            "Trade applied"
        );

        Ok(trade)
    }

    /// Cash, positions and total value. Unknown accounts read as zero.
    pub async fn get_portfolio(&self, agent_id: Uuid) -> PortfolioSnapshot {
        match self.account(agent_id) {
            Some(account) => account.read().await.snapshot(agent_id),
            None => PortfolioSnapshot::empty(agent_id),
        }
    }

    /// Mark held symbols to the given prices. Symbols without a position are
    /// ignored, as are non-positive or non-finite prices.
    pub async fn update_market_prices(&self, agent_id: Uuid, updates: &[PriceUpdate]) {
        let Some(account) = self.account(agent_id) else { return };
        let mut guard = account.write().await;

        for update in updates {
            if !update.price.is_finite() || update.price <= 0.0 {
                continue;
            }
            if let Some(pos) = guard.positions.get_mut(&update.symbol) {
                pos.mark(update.price);
            }
        }
    }

    /// `(totalValue − initialCapital) / initialCapital × 100`
    pub async fn calculate_return(&self, agent_id: Uuid, initial_capital: f64) -> Result<f64, LedgerError> {
        if initial_capital == 0.0 {
            return Err(LedgerError::DivisionUndefined);
        }
        let portfolio = self.get_portfolio(agent_id).await;
        Ok((portfolio.total_value - initial_capital) / initial_capital * 100.0)
    }

    /// Rebuild an account by replaying `trades` from `initial_capital`,
    /// replacing whatever was stored for the id. Fill prices and quantities come
    /// from the trades; the replayed account ends marked at each symbol's last
    /// fill.
    pub fn restore_account(
        &self,
        agent_id: Uuid,
        initial_capital: f64,
        trades: &[Trade],
    ) -> Result<(), LedgerError> {
        if !initial_capital.is_finite() || initial_capital < 0.0 {
            return Err(LedgerError::InvalidCapital(initial_capital));
        }

        let mut account = Account::new(initial_capital);
        for trade in trades {
            account.apply(agent_id, &trade.to_request(), trade.price)?;
        }

        self.accounts.insert(agent_id, Arc::new(RwLock::new(account)));
        info!(agent_id = %agent_id, replayed = trades.len(), "💼 Ledger account restored");
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn funded(capital: f64) -> (Ledger, Uuid) {
        let ledger = Ledger::new();
        let id = Uuid::new_v4();
        ledger.initialize_account(id, capital).unwrap();
        (ledger, id)
    }

    #[tokio::test]
    async fn test_initialize_twice_rejected() {
        let (ledger, id) = funded(10_000.0);
        assert_eq!(ledger.initialize_account(id, 500.0), Err(LedgerError::AlreadyInitialized(id)));
        assert_eq!(ledger.get_portfolio(id).await.cash, 10_000.0);
    }

    #[tokio::test]
    async fn test_negative_capital_rejected() {
        let ledger = Ledger::new();
        let id = Uuid::new_v4();
        assert_eq!(ledger.initialize_account(id, -1.0), Err(LedgerError::InvalidCapital(-1.0)));
        assert!(!ledger.has_account(id));
    }

    #[tokio::test]
    async fn test_buy_debits_exact_cost() {
        let (ledger, id) = funded(10_000.0);

        let trade = ledger.apply_trade(id, &TradeRequest::buy("AAPL", 10), 150.0).await.unwrap();
        assert_eq!(trade.quantity, 10);
        assert_eq!(trade.price, 150.0);
        assert_eq!(trade.profit, None);

        let p = ledger.get_portfolio(id).await;
        assert_eq!(p.cash, 8_500.0);
        assert_eq!(p.positions.len(), 1);
        assert_eq!(p.positions[0].quantity, 10);
        assert_eq!(p.positions[0].average_price, 150.0);
        assert_eq!(p.total_value, 10_000.0);
    }

    #[tokio::test]
    async fn test_buy_with_exact_cash_leaves_zero() {
        let (ledger, id) = funded(1_500.0);
        ledger.apply_trade(id, &TradeRequest::buy("AAPL", 10), 150.0).await.unwrap();
        assert_eq!(ledger.get_portfolio(id).await.cash, 0.0);
    }

    #[tokio::test]
    async fn test_insufficient_cash_leaves_state_unchanged() {
        let (ledger, id) = funded(1_000.0);
        ledger.apply_trade(id, &TradeRequest::buy("MSFT", 2), 300.0).await.unwrap();
        let before = ledger.get_portfolio(id).await;

        let err = ledger.apply_trade(id, &TradeRequest::buy("AAPL", 10), 150.0).await.unwrap_err();
        assert_eq!(err, LedgerError::InsufficientCash { required: 1_500.0, available: 400.0 });
        assert_eq!(ledger.get_portfolio(id).await, before);
    }

    #[tokio::test]
    async fn test_weighted_average_ignores_price_updates() {
        let (ledger, id) = funded(100_000.0);

        ledger.apply_trade(id, &TradeRequest::buy("NVDA", 10), 100.0).await.unwrap();
        ledger.update_market_prices(id, &[PriceUpdate::new("NVDA", 180.0)]).await;
        ledger.apply_trade(id, &TradeRequest::buy("NVDA", 30), 140.0).await.unwrap();

        let p = ledger.get_portfolio(id).await;
        let pos = p.position("NVDA").unwrap();
        assert_eq!(pos.quantity, 40);
        assert!((pos.average_price - (10.0 * 100.0 + 30.0 * 140.0) / 40.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sell_credits_proceeds_and_removes_flat_position() {
        let (ledger, id) = funded(10_000.0);
        ledger.apply_trade(id, &TradeRequest::buy("TSLA", 4), 200.0).await.unwrap();

        let trade = ledger.apply_trade(id, &TradeRequest::sell("TSLA", 4), 250.0).await.unwrap();
        assert_eq!(trade.profit, Some(200.0));

        let p = ledger.get_portfolio(id).await;
        assert_eq!(p.cash, 10_200.0);
        assert!(p.positions.is_empty());
        assert!(!p.holds("TSLA"));
    }

    #[tokio::test]
    async fn test_sell_rejections() {
        let (ledger, id) = funded(10_000.0);

        let err = ledger.apply_trade(id, &TradeRequest::sell("AAPL", 1), 150.0).await.unwrap_err();
        assert_eq!(err, LedgerError::NoPosition("AAPL".into()));

        ledger.apply_trade(id, &TradeRequest::buy("AAPL", 3), 150.0).await.unwrap();
        let err = ledger.apply_trade(id, &TradeRequest::sell("AAPL", 5), 150.0).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientQuantity { symbol: "AAPL".into(), held: 3, requested: 5 }
        );
        assert_eq!(ledger.get_portfolio(id).await.position("AAPL").unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn test_invalid_inputs_rejected() {
        let (ledger, id) = funded(10_000.0);

        let zero = TradeRequest::buy("AAPL", 0);
        assert_eq!(ledger.apply_trade(id, &zero, 150.0).await, Err(LedgerError::InvalidQuantity));

        let bad_price = ledger.apply_trade(id, &TradeRequest::buy("AAPL", 1), f64::NAN).await;
        assert!(matches!(bad_price, Err(LedgerError::InvalidPrice(_))));

        let stranger = Uuid::new_v4();
        let err = ledger.apply_trade(stranger, &TradeRequest::buy("AAPL", 1), 1.0).await;
        assert_eq!(err, Err(LedgerError::NotInitialized(stranger)));
    }

    #[tokio::test]
    async fn test_unknown_account_reads_as_zero() {
        let ledger = Ledger::new();
        let id = Uuid::new_v4();
        assert_eq!(ledger.get_portfolio(id).await, PortfolioSnapshot::empty(id));
    }

    #[tokio::test]
    async fn test_price_update_recomputes_pnl() {
        let (ledger, id) = funded(10_000.0);
        ledger.apply_trade(id, &TradeRequest::buy("AAPL", 10), 150.0).await.unwrap();

        ledger
            .update_market_prices(id, &[PriceUpdate::new("AAPL", 165.0), PriceUpdate::new("MSFT", 400.0)])
            .await;

        let p = ledger.get_portfolio(id).await;
        let pos = p.position("AAPL").unwrap();
        assert_eq!(pos.current_price, 165.0);
        assert!((pos.profit_loss - 150.0).abs() < 1e-9);
        assert!((pos.profit_loss_percent - 10.0).abs() < 1e-9);
        assert!(!p.holds("MSFT"));
        assert!((p.total_value - 10_150.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_calculate_return() {
        let (ledger, id) = funded(10_000.0);
        ledger.apply_trade(id, &TradeRequest::buy("AAPL", 10), 100.0).await.unwrap();
        ledger.update_market_prices(id, &[PriceUpdate::new("AAPL", 200.0)]).await;

        let ret = ledger.calculate_return(id, 10_000.0).await.unwrap();
        assert!((ret - 10.0).abs() < 1e-9);
        assert_eq!(ledger.calculate_return(id, 0.0).await, Err(LedgerError::DivisionUndefined));
    }

    #[tokio::test]
    async fn test_restore_matches_live_account() {
        let (ledger, id) = funded(10_000.0);
        let mut trades = Vec::new();
        trades.push(ledger.apply_trade(id, &TradeRequest::buy("AAPL", 10), 150.0).await.unwrap());
        trades.push(ledger.apply_trade(id, &TradeRequest::buy("MSFT", 5), 300.0).await.unwrap());
        trades.push(ledger.apply_trade(id, &TradeRequest::sell("AAPL", 4), 160.0).await.unwrap());

        let replica = Ledger::new();
        replica.restore_account(id, 10_000.0, &trades).unwrap();

        assert_eq!(replica.get_portfolio(id).await, ledger.get_portfolio(id).await);
    }

    #[tokio::test]
    async fn test_random_sequences_never_break_invariants() {
        let mut rng = StdRng::seed_from_u64(7);
        let (ledger, id) = funded(5_000.0);
        let symbols = ["AAPL", "MSFT", "AMD"];

        for _ in 0..2_000 {
            let symbol = symbols[rng.gen_range(0..symbols.len())];
            let qty = rng.gen_range(1..20);
            let price = rng.gen_range(1.0..500.0);
            let req = if rng.gen_bool(0.5) {
                TradeRequest::buy(symbol, qty)
            } else {
                TradeRequest::sell(symbol, qty)
            };

            let before = ledger.get_portfolio(id).await;
            match ledger.apply_trade(id, &req, price).await {
                Ok(_) => {}
                Err(_) => assert_eq!(ledger.get_portfolio(id).await, before),
            }

            let after = ledger.get_portfolio(id).await;
            assert!(after.cash >= 0.0);
            assert!(after.positions.iter().all(|p| p.quantity > 0));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_accounts_match_serial_replay() {
        let ledger = Arc::new(Ledger::new());
        let ids: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            ledger.initialize_account(*id, 20_000.0).unwrap();
        }

        let mut handles = Vec::new();
        for (n, id) in ids.iter().copied().enumerate() {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(n as u64);
                let mut fills = Vec::new();
                for _ in 0..300 {
                    let qty = rng.gen_range(1..10);
                    let price = rng.gen_range(10.0..300.0);
                    let req = if rng.gen_bool(0.6) {
                        TradeRequest::buy("AAPL", qty)
                    } else {
                        TradeRequest::sell("AAPL", qty)
                    };
                    if let Ok(trade) = ledger.apply_trade(id, &req, price).await {
                        fills.push(trade);
                    }
                    tokio::task::yield_now().await;
                }
                (id, fills)
            }));
        }

        for handle in handles {
            let (id, fills) = handle.await.unwrap();
            let replica = Ledger::new();
            replica.restore_account(id, 20_000.0, &fills).unwrap();
            assert_eq!(replica.get_portfolio(id).await, ledger.get_portfolio(id).await);
        }
    }
}
