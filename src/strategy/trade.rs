// Trade Manager - process-wide simulated account and position ledger
// One exclusive lock guards both maps; margin mutations never partially apply

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Simplified constant margin requirement per lot.
pub const MARGIN_PER_LOT: f64 = 1_000.0;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Margin ledger for one user. Invariant: `free_margin = balance - margin`
/// relative to the registered starting point.
#[derive(Debug, Clone)]
pub struct Account {
    pub user_id: String,
    pub username: String,
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
}

/// Simulated trade. Closure fields stay empty: the closure path is
/// intentionally left unimplemented.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub user_id: String,
    pub ea_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub lots: f64,
    pub open_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: Option<DateTime<Utc>>,
    pub close_price: Option<f64>,
    pub profit: f64,
    pub status: PositionStatus,
}

#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub user_id: String,
    pub ea_id: String,
    pub mt4_account_id: i64,
    pub symbol: String,
    pub side: TradeSide,
    pub lots: f64,
    pub open_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum TradeError {
    #[error("user not found")]
    UserNotFound,
    #[error("insufficient margin: required {required:.2}, free {free:.2}")]
    InsufficientMargin { required: f64, free: f64 },
}

// ============================================================================
// TradeManager
// ============================================================================

#[derive(Default)]
struct TradeState {
    accounts: HashMap<String, Account>,
    positions: HashMap<String, Position>,
}

pub struct TradeManager {
    state: Mutex<TradeState>,
}

impl TradeManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TradeState::default()),
        }
    }

    /// Idempotent: an already registered user keeps its ledger.
    pub fn register_user(&self, account: Account) {
        let mut state = self.state.lock();
        if state.accounts.contains_key(&account.user_id) {
            return;
        }
        info!(
            user = %account.username,
            balance = account.balance,
            free_margin = account.free_margin,
            "User registered with trade manager"
        );
        state.accounts.insert(account.user_id.clone(), account);
    }

    pub fn user_exists(&self, user_id: &str) -> bool {
        self.state.lock().accounts.contains_key(user_id)
    }

    /// Open a simulated position. On any failure the ledger is untouched.
    pub fn execute(&self, req: TradeRequest) -> Result<String, TradeError> {
        let mut state = self.state.lock();

        let account = state
            .accounts
            .get_mut(&req.user_id)
            .ok_or(TradeError::UserNotFound)?;

        let required_margin = req.lots * MARGIN_PER_LOT;
        if account.free_margin < required_margin {
            return Err(TradeError::InsufficientMargin {
                required: required_margin,
                free: account.free_margin,
            });
        }

        account.margin += required_margin;
        account.free_margin -= required_margin;

        let position = Position {
            position_id: Uuid::new_v4().to_string(),
            user_id: req.user_id.clone(),
            ea_id: req.ea_id.clone(),
            symbol: req.symbol.clone(),
            side: req.side,
            lots: req.lots,
            open_price: req.open_price,
            stop_loss: req.stop_loss,
            take_profit: req.take_profit,
            open_time: Utc::now(),
            close_time: None,
            close_price: None,
            profit: 0.0,
            status: PositionStatus::Open,
        };
        let position_id = position.position_id.clone();

        info!(
            user = %req.user_id,
            ea = %req.ea_id,
            side = %req.side,
            symbol = %req.symbol,
            lots = req.lots,
            stop_loss = req.stop_loss,
            "Position opened"
        );
        state.positions.insert(position_id.clone(), position);

        Ok(position_id)
    }

    pub fn account(&self, user_id: &str) -> Option<Account> {
        self.state.lock().accounts.get(user_id).cloned()
    }

    pub fn position(&self, position_id: &str) -> Option<Position> {
        self.state.lock().positions.get(position_id).cloned()
    }

    pub fn open_position_count(&self) -> usize {
        self.state.lock().positions.len()
    }
}

impl Default for TradeManager {
    fn default() -> Self {
        Self::new()
    }
}
