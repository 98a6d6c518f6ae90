// Strategy Runtime - supervisor of running EA instances
// start/pause/resume/stop/status keyed by order id; contract violations are
// typed failures surfaced to the caller, never runtime aborts

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::core::bus::MessageBus;
use crate::core::types::Timeframe;

use super::instance::{InstanceStatus, StrategyInstance};
use super::trade::{Account, TradeManager};
use super::{create_strategy, StrategyError};

/// Share of the balance available as free margin at registration.
const INITIAL_FREE_MARGIN_RATIO: f64 = 0.8;

fn default_risk_percent() -> f64 {
    1.0
}

fn default_max_positions() -> usize {
    3
}

/// Configuration of one EA order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EaConfig {
    #[serde(default)]
    pub ea_id: String,
    #[serde(default)]
    pub user_id: String,
    pub ea_name: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    #[serde(default)]
    pub strategy: String,
    #[serde(default = "default_risk_percent")]
    pub risk_percent: f64,
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mt4_account_id: i64,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Owner of the order, as known to the outer layers.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub user_id: i64,
    pub username: String,
    pub balance: f64,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("instance for order {0} is already running")]
    AlreadyRunning(i64),
    #[error("instance for order {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
}

pub struct StrategyRuntime {
    instances: RwLock<HashMap<i64, Arc<StrategyInstance>>>,
    trade_manager: Arc<TradeManager>,
    bus: Arc<MessageBus>,
}

impl StrategyRuntime {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            trade_manager: Arc::new(TradeManager::new()),
            bus,
        }
    }

    /// Start an EA for an order. Rejects duplicates; registers the user with
    /// the trade manager on first sight (80% of balance as free margin).
    pub fn start(&self, order_id: i64, config: EaConfig, user: UserInfo) -> Result<(), RuntimeError> {
        let mut instances = self.instances.write();
        if instances.contains_key(&order_id) {
            return Err(RuntimeError::AlreadyRunning(order_id));
        }

        let user_id = user.user_id.to_string();
        if !self.trade_manager.user_exists(&user_id) {
            self.trade_manager.register_user(Account {
                user_id: user_id.clone(),
                username: user.username.clone(),
                balance: user.balance,
                equity: user.balance,
                margin: 0.0,
                free_margin: user.balance * INITIAL_FREE_MARGIN_RATIO,
            });
        }

        let strategy = create_strategy(&config.ea_name, &config.params)?;

        let instance = Arc::new(StrategyInstance::new(
            order_id,
            config,
            user_id,
            user.username,
            user.balance,
            Arc::from(strategy),
            self.bus.clone(),
            self.trade_manager.clone(),
        ));
        instance.start();
        instances.insert(order_id, instance);

        info!(order_id = order_id, "Instance started");
        Ok(())
    }

    pub fn pause(&self, order_id: i64) -> Result<(), RuntimeError> {
        self.instance(order_id)?.pause();
        Ok(())
    }

    pub fn resume(&self, order_id: i64) -> Result<(), RuntimeError> {
        self.instance(order_id)?.resume();
        Ok(())
    }

    /// Stop and unlink. The instance's stop itself is idempotent; stopping an
    /// unknown order is a typed failure.
    pub fn stop(&self, order_id: i64) -> Result<(), RuntimeError> {
        let instance = {
            let mut instances = self.instances.write();
            instances
                .remove(&order_id)
                .ok_or(RuntimeError::NotFound(order_id))?
        };
        instance.stop();
        info!(order_id = order_id, "Instance stopped and unlinked");
        Ok(())
    }

    pub fn status(&self, order_id: i64) -> Result<InstanceStatus, RuntimeError> {
        Ok(self.instance(order_id)?.status())
    }

    pub fn status_all(&self) -> Vec<InstanceStatus> {
        self.instances
            .read()
            .values()
            .map(|instance| instance.status())
            .collect()
    }

    pub fn trade_manager(&self) -> Arc<TradeManager> {
        self.trade_manager.clone()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    fn instance(&self, order_id: i64) -> Result<Arc<StrategyInstance>, RuntimeError> {
        self.instances
            .read()
            .get(&order_id)
            .cloned()
            .ok_or(RuntimeError::NotFound(order_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ea_name: &str) -> EaConfig {
        EaConfig {
            ea_id: "ea-1".to_string(),
            user_id: "7".to_string(),
            ea_name: ea_name.to_string(),
            symbol: "XAUUSD".to_string(),
            timeframe: Timeframe::M1,
            strategy: "trend_following".to_string(),
            risk_percent: 1.0,
            max_positions: 3,
            enabled: true,
            mt4_account_id: 1,
            params: serde_json::json!({}),
        }
    }

    fn user() -> UserInfo {
        UserInfo {
            user_id: 7,
            username: "trader".to_string(),
            balance: 10_000.0,
        }
    }

    #[tokio::test]
    async fn test_start_registers_user_with_80_pct_free_margin() {
        let runtime = StrategyRuntime::new(Arc::new(MessageBus::new()));
        runtime.start(1, config("GreenArrow"), user()).unwrap();

        let account = runtime.trade_manager().account("7").unwrap();
        assert_eq!(account.balance, 10_000.0);
        assert_eq!(account.free_margin, 8_000.0);
        assert_eq!(runtime.instance_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_start_is_rejected() {
        let runtime = StrategyRuntime::new(Arc::new(MessageBus::new()));
        runtime.start(1, config("GreenArrow"), user()).unwrap();
        let err = runtime.start(1, config("GreenArrow"), user()).unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyRunning(1)));
    }

    #[tokio::test]
    async fn test_unknown_ea_name_is_a_typed_failure() {
        let runtime = StrategyRuntime::new(Arc::new(MessageBus::new()));
        let err = runtime.start(1, config("Mystery"), user()).unwrap_err();
        assert!(matches!(err, RuntimeError::Strategy(StrategyError::UnknownEa(_))));
        assert_eq!(runtime.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_unlinks_and_missing_order_fails() {
        let runtime = StrategyRuntime::new(Arc::new(MessageBus::new()));
        runtime.start(1, config("GreenArrow"), user()).unwrap();
        runtime.stop(1).unwrap();
        assert_eq!(runtime.instance_count(), 0);

        assert!(matches!(runtime.stop(1), Err(RuntimeError::NotFound(1))));
        assert!(matches!(runtime.pause(1), Err(RuntimeError::NotFound(1))));
    }

    #[tokio::test]
    async fn test_pause_resume_flips_status_flag() {
        let runtime = StrategyRuntime::new(Arc::new(MessageBus::new()));
        runtime.start(1, config("GreenArrow"), user()).unwrap();

        runtime.pause(1).unwrap();
        assert!(runtime.status(1).unwrap().paused);

        runtime.resume(1).unwrap();
        assert!(!runtime.status(1).unwrap().paused);
    }

    #[tokio::test]
    async fn test_status_all_reports_every_instance() {
        let runtime = StrategyRuntime::new(Arc::new(MessageBus::new()));
        runtime.start(1, config("GreenArrow"), user()).unwrap();
        runtime.start(2, config("MACD"), user()).unwrap();

        let statuses = runtime.status_all();
        assert_eq!(statuses.len(), 2);
        let names: Vec<_> = statuses.iter().map(|s| s.ea_name.as_str()).collect();
        assert!(names.contains(&"GreenArrow"));
        assert!(names.contains(&"MACD"));
    }
}
