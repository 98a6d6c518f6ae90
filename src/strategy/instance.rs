// Strategy Instance - one running EA bound to an order
// Two cooperating tasks: an indicator subscriber feeding a bounded signal
// queue, and a dispatcher turning signals into trade requests

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::core::bus::MessageBus;

use super::runtime::EaConfig;
use super::trade::{Position, PositionStatus, TradeManager, TradeRequest};
use super::{Signal, Strategy};

const SIGNAL_QUEUE_CAPACITY: usize = 100;

/// Point-in-time view of a running instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    pub order_id: i64,
    pub ea_name: String,
    pub user_id: String,
    pub username: String,
    pub symbol: String,
    pub timeframe: String,
    pub enabled: bool,
    pub paused: bool,
    pub risk_percent: f64,
    pub max_positions: usize,
    pub open_positions: usize,
}

pub struct StrategyInstance {
    order_id: i64,
    config: EaConfig,
    user_id: String,
    username: String,
    balance: f64,
    strategy: Arc<dyn Strategy>,
    bus: Arc<MessageBus>,
    trade_manager: Arc<TradeManager>,
    positions: RwLock<HashMap<String, Position>>,
    paused: RwLock<bool>,
    stopped: Mutex<bool>,
    stop_tx: watch::Sender<bool>,
}

impl StrategyInstance {
    pub fn new(
        order_id: i64,
        config: EaConfig,
        user_id: String,
        username: String,
        balance: f64,
        strategy: Arc<dyn Strategy>,
        bus: Arc<MessageBus>,
        trade_manager: Arc<TradeManager>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            order_id,
            config,
            user_id,
            username,
            balance,
            strategy,
            bus,
            trade_manager,
            positions: RwLock::new(HashMap::new()),
            paused: RwLock::new(false),
            stopped: Mutex::new(false),
            stop_tx,
        }
    }

    /// Spawn the subscriber and dispatcher tasks. Disabled instances stay
    /// idle but remain visible to the supervisor.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!(order_id = self.order_id, "Instance disabled, not starting");
            return;
        }

        let channel = self
            .strategy
            .indicator_channel(&self.config.symbol, self.config.timeframe);
        info!(
            order_id = self.order_id,
            strategy = self.strategy.name(),
            user = %self.username,
            channel = %channel,
            "Instance starting"
        );

        let (signal_tx, mut signal_rx) = mpsc::channel::<Signal>(SIGNAL_QUEUE_CAPACITY);

        // Indicator subscriber
        let instance = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            let mut rx = instance.bus.subscribe(&channel);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => instance.handle_indicator(&msg.payload, &signal_tx).await,
                        None => break,
                    },
                }
            }
            debug!(order_id = instance.order_id, "Indicator subscriber stopped");
        });

        // Signal dispatcher
        let instance = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    signal = signal_rx.recv() => match signal {
                        Some(signal) => instance.execute_signal(signal),
                        None => break,
                    },
                }
            }
            debug!(order_id = instance.order_id, "Signal dispatcher stopped");
        });
    }

    /// Paused instances observe indicator traffic without emitting signals.
    async fn handle_indicator(&self, payload: &str, signal_tx: &mpsc::Sender<Signal>) {
        if *self.paused.read() {
            return;
        }

        let signal = match self.strategy.process_indicator(payload) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(order_id = self.order_id, error = %e, "Failed to process indicator");
                return;
            }
        };

        if let Some(mut signal) = signal {
            signal.symbol = self.config.symbol.clone();
            signal.timeframe = self.config.timeframe.as_str().to_string();
            let _ = signal_tx.send(signal).await;
        }
    }

    fn execute_signal(&self, signal: Signal) {
        info!(
            order_id = self.order_id,
            side = %signal.side,
            symbol = %signal.symbol,
            price = signal.price,
            stop_loss = signal.stop_loss,
            "Signal received"
        );

        let open_count = self.positions.read().len();
        if open_count >= self.config.max_positions {
            info!(
                order_id = self.order_id,
                max_positions = self.config.max_positions,
                "Max positions reached, skipping signal"
            );
            return;
        }

        let lots = self.strategy.calculate_lots(
            self.balance,
            self.config.risk_percent,
            signal.price,
            signal.stop_loss,
        );

        let request = TradeRequest {
            user_id: self.user_id.clone(),
            ea_id: self.config.ea_id.clone(),
            mt4_account_id: self.config.mt4_account_id,
            symbol: signal.symbol.clone(),
            side: signal.side,
            lots,
            open_price: signal.price,
            stop_loss: signal.stop_loss,
            take_profit: 0.0,
        };

        match self.trade_manager.execute(request) {
            Ok(position_id) => {
                info!(order_id = self.order_id, position = %position_id, "Position opened");
                let position = Position {
                    position_id: position_id.clone(),
                    user_id: self.user_id.clone(),
                    ea_id: self.config.ea_id.clone(),
                    symbol: signal.symbol,
                    side: signal.side,
                    lots,
                    open_price: signal.price,
                    stop_loss: signal.stop_loss,
                    take_profit: 0.0,
                    open_time: signal.timestamp,
                    close_time: None,
                    close_price: None,
                    profit: 0.0,
                    status: PositionStatus::Open,
                };
                self.positions.write().insert(position_id, position);
            }
            Err(e) => {
                warn!(order_id = self.order_id, error = %e, "Trade rejected");
            }
        }
    }

    pub fn pause(&self) {
        *self.paused.write() = true;
        info!(order_id = self.order_id, "Instance paused");
    }

    pub fn resume(&self) {
        *self.paused.write() = false;
        info!(order_id = self.order_id, "Instance resumed");
    }

    /// Idempotent: the first call cancels both tasks, later calls are no-ops.
    pub fn stop(&self) {
        let mut stopped = self.stopped.lock();
        if *stopped {
            debug!(order_id = self.order_id, "Instance already stopped");
            return;
        }
        *stopped = true;
        let _ = self.stop_tx.send(true);
        info!(order_id = self.order_id, "Instance stopped");
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    pub fn open_positions(&self) -> usize {
        self.positions.read().len()
    }

    pub fn status(&self) -> InstanceStatus {
        InstanceStatus {
            order_id: self.order_id,
            ea_name: self.strategy.name().to_string(),
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            symbol: self.config.symbol.clone(),
            timeframe: self.config.timeframe.as_str().to_string(),
            enabled: self.config.enabled,
            paused: *self.paused.read(),
            risk_percent: self.config.risk_percent,
            max_positions: self.config.max_positions,
            open_positions: self.positions.read().len(),
        }
    }

    #[cfg(test)]
    pub(crate) fn execute_signal_for_test(&self, signal: Signal) {
        self.execute_signal(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Timeframe;
    use crate::strategy::trade::{Account, TradeSide};
    use crate::strategy::GreenArrowStrategy;
    use chrono::Utc;

    fn build_instance(max_positions: usize, balance: f64) -> Arc<StrategyInstance> {
        let trade_manager = Arc::new(TradeManager::new());
        trade_manager.register_user(Account {
            user_id: "7".to_string(),
            username: "trader".to_string(),
            balance,
            equity: balance,
            margin: 0.0,
            free_margin: balance * 0.8,
        });

        let config = EaConfig {
            ea_id: "ea-1".to_string(),
            user_id: "7".to_string(),
            ea_name: "GreenArrow".to_string(),
            symbol: "XAUUSD".to_string(),
            timeframe: Timeframe::M1,
            strategy: "trend_following".to_string(),
            risk_percent: 1.0,
            max_positions,
            enabled: true,
            mt4_account_id: 1,
            params: serde_json::json!({}),
        };
        let strategy =
            GreenArrowStrategy::from_params(&serde_json::json!({})).expect("default params");

        Arc::new(StrategyInstance::new(
            1,
            config,
            "7".to_string(),
            "trader".to_string(),
            balance,
            Arc::new(strategy),
            Arc::new(MessageBus::new()),
            trade_manager,
        ))
    }

    fn buy_signal(price: f64) -> Signal {
        Signal {
            symbol: "XAUUSD".to_string(),
            timeframe: "M1".to_string(),
            side: TradeSide::Buy,
            price,
            stop_loss: price - 10.0,
            trend: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_admission_cap_blocks_extra_positions() {
        let instance = build_instance(2, 1_000_000.0);
        instance.execute_signal_for_test(buy_signal(2650.0));
        instance.execute_signal_for_test(buy_signal(2660.0));
        assert_eq!(instance.open_positions(), 2);

        // third signal must not open a trade
        instance.execute_signal_for_test(buy_signal(2670.0));
        assert_eq!(instance.open_positions(), 2);
        assert_eq!(instance.status().open_positions, 2);
    }

    #[tokio::test]
    async fn test_rejected_trade_keeps_local_positions_unchanged() {
        let instance = build_instance(5, 2_000.0);
        // a tight stop maximizes sizing: 20 risked over 0.1 points clamps to
        // 10 lots, needing 10,000 margin against 1,600 free
        let mut signal = buy_signal(2650.0);
        signal.stop_loss = 2649.9;
        instance.execute_signal_for_test(signal);
        assert_eq!(instance.open_positions(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let instance = build_instance(2, 10_000.0);
        instance.start();
        assert!(!instance.is_stopped());

        instance.stop();
        assert!(instance.is_stopped());
        instance.stop(); // second stop is a no-op
        assert!(instance.is_stopped());
    }

    #[tokio::test]
    async fn test_paused_instance_ignores_indicators() {
        let instance = build_instance(2, 1_000_000.0);
        instance.pause();

        let (tx, mut rx) = mpsc::channel(8);
        let payload = serde_json::to_string(&crate::indicators::GreenArrowSample {
            up_stop: 2650.0,
            down_stop: -1.0,
            up_signal: 2650.0,
            down_signal: -1.0,
            up_line: f64::MAX,
            down_line: f64::MAX,
            trend: 1,
            is_signal: true,
        })
        .unwrap();

        instance.handle_indicator(&payload, &tx).await;
        assert!(rx.try_recv().is_err());

        instance.resume();
        instance.handle_indicator(&payload, &tx).await;
        let signal = rx.try_recv().expect("signal after resume");
        assert_eq!(signal.side, TradeSide::Buy);
        assert_eq!(signal.symbol, "XAUUSD");
    }
}
