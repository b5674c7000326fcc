//! 포지션 추적.
//!
//! (거래소, 심볼) 키당 최대 하나의 오픈 포지션을 유지하는 동시성 안전
//! 맵입니다. 체결 처리와 가격 갱신은 조정 스윕과 신규 체결이 동시에
//! 도착해도 안전하며, 브로커 I/O 동안에는 어떤 잠금도 유지하지 않습니다.
//!
//! 같은 키에 대한 새 매수 체결은 기존 포지션을 대체하고 (평단 계산 없음),
//! 매도 체결은 요청 수량과 무관하게 전량 청산으로 처리됩니다. 부분 청산,
//! 물타기, 매도로 여는 숏 포지션은 지원하지 않습니다.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use exec_broker::Broker;
use exec_core::{Order, Position, PositionSummary, Side};
use exec_risk::RiskSettings;

use crate::events::{EngineEvent, EventNotifier};
use crate::lifecycle::FillHandler;

/// 포지션 맵의 키: (거래소, 심볼) 쌍.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PositionKey {
    /// 거래소 이름
    pub exchange: String,
    /// "BASE/QUOTE" 형식 심볼
    pub symbol: String,
}

impl PositionKey {
    /// 새 포지션 키를 생성합니다.
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
        }
    }

    fn from_order(order: &Order) -> Self {
        Self::new(&order.exchange, order.symbol.to_standard_string())
    }
}

/// 모든 오픈 포지션을 관리하는 포지션 트래커.
pub struct PositionTracker {
    broker: Arc<dyn Broker>,
    notifier: Arc<EventNotifier>,
    risk: RiskSettings,
    positions: RwLock<HashMap<PositionKey, Position>>,
}

impl PositionTracker {
    /// 새 포지션 트래커를 생성합니다.
    pub fn new(broker: Arc<dyn Broker>, notifier: Arc<EventNotifier>, risk: RiskSettings) -> Self {
        Self {
            broker,
            notifier,
            risk,
            positions: RwLock::new(HashMap::new()),
        }
    }

    // ==================== 체결 처리 ====================

    /// 체결된 주문을 포지션 맵에 반영합니다.
    ///
    /// 매수 체결은 해당 키에 포지션을 생성하거나 대체하고, 매도 체결은
    /// 해당 키의 포지션을 제거합니다.
    pub async fn apply_fill(&self, order: &Order) {
        let Some(fill_price) = order.average_fill_price.or(order.price) else {
            warn!(
                order_id = %order.id,
                symbol = %order.symbol,
                "체결 가격을 알 수 없어 포지션을 갱신하지 못함"
            );
            return;
        };

        let key = PositionKey::from_order(order);

        match order.side {
            Side::Buy => {
                let mut position = Position::new(
                    &order.exchange,
                    order.symbol.clone(),
                    Side::Buy,
                    order.filled_quantity,
                    fill_price,
                    order.id,
                )
                .with_protection(
                    self.risk.default_stop_loss(fill_price, Side::Buy),
                    self.risk.default_take_profit(fill_price, Side::Buy),
                );
                if let Some(strategy_id) = &order.strategy_id {
                    position = position.with_strategy(strategy_id.clone());
                }

                let replaced = {
                    let mut positions = self.positions.write().await;
                    positions.insert(key, position.clone())
                };
                if let Some(old) = replaced {
                    warn!(
                        symbol = %position.symbol,
                        old_quantity = %old.quantity,
                        new_quantity = %position.quantity,
                        "기존 포지션이 새 매수 체결로 대체됨"
                    );
                }

                info!(
                    symbol = %position.symbol,
                    quantity = %position.quantity,
                    entry_price = %position.entry_price,
                    "포지션 오픈"
                );
                self.notifier.emit(EngineEvent::PositionOpened(position)).await;
            }
            Side::Sell => {
                let removed = {
                    let mut positions = self.positions.write().await;
                    positions.remove(&key)
                };

                match removed {
                    Some(mut position) => {
                        position.update_price(fill_price);
                        let realized_pnl = position.unrealized_pnl();

                        info!(
                            symbol = %position.symbol,
                            realized_pnl = %realized_pnl,
                            "포지션 종료"
                        );
                        self.notifier
                            .emit(EngineEvent::PositionClosed {
                                position,
                                realized_pnl,
                            })
                            .await;
                    }
                    None => {
                        debug!(
                            order_id = %order.id,
                            symbol = %order.symbol,
                            "매도 체결에 대응하는 오픈 포지션 없음"
                        );
                    }
                }
            }
        }
    }

    // ==================== 가격 갱신 ====================

    /// 모든 오픈 포지션의 현재 가격을 브로커에서 갱신합니다.
    ///
    /// 가격 조회는 잠금 없이 수행되고, 결과만 짧은 쓰기 잠금으로
    /// 반영됩니다. 손절/익절 도달은 플래그와 로그로만 알리며, 이 엔진은
    /// 절대 자동 청산하지 않습니다 (청산은 호출자/전략의 결정).
    pub async fn refresh_prices(&self) {
        let snapshot: Vec<(PositionKey, exec_core::Symbol)> = {
            let positions = self.positions.read().await;
            positions
                .iter()
                .map(|(key, p)| (key.clone(), p.symbol.clone()))
                .collect()
        };
        if snapshot.is_empty() {
            return;
        }

        let prices = join_all(
            snapshot
                .iter()
                .map(|(_, symbol)| self.broker.get_current_price(symbol)),
        )
        .await;

        for ((key, symbol), price) in snapshot.into_iter().zip(prices) {
            let price = match price {
                Ok(price) => price,
                Err(error) => {
                    warn!(symbol = %symbol, error = %error, "가격 조회 실패");
                    continue;
                }
            };

            // 조회 중에 청산된 포지션은 건너뜀
            let updated = {
                let mut positions = self.positions.write().await;
                positions.get_mut(&key).map(|position| {
                    position.update_price(price);
                    position.clone()
                })
            };

            if let Some(position) = updated {
                if position.stop_loss_hit() {
                    warn!(
                        symbol = %position.symbol,
                        current_price = %position.current_price,
                        stop_loss = ?position.stop_loss,
                        "손절 가격 도달"
                    );
                }
                if position.take_profit_hit() {
                    info!(
                        symbol = %position.symbol,
                        current_price = %position.current_price,
                        take_profit = ?position.take_profit,
                        "익절 가격 도달"
                    );
                }
                self.notifier.emit(EngineEvent::PositionUpdated(position)).await;
            }
        }
    }

    // ==================== 조회 ====================

    /// 모든 오픈 포지션을 반환합니다.
    pub async fn open_positions(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    /// (거래소, 심볼)로 포지션을 조회합니다.
    pub async fn get_position(&self, exchange: &str, symbol: &str) -> Option<Position> {
        let key = PositionKey::new(exchange, symbol);
        self.positions.read().await.get(&key).cloned()
    }

    /// 오픈 포지션 수를 반환합니다.
    pub async fn open_position_count(&self) -> usize {
        self.positions.read().await.len()
    }

    /// 포지션 요약을 반환합니다.
    pub async fn summary(&self) -> PositionSummary {
        let positions = self.open_positions().await;
        PositionSummary::from_positions(&positions)
    }
}

#[async_trait]
impl FillHandler for PositionTracker {
    async fn on_fill(&self, order: &Order) {
        self.apply_fill(order).await;
        // 체결 직후 전체 포지션의 가격과 손절/익절 플래그를 갱신
        self.refresh_prices().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exec_broker::{SimConfig, SimulatedBroker};
    use exec_core::{OrderRequest, OrderStatusType, Symbol};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol::crypto("BTC", "USDT")
    }

    fn tracker_with_price(price: Decimal) -> PositionTracker {
        let broker = Arc::new(SimulatedBroker::new(
            SimConfig::default().with_price(&btc(), price),
        ));
        PositionTracker::new(broker, Arc::new(EventNotifier::new()), RiskSettings::default())
    }

    fn filled_order(side: Side, quantity: Decimal, price: Decimal) -> Order {
        let request = match side {
            Side::Buy => OrderRequest::market_buy(btc(), quantity),
            Side::Sell => OrderRequest::market_sell(btc(), quantity),
        };
        let mut order = Order::from_request(request, "simulated");
        order.status = OrderStatusType::Filled;
        order.apply_fill_report(quantity, Some(price));
        order
    }

    #[tokio::test]
    async fn test_buy_fill_opens_position() {
        let tracker = tracker_with_price(dec!(50000));

        tracker.apply_fill(&filled_order(Side::Buy, dec!(0.02), dec!(50000))).await;

        let position = tracker.get_position("simulated", "BTC/USDT").await.unwrap();
        assert_eq!(position.quantity, dec!(0.02));
        assert_eq!(position.entry_price, dec!(50000));
        // 기본 손절 2%, 익절 5%
        assert_eq!(position.stop_loss, Some(dec!(49000)));
        assert_eq!(position.take_profit, Some(dec!(52500)));
    }

    #[tokio::test]
    async fn test_buy_fill_replaces_existing_position() {
        let tracker = tracker_with_price(dec!(50000));

        tracker.apply_fill(&filled_order(Side::Buy, dec!(0.02), dec!(50000))).await;
        tracker.apply_fill(&filled_order(Side::Buy, dec!(0.01), dec!(52000))).await;

        // 평단 계산 없이 대체됨
        let position = tracker.get_position("simulated", "BTC/USDT").await.unwrap();
        assert_eq!(position.quantity, dec!(0.01));
        assert_eq!(position.entry_price, dec!(52000));
        assert_eq!(tracker.open_position_count().await, 1);
    }

    #[tokio::test]
    async fn test_sell_fill_closes_position() {
        let tracker = tracker_with_price(dec!(50000));

        tracker.apply_fill(&filled_order(Side::Buy, dec!(0.02), dec!(50000))).await;
        tracker.apply_fill(&filled_order(Side::Sell, dec!(0.02), dec!(55000))).await;

        assert_eq!(tracker.open_position_count().await, 0);
        assert!(tracker.get_position("simulated", "BTC/USDT").await.is_none());
    }

    #[tokio::test]
    async fn test_close_event_carries_realized_pnl() {
        let broker = Arc::new(SimulatedBroker::new(
            SimConfig::default().with_price(&btc(), dec!(50000)),
        ));
        let notifier = Arc::new(EventNotifier::new());
        let tracker =
            PositionTracker::new(broker, notifier.clone(), RiskSettings::default());
        let mut events = notifier.subscribe(16).await;

        tracker.apply_fill(&filled_order(Side::Buy, dec!(0.02), dec!(50000))).await;
        tracker.apply_fill(&filled_order(Side::Sell, dec!(0.02), dec!(55000))).await;

        let opened = events.try_recv().unwrap();
        assert_eq!(opened.kind(), "position-opened");

        let closed = events.try_recv().unwrap();
        match closed {
            EngineEvent::PositionClosed {
                position,
                realized_pnl,
            } => {
                // (55000 - 50000) * 0.02 = 100
                assert_eq!(realized_pnl, dec!(100));
                assert_eq!(position.quantity, dec!(0.02));
            }
            other => panic!("unexpected event: {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_sell_without_position_is_ignored() {
        let tracker = tracker_with_price(dec!(50000));

        tracker.apply_fill(&filled_order(Side::Sell, dec!(0.02), dec!(55000))).await;
        assert_eq!(tracker.open_position_count().await, 0);
    }

    #[tokio::test]
    async fn test_refresh_prices_updates_and_flags() {
        let broker = Arc::new(SimulatedBroker::new(
            SimConfig::default().with_price(&btc(), dec!(50000)),
        ));
        let notifier = Arc::new(EventNotifier::new());
        let tracker = PositionTracker::new(
            broker.clone(),
            notifier.clone(),
            RiskSettings::default(),
        );

        tracker.apply_fill(&filled_order(Side::Buy, dec!(0.02), dec!(50000))).await;
        let mut events = notifier.subscribe(16).await;

        // 가격이 손절선 아래로 하락
        broker.set_price(&btc(), dec!(48000)).await;
        tracker.refresh_prices().await;

        let position = tracker.get_position("simulated", "BTC/USDT").await.unwrap();
        assert_eq!(position.current_price, dec!(48000));
        assert!(position.stop_loss_hit());
        // 플래그만 설정될 뿐 자동 청산은 하지 않음
        assert_eq!(tracker.open_position_count().await, 1);

        let event = events.try_recv().unwrap();
        assert_eq!(event.kind(), "position-updated");
    }
}
