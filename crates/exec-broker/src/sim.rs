//! 시뮬레이션 브로커 구현.
//!
//! 모의투자와 테스트를 위해 `Broker` 계약을 인프로세스에서 구현합니다.
//! 시장가 주문은 게시된 가격에 즉시 체결되고, 지정가/스톱 주문은
//! `set_price`로 가격이 교차할 때까지 대기합니다. `fill_order`로 부분 체결을
//! 강제할 수 있습니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use exec_core::{OrderRequest, OrderStatus, OrderStatusType, OrderType, Price, Quantity, Side, Symbol};

use crate::traits::{Broker, BrokerResult};
use crate::BrokerError;

/// 시뮬레이션 브로커 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// 자산별 초기 잔고
    pub initial_balances: HashMap<String, Decimal>,
    /// 심볼별 초기 가격 ("BASE/QUOTE" 형식 키)
    pub initial_prices: HashMap<String, Decimal>,
    /// 시장가 주문의 슬리피지율 (예: 0.0005 = 0.05%)
    pub slippage_rate: Decimal,
}

impl Default for SimConfig {
    fn default() -> Self {
        let mut initial_balances = HashMap::new();
        initial_balances.insert("USDT".to_string(), Decimal::from(10000));

        Self {
            initial_balances,
            initial_prices: HashMap::new(),
            slippage_rate: Decimal::ZERO,
        }
    }
}

impl SimConfig {
    /// 자산의 초기 잔고를 설정합니다.
    pub fn with_balance(mut self, asset: &str, amount: Decimal) -> Self {
        self.initial_balances.insert(asset.to_string(), amount);
        self
    }

    /// 심볼의 초기 가격을 설정합니다.
    pub fn with_price(mut self, symbol: &Symbol, price: Decimal) -> Self {
        self.initial_prices.insert(symbol.to_standard_string(), price);
        self
    }

    /// 슬리피지율을 설정합니다.
    pub fn with_slippage_rate(mut self, rate: Decimal) -> Self {
        self.slippage_rate = rate;
        self
    }
}

/// 시뮬레이션 브로커가 추적하는 주문 상태.
#[derive(Debug, Clone)]
struct SimOrder {
    exchange_order_id: String,
    request: OrderRequest,
    status: OrderStatusType,
    filled_quantity: Quantity,
    average_price: Option<Price>,
    updated_at: DateTime<Utc>,
}

impl SimOrder {
    fn to_status(&self) -> OrderStatus {
        OrderStatus {
            order_id: self.exchange_order_id.clone(),
            client_order_id: self.request.client_order_id.clone(),
            status: self.status,
            filled_quantity: self.filled_quantity,
            average_price: self.average_price,
            updated_at: self.updated_at,
        }
    }
}

/// 내부 브로커 상태.
#[derive(Debug)]
struct SimState {
    balances: HashMap<String, Decimal>,
    prices: HashMap<String, Decimal>,
    orders: HashMap<String, SimOrder>,
    next_order_seq: u64,
}

/// 모의투자 및 테스트를 위한 시뮬레이션 브로커.
pub struct SimulatedBroker {
    config: SimConfig,
    state: Arc<RwLock<SimState>>,
}

impl SimulatedBroker {
    /// 새 시뮬레이션 브로커를 생성합니다.
    pub fn new(config: SimConfig) -> Self {
        let state = SimState {
            balances: config.initial_balances.clone(),
            prices: config.initial_prices.clone(),
            orders: HashMap::new(),
            next_order_seq: 1,
        };

        Self {
            config,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// 심볼의 가격을 갱신하고, 교차된 대기 주문을 체결합니다.
    pub async fn set_price(&self, symbol: &Symbol, price: Decimal) {
        let key = symbol.to_standard_string();
        let mut state = self.state.write().await;
        state.prices.insert(key.clone(), price);

        // 이 심볼의 대기 주문 중 트리거된 것을 체결
        let triggered: Vec<String> = state
            .orders
            .values()
            .filter(|o| {
                o.status.is_active()
                    && o.request.symbol.to_standard_string() == key
                    && Self::fill_price_if_triggered(&o.request, price).is_some()
            })
            .map(|o| o.exchange_order_id.clone())
            .collect();

        for order_id in triggered {
            let remaining = {
                let order = &state.orders[&order_id];
                order.request.quantity - order.filled_quantity
            };
            let fill_price = {
                let order = &state.orders[&order_id];
                Self::fill_price_if_triggered(&order.request, price)
            };
            if let Some(fill_price) = fill_price {
                Self::apply_fill(&mut state, &order_id, remaining, fill_price);
            }
        }
    }

    /// 대기 주문의 일부 또는 전부를 강제로 체결합니다 (시뮬레이션 제어용).
    ///
    /// 체결 가격은 지정가가 있으면 지정가, 없으면 현재 시장 가격입니다.
    pub async fn fill_order(
        &self,
        exchange_order_id: &str,
        quantity: Quantity,
    ) -> BrokerResult<OrderStatus> {
        let mut state = self.state.write().await;

        let (remaining, fill_price) = {
            let order = state
                .orders
                .get(exchange_order_id)
                .ok_or_else(|| BrokerError::OrderNotFound(exchange_order_id.to_string()))?;

            if order.status.is_final() {
                return Err(BrokerError::OrderRejected(format!(
                    "order {} already in final state",
                    exchange_order_id
                )));
            }

            let key = order.request.symbol.to_standard_string();
            let fill_price = match order.request.price {
                Some(limit) => limit,
                None => *state
                    .prices
                    .get(&key)
                    .ok_or_else(|| BrokerError::SymbolNotFound(key.clone()))?,
            };
            (order.request.quantity - order.filled_quantity, fill_price)
        };

        let fill_quantity = quantity.min(remaining);
        if fill_quantity <= Decimal::ZERO {
            return Err(BrokerError::InvalidQuantity(quantity.to_string()));
        }

        Self::apply_fill(&mut state, exchange_order_id, fill_quantity, fill_price);
        Ok(state.orders[exchange_order_id].to_status())
    }

    /// 지금까지 생성된 주문 수를 반환합니다.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// 주문 유형/방향에 따라 현재 가격에서 체결 가능 여부와 체결 가격을 결정.
    fn fill_price_if_triggered(request: &OrderRequest, market_price: Decimal) -> Option<Decimal> {
        match request.order_type {
            OrderType::Market => Some(market_price),
            OrderType::Limit => {
                let limit = request.price?;
                match request.side {
                    Side::Buy if market_price <= limit => Some(limit),
                    Side::Sell if market_price >= limit => Some(limit),
                    _ => None,
                }
            }
            OrderType::StopLoss => {
                let stop = request.stop_price?;
                match request.side {
                    Side::Sell if market_price <= stop => Some(market_price),
                    Side::Buy if market_price >= stop => Some(market_price),
                    _ => None,
                }
            }
            OrderType::StopLimit => {
                let stop = request.stop_price?;
                let limit = request.price?;
                match request.side {
                    Side::Sell if market_price <= stop => Some(limit),
                    Side::Buy if market_price >= stop => Some(limit),
                    _ => None,
                }
            }
            OrderType::TakeProfit => {
                let target = request.stop_price?;
                match request.side {
                    Side::Sell if market_price >= target => Some(market_price),
                    Side::Buy if market_price <= target => Some(market_price),
                    _ => None,
                }
            }
        }
    }

    /// 체결을 주문과 잔고에 반영합니다.
    ///
    /// 체결 시점에 잔고가 부족하면 주문은 거부 상태가 됩니다.
    fn apply_fill(state: &mut SimState, order_id: &str, quantity: Quantity, price: Price) {
        let (symbol, side, old_filled, old_avg, total_quantity) = {
            let order = &state.orders[order_id];
            (
                order.request.symbol.clone(),
                order.request.side,
                order.filled_quantity,
                order.average_price,
                order.request.quantity,
            )
        };

        let now = Utc::now();

        // 잔고 이동
        let cost = quantity * price;
        let funded = match side {
            Side::Buy => {
                let quote = state.balances.entry(symbol.quote.clone()).or_default();
                if *quote < cost {
                    false
                } else {
                    *quote -= cost;
                    *state.balances.entry(symbol.base.clone()).or_default() += quantity;
                    true
                }
            }
            Side::Sell => {
                let base = state.balances.entry(symbol.base.clone()).or_default();
                if *base < quantity {
                    false
                } else {
                    *base -= quantity;
                    *state.balances.entry(symbol.quote.clone()).or_default() += cost;
                    true
                }
            }
        };

        let order = state
            .orders
            .get_mut(order_id)
            .expect("order looked up above");

        if !funded {
            order.status = OrderStatusType::Rejected;
            order.updated_at = now;
            debug!(order_id = %order_id, "simulated fill rejected: insufficient balance");
            return;
        }

        let new_filled = old_filled + quantity;
        order.average_price = Some(match old_avg {
            Some(avg) => (avg * old_filled + price * quantity) / new_filled,
            None => price,
        });
        order.filled_quantity = new_filled;
        order.status = if new_filled >= total_quantity {
            OrderStatusType::Filled
        } else {
            OrderStatusType::PartiallyFilled
        };
        order.updated_at = now;
    }
}

#[async_trait]
impl Broker for SimulatedBroker {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn place_order(&self, request: &OrderRequest) -> BrokerResult<OrderStatus> {
        if request.quantity <= Decimal::ZERO {
            return Err(BrokerError::InvalidQuantity(request.quantity.to_string()));
        }
        if request.order_type == OrderType::Limit && request.price.is_none() {
            return Err(BrokerError::OrderRejected(
                "limit order requires a price".to_string(),
            ));
        }

        let mut state = self.state.write().await;

        let key = request.symbol.to_standard_string();
        let market_price = *state
            .prices
            .get(&key)
            .ok_or_else(|| BrokerError::SymbolNotFound(key.clone()))?;

        // 시장가 매수는 체결 전 잔고 검증으로 주문 자체를 거부
        if request.order_type == OrderType::Market {
            let slipped = match request.side {
                Side::Buy => market_price * (Decimal::ONE + self.config.slippage_rate),
                Side::Sell => market_price * (Decimal::ONE - self.config.slippage_rate),
            };
            let available = match request.side {
                Side::Buy => state.balances.get(&request.symbol.quote).copied(),
                Side::Sell => state.balances.get(&request.symbol.base).copied(),
            }
            .unwrap_or(Decimal::ZERO);
            let required = match request.side {
                Side::Buy => request.quantity * slipped,
                Side::Sell => request.quantity,
            };
            if available < required {
                return Err(BrokerError::InsufficientBalance(format!(
                    "need {}, have {}",
                    required, available
                )));
            }
        }

        let exchange_order_id = format!("SIM-{:06}", state.next_order_seq);
        state.next_order_seq += 1;

        let order = SimOrder {
            exchange_order_id: exchange_order_id.clone(),
            request: request.clone(),
            status: OrderStatusType::Open,
            filled_quantity: Decimal::ZERO,
            average_price: None,
            updated_at: Utc::now(),
        };
        state.orders.insert(exchange_order_id.clone(), order);

        // 즉시 체결 가능한 주문 처리 (시장가, 이미 교차된 지정가)
        let immediate = {
            let price_for_fill = match request.order_type {
                OrderType::Market => Some(match request.side {
                    Side::Buy => market_price * (Decimal::ONE + self.config.slippage_rate),
                    Side::Sell => market_price * (Decimal::ONE - self.config.slippage_rate),
                }),
                _ => Self::fill_price_if_triggered(request, market_price),
            };
            price_for_fill
        };

        if let Some(fill_price) = immediate {
            Self::apply_fill(&mut state, &exchange_order_id, request.quantity, fill_price);
        }

        debug!(
            order_id = %exchange_order_id,
            symbol = %request.symbol,
            side = %request.side,
            "simulated order placed"
        );

        Ok(state.orders[&exchange_order_id].to_status())
    }

    async fn cancel_order(
        &self,
        _symbol: &Symbol,
        exchange_order_id: &str,
    ) -> BrokerResult<OrderStatus> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(exchange_order_id)
            .ok_or_else(|| BrokerError::OrderNotFound(exchange_order_id.to_string()))?;

        if order.status.is_final() {
            return Err(BrokerError::OrderRejected(format!(
                "order {} already in final state",
                exchange_order_id
            )));
        }

        order.status = OrderStatusType::Cancelled;
        order.updated_at = Utc::now();
        Ok(order.to_status())
    }

    async fn get_order_status(
        &self,
        _symbol: &Symbol,
        exchange_order_id: &str,
    ) -> BrokerResult<OrderStatus> {
        let state = self.state.read().await;
        state
            .orders
            .get(exchange_order_id)
            .map(|o| o.to_status())
            .ok_or_else(|| BrokerError::OrderNotFound(exchange_order_id.to_string()))
    }

    async fn get_current_price(&self, symbol: &Symbol) -> BrokerResult<Price> {
        let key = symbol.to_standard_string();
        let state = self.state.read().await;
        state
            .prices
            .get(&key)
            .copied()
            .ok_or(BrokerError::SymbolNotFound(key))
    }

    async fn get_balance(&self, currency: &str) -> BrokerResult<Price> {
        let state = self.state.read().await;
        Ok(state.balances.get(currency).copied().unwrap_or(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol::crypto("BTC", "USDT")
    }

    fn broker_with_price(price: Decimal) -> SimulatedBroker {
        SimulatedBroker::new(
            SimConfig::default()
                .with_balance("USDT", dec!(10000))
                .with_price(&btc(), price),
        )
    }

    #[tokio::test]
    async fn test_market_order_fills_immediately() {
        let broker = broker_with_price(dec!(50000));

        let status = broker
            .place_order(&OrderRequest::market_buy(btc(), dec!(0.02)))
            .await
            .unwrap();

        assert_eq!(status.status, OrderStatusType::Filled);
        assert_eq!(status.filled_quantity, dec!(0.02));
        assert_eq!(status.average_price, Some(dec!(50000)));

        // 잔고 이동 확인: 10000 - 1000 = 9000 USDT, 0.02 BTC
        assert_eq!(broker.get_balance("USDT").await.unwrap(), dec!(9000));
        assert_eq!(broker.get_balance("BTC").await.unwrap(), dec!(0.02));
    }

    #[tokio::test]
    async fn test_limit_order_rests_until_crossed() {
        let broker = broker_with_price(dec!(50000));

        let status = broker
            .place_order(&OrderRequest::limit_buy(btc(), dec!(0.02), dec!(49000)))
            .await
            .unwrap();
        assert_eq!(status.status, OrderStatusType::Open);

        // 가격이 지정가 아래로 떨어지면 체결
        broker.set_price(&btc(), dec!(48500)).await;

        let status = broker.get_order_status(&btc(), &status.order_id).await.unwrap();
        assert_eq!(status.status, OrderStatusType::Filled);
        assert_eq!(status.average_price, Some(dec!(49000)));
    }

    #[tokio::test]
    async fn test_partial_fill() {
        let broker = broker_with_price(dec!(50000));

        let placed = broker
            .place_order(&OrderRequest::limit_buy(btc(), dec!(0.02), dec!(49000)))
            .await
            .unwrap();
        assert_eq!(placed.status, OrderStatusType::Open);

        let status = broker.fill_order(&placed.order_id, dec!(0.01)).await.unwrap();
        assert_eq!(status.status, OrderStatusType::PartiallyFilled);
        assert_eq!(status.filled_quantity, dec!(0.01));

        let status = broker.fill_order(&placed.order_id, dec!(0.01)).await.unwrap();
        assert_eq!(status.status, OrderStatusType::Filled);
        assert_eq!(status.filled_quantity, dec!(0.02));
    }

    #[tokio::test]
    async fn test_cancel_order() {
        let broker = broker_with_price(dec!(50000));

        let placed = broker
            .place_order(&OrderRequest::limit_buy(btc(), dec!(0.02), dec!(40000)))
            .await
            .unwrap();

        let cancelled = broker.cancel_order(&btc(), &placed.order_id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatusType::Cancelled);

        // 최종 상태의 주문은 다시 취소할 수 없음
        let result = broker.cancel_order(&btc(), &placed.order_id).await;
        assert!(matches!(result, Err(BrokerError::OrderRejected(_))));
    }

    #[tokio::test]
    async fn test_insufficient_balance_rejects_market_order() {
        let broker = SimulatedBroker::new(
            SimConfig::default()
                .with_balance("USDT", dec!(100))
                .with_price(&btc(), dec!(50000)),
        );

        let result = broker
            .place_order(&OrderRequest::market_buy(btc(), dec!(1.0)))
            .await;
        assert!(matches!(result, Err(BrokerError::InsufficientBalance(_))));
        assert_eq!(broker.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_symbol() {
        let broker = broker_with_price(dec!(50000));
        let eth = Symbol::crypto("ETH", "USDT");

        let result = broker.get_current_price(&eth).await;
        assert!(matches!(result, Err(BrokerError::SymbolNotFound(_))));

        let result = broker.place_order(&OrderRequest::market_buy(eth, dec!(1.0))).await;
        assert!(matches!(result, Err(BrokerError::SymbolNotFound(_))));
    }

    #[tokio::test]
    async fn test_sell_after_buy_round_trip() {
        let broker = broker_with_price(dec!(50000));

        broker
            .place_order(&OrderRequest::market_buy(btc(), dec!(0.02)))
            .await
            .unwrap();
        broker.set_price(&btc(), dec!(55000)).await;
        let status = broker
            .place_order(&OrderRequest::market_sell(btc(), dec!(0.02)))
            .await
            .unwrap();

        assert_eq!(status.status, OrderStatusType::Filled);
        // 10000 - 1000 + 1100 = 10100 USDT
        assert_eq!(broker.get_balance("USDT").await.unwrap(), dec!(10100));
        assert_eq!(broker.get_balance("BTC").await.unwrap(), dec!(0));
    }
}
