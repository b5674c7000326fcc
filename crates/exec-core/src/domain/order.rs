//! 주문 타입 및 상태 머신.
//!
//! 이 모듈은 실행 엔진의 주문 관련 타입을 정의합니다:
//! - `Side` - 주문 방향 (매수/매도)
//! - `OrderType` - 주문 유형 (시장가, 지정가 등)
//! - `OrderStatusType` - 주문 상태 머신
//! - `OrderStatus` - 브로커가 반환하는 상태 응답
//! - `OrderRequest` - 주문 요청
//! - `Order` - 주문 엔티티
//!
//! 상태 머신: `Pending → Open → {PartiallyFilled ⇄ Open} → {Filled |
//! Cancelled | Rejected | Expired}`. 오른쪽 네 상태는 최종이며, 최종 상태에
//! 도달한 주문은 더 이상 변경되지 않습니다.

use crate::types::{Price, Quantity, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 주문 방향 (매수 또는 매도).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// 매수
    Buy,
    /// 매도
    Sell,
}

impl Side {
    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// 시장가 주문 - 현재 시장 가격으로 즉시 체결
    Market,
    /// 지정가 주문
    Limit,
    /// 손절 주문
    StopLoss,
    /// 지정가 손절 주문
    StopLimit,
    /// 익절 주문
    TakeProfit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::StopLoss => write!(f, "STOP_LOSS"),
            OrderType::StopLimit => write!(f, "STOP_LIMIT"),
            OrderType::TakeProfit => write!(f, "TAKE_PROFIT"),
        }
    }
}

/// 주문 상태 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatusType {
    /// 주문 생성됨 (아직 제출되지 않음)
    Pending,
    /// 거래소에 제출됨 (대기 중)
    Open,
    /// 부분 체결됨
    PartiallyFilled,
    /// 전량 체결됨
    Filled,
    /// 사용자 또는 시스템에 의해 취소됨
    Cancelled,
    /// 검증 또는 거래소에서 거부됨
    Rejected,
    /// 유효 기간 만료
    Expired,
}

impl OrderStatusType {
    /// 주문이 최종 상태인지 확인합니다.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OrderStatusType::Filled
                | OrderStatusType::Cancelled
                | OrderStatusType::Rejected
                | OrderStatusType::Expired
        )
    }

    /// 주문이 여전히 활성 상태인지 확인합니다.
    pub fn is_active(&self) -> bool {
        !self.is_final()
    }
}

impl std::fmt::Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatusType::Pending => write!(f, "PENDING"),
            OrderStatusType::Open => write!(f, "OPEN"),
            OrderStatusType::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatusType::Filled => write!(f, "FILLED"),
            OrderStatusType::Cancelled => write!(f, "CANCELLED"),
            OrderStatusType::Rejected => write!(f, "REJECTED"),
            OrderStatusType::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// 브로커가 반환하는 주문 상태 응답.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatus {
    /// 거래소 주문 ID
    pub order_id: String,
    /// 클라이언트 주문 ID (있는 경우)
    pub client_order_id: Option<String>,
    /// 현재 상태
    pub status: OrderStatusType,
    /// 체결된 수량
    pub filled_quantity: Quantity,
    /// 평균 체결 가격 (체결이 있는 경우)
    pub average_price: Option<Price>,
    /// 마지막 업데이트 시각
    pub updated_at: DateTime<Utc>,
}

/// 주문 유효 기간.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// 취소될 때까지 유효 (Good Till Cancelled)
    GTC,
    /// 즉시 체결 또는 취소 (Immediate Or Cancel)
    IOC,
    /// 전량 체결 또는 취소 (Fill Or Kill)
    FOK,
}

/// 새 주문 생성을 위한 주문 요청.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// 거래 심볼
    pub symbol: Symbol,
    /// 주문 방향
    pub side: Side,
    /// 주문 유형
    pub order_type: OrderType,
    /// 거래 수량
    pub quantity: Quantity,
    /// 지정가 (지정가 주문에 필수)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    /// 스톱 가격 (스톱 주문용)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Price>,
    /// 주문 유효 기간
    pub time_in_force: TimeInForce,
    /// 클라이언트 주문 ID (멱등성 키)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
    /// 이 주문을 생성한 전략
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
}

impl OrderRequest {
    /// 시장가 매수 주문을 생성합니다.
    pub fn market_buy(symbol: Symbol, quantity: Quantity) -> Self {
        Self {
            symbol,
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: TimeInForce::GTC,
            client_order_id: None,
            strategy_id: None,
        }
    }

    /// 시장가 매도 주문을 생성합니다.
    pub fn market_sell(symbol: Symbol, quantity: Quantity) -> Self {
        Self {
            side: Side::Sell,
            ..Self::market_buy(symbol, quantity)
        }
    }

    /// 지정가 매수 주문을 생성합니다.
    pub fn limit_buy(symbol: Symbol, quantity: Quantity, price: Price) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            ..Self::market_buy(symbol, quantity)
        }
    }

    /// 지정가 매도 주문을 생성합니다.
    pub fn limit_sell(symbol: Symbol, quantity: Quantity, price: Price) -> Self {
        Self {
            side: Side::Sell,
            ..Self::limit_buy(symbol, quantity, price)
        }
    }

    /// 전략 ID를 설정합니다.
    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    /// 클라이언트 주문 ID를 설정합니다.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_order_id = Some(client_id.into());
        self
    }

    /// 스톱 가격을 설정합니다.
    pub fn with_stop_price(mut self, stop_price: Price) -> Self {
        self.stop_price = Some(stop_price);
        self
    }

    /// 클라이언트 주문 ID가 없으면 생성해서 채웁니다.
    ///
    /// 멱등성 키는 모든 주문에 필수입니다. 호출자가 키를 주지 않은 경우
    /// 여기서 생성된 키가 재시도 안전성의 기준이 됩니다.
    pub fn ensure_client_order_id(mut self) -> Self {
        if self.client_order_id.is_none() {
            self.client_order_id = Some(format!("ord-{}", Uuid::new_v4().simple()));
        }
        self
    }
}

/// 제출된 주문을 나타내는 주문 엔티티.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// 내부 주문 ID (생성 후 불변)
    pub id: Uuid,
    /// 거래소 이름
    pub exchange: String,
    /// 거래소 주문 ID (제출 전에는 None)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_order_id: Option<String>,
    /// 클라이언트 주문 ID (멱등성 키, 전역 고유)
    pub client_order_id: String,
    /// 거래 심볼
    pub symbol: Symbol,
    /// 주문 방향
    pub side: Side,
    /// 주문 유형
    pub order_type: OrderType,
    /// 요청 수량
    pub quantity: Quantity,
    /// 지정가
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    /// 스톱 가격
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Price>,
    /// 현재 상태
    pub status: OrderStatusType,
    /// 체결된 수량 (0 <= filled <= quantity)
    pub filled_quantity: Quantity,
    /// 평균 체결 가격
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_fill_price: Option<Price>,
    /// 주문 유효 기간
    pub time_in_force: TimeInForce,
    /// 이 주문을 생성한 전략
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
    /// 생성 타임스탬프
    pub created_at: DateTime<Utc>,
    /// 마지막 업데이트 타임스탬프
    pub updated_at: DateTime<Utc>,
    /// 거래소 제출 타임스탬프
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    /// 최종 상태 도달 타임스탬프
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    /// 추가 메타데이터
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Order {
    /// 요청으로부터 새 주문을 생성합니다.
    ///
    /// 요청에 클라이언트 주문 ID가 없으면 여기서 생성됩니다.
    pub fn from_request(request: OrderRequest, exchange: impl Into<String>) -> Self {
        let request = request.ensure_client_order_id();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            exchange: exchange.into(),
            exchange_order_id: None,
            client_order_id: request
                .client_order_id
                .unwrap_or_else(|| format!("ord-{}", Uuid::new_v4().simple())),
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            stop_price: request.stop_price,
            status: OrderStatusType::Pending,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            time_in_force: request.time_in_force,
            strategy_id: request.strategy_id,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            closed_at: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// 남은 체결 수량을 반환합니다.
    pub fn remaining_quantity(&self) -> Quantity {
        self.quantity - self.filled_quantity
    }

    /// 주문이 전량 체결되었는지 확인합니다.
    pub fn is_filled(&self) -> bool {
        self.status == OrderStatusType::Filled
    }

    /// 주문이 활성 상태인지 확인합니다.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// 주문의 명목 가치를 계산합니다 (지정가 주문만).
    pub fn notional_value(&self) -> Option<Decimal> {
        self.price.map(|p| p * self.quantity)
    }

    /// 브로커가 보고한 체결 진행 상황을 반영합니다.
    ///
    /// `filled_quantity <= quantity` 불변식이 항상 유지되도록
    /// 보고된 값을 요청 수량으로 제한합니다.
    pub fn apply_fill_report(&mut self, filled: Quantity, average_price: Option<Price>) {
        self.filled_quantity = filled.clamp(Decimal::ZERO, self.quantity);
        if average_price.is_some() {
            self.average_fill_price = average_price;
        }
        self.updated_at = Utc::now();
    }

    /// 주문을 거부 상태로 전환하고 사유를 메타데이터에 기록합니다.
    pub fn set_rejected(&mut self, reason: &str) {
        let now = Utc::now();
        self.status = OrderStatusType::Rejected;
        self.updated_at = now;
        self.closed_at = Some(now);
        match &mut self.metadata {
            serde_json::Value::Object(map) => {
                map.insert("reject_reason".to_string(), serde_json::json!(reason));
            }
            _ => {
                self.metadata = serde_json::json!({ "reject_reason": reason });
            }
        }
    }
}
