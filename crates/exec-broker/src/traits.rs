//! 브로커 trait 정의.

use async_trait::async_trait;
use exec_core::{OrderRequest, OrderStatus, Price, Symbol};

use crate::BrokerError;

/// 브로커 작업을 위한 Result 타입.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// 통합 브로커 인터페이스.
///
/// 모든 구현은 이 계약을 동일하게 준수해야 합니다: Decimal 정밀도 유지,
/// 공통 방향/유형/상태 어휘 사용. 엔진은 프로세스 시작 시 주입된 단일
/// 구현만 사용합니다.
#[async_trait]
pub trait Broker: Send + Sync {
    /// 브로커 이름 반환 (주문의 거래소 필드에 기록됨).
    fn name(&self) -> &str;

    /// 새 주문 제출. 거래소가 할당한 주문 ID와 초기 상태를 반환합니다.
    async fn place_order(&self, request: &OrderRequest) -> BrokerResult<OrderStatus>;

    /// 주문 취소.
    async fn cancel_order(&self, symbol: &Symbol, exchange_order_id: &str)
        -> BrokerResult<OrderStatus>;

    /// 주문 상태 조회.
    async fn get_order_status(
        &self,
        symbol: &Symbol,
        exchange_order_id: &str,
    ) -> BrokerResult<OrderStatus>;

    /// 심볼의 현재 가격 조회.
    async fn get_current_price(&self, symbol: &Symbol) -> BrokerResult<Price>;

    /// 특정 통화의 잔고 조회.
    async fn get_balance(&self, currency: &str) -> BrokerResult<Price>;
}
