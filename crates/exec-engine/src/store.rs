//! 주문 저장소 추상화.
//!
//! 영속 기술은 이 엔진의 관심사가 아닙니다. `OrderStore`는 내구성 있는
//! 주문 저장소가 지원해야 하는 연산만 정의하며, 기본 제공 구현은
//! 인메모리 저장소입니다. `client_order_id`의 전역 고유성은 저장소가
//! 원자적으로 보장해야 합니다.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use exec_core::Order;

/// 저장소 에러 타입.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Order already exists: {0}")]
    DuplicateOrder(Uuid),

    #[error("Client order id already exists: {0}")]
    DuplicateClientOrderId(String),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// 내구성 있는 주문 저장소 계약.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// 새 주문을 저장합니다. 내부 ID 또는 클라이언트 주문 ID가 이미
    /// 존재하면 실패합니다.
    async fn create(&self, order: &Order) -> Result<(), StoreError>;

    /// 기존 주문을 갱신합니다.
    async fn update(&self, order: &Order) -> Result<(), StoreError>;

    /// 내부 ID로 주문을 조회합니다.
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// 클라이언트 주문 ID (멱등성 키)로 주문을 조회합니다.
    async fn get_by_client_order_id(&self, client_order_id: &str)
        -> Result<Option<Order>, StoreError>;

    /// 최종 상태가 아닌 모든 주문을 조회합니다.
    async fn get_active_orders(&self) -> Result<Vec<Order>, StoreError>;
}

/// 인덱스를 포함한 인메모리 저장 상태.
#[derive(Debug, Default)]
struct MemoryIndex {
    orders: HashMap<Uuid, Order>,
    by_client_id: HashMap<String, Uuid>,
}

/// 인메모리 주문 저장소.
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    inner: RwLock<MemoryIndex>,
}

impl MemoryOrderStore {
    /// 새 인메모리 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn create(&self, order: &Order) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        if inner.orders.contains_key(&order.id) {
            return Err(StoreError::DuplicateOrder(order.id));
        }
        if inner.by_client_id.contains_key(&order.client_order_id) {
            return Err(StoreError::DuplicateClientOrderId(
                order.client_order_id.clone(),
            ));
        }

        inner
            .by_client_id
            .insert(order.client_order_id.clone(), order.id);
        inner.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update(&self, order: &Order) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        if !inner.orders.contains_key(&order.id) {
            return Err(StoreError::OrderNotFound(order.id));
        }
        inner.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.inner.read().await.orders.get(&id).cloned())
    }

    async fn get_by_client_order_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_client_id
            .get(client_order_id)
            .and_then(|id| inner.orders.get(id))
            .cloned())
    }

    async fn get_active_orders(&self) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .orders
            .values()
            .filter(|o| o.status.is_active())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exec_core::{OrderRequest, OrderStatusType, Symbol};
    use rust_decimal::Decimal;

    fn test_order(client_id: &str) -> Order {
        let symbol = Symbol::crypto("BTC", "USDT");
        Order::from_request(
            OrderRequest::market_buy(symbol, Decimal::ONE).with_client_id(client_id),
            "simulated",
        )
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let store = MemoryOrderStore::new();
        let order = test_order("cli-1");

        store.create(&order).await.unwrap();

        let by_id = store.get_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(by_id.client_order_id, "cli-1");

        let by_key = store.get_by_client_order_id("cli-1").await.unwrap().unwrap();
        assert_eq!(by_key.id, order.id);
    }

    #[tokio::test]
    async fn test_duplicate_client_order_id_rejected() {
        let store = MemoryOrderStore::new();
        store.create(&test_order("cli-1")).await.unwrap();

        let result = store.create(&test_order("cli-1")).await;
        assert!(matches!(
            result,
            Err(StoreError::DuplicateClientOrderId(key)) if key == "cli-1"
        ));
    }

    #[tokio::test]
    async fn test_update_unknown_order_fails() {
        let store = MemoryOrderStore::new();
        let order = test_order("cli-1");

        let result = store.update(&order).await;
        assert!(matches!(result, Err(StoreError::OrderNotFound(id)) if id == order.id));
    }

    #[tokio::test]
    async fn test_active_orders_excludes_terminal() {
        let store = MemoryOrderStore::new();

        let active = test_order("cli-1");
        store.create(&active).await.unwrap();

        let mut terminal = test_order("cli-2");
        store.create(&terminal).await.unwrap();
        terminal.status = OrderStatusType::Filled;
        store.update(&terminal).await.unwrap();

        let result = store.get_active_orders().await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, active.id);
    }
}
