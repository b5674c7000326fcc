//! 엔진 이벤트 및 팬아웃.
//!
//! 네 가지 이벤트 채널을 제공합니다: 주문 상태 변경, 포지션 오픈,
//! 포지션 종료, 포지션 갱신. 전달은 인프로세스 best-effort 방식입니다:
//! 구독자마다 독립 채널을 가지므로 실패하거나 느린 구독자가 발행 작업을
//! 중단시키지 못하며, 같은 주문/포지션에 대한 이벤트 순서는 구독자별로
//! 보존됩니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use exec_core::{Order, Position};

/// 엔진이 발행하는 생명주기/포지션 이벤트.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// 주문 상태가 변경됨 (제출, 체결 진행, 취소, 거부 포함)
    OrderStatusChanged(Order),
    /// 매수 체결로 포지션이 열림
    PositionOpened(Position),
    /// 매도 체결로 포지션이 닫힘 (제거 직전 스냅샷 포함)
    PositionClosed {
        position: Position,
        realized_pnl: Decimal,
    },
    /// 가격 갱신으로 포지션이 업데이트됨
    PositionUpdated(Position),
}

impl EngineEvent {
    /// 이벤트 채널 이름을 반환합니다.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::OrderStatusChanged(_) => "order-status-changed",
            EngineEvent::PositionOpened(_) => "position-opened",
            EngineEvent::PositionClosed { .. } => "position-closed",
            EngineEvent::PositionUpdated(_) => "position-updated",
        }
    }
}

/// 구독자별 채널로 이벤트를 전달하는 노티파이어.
#[derive(Debug, Default)]
pub struct EventNotifier {
    senders: RwLock<Vec<mpsc::Sender<EngineEvent>>>,
}

impl EventNotifier {
    /// 새 노티파이어를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 이벤트를 구독하고 수신기를 반환합니다.
    pub async fn subscribe(&self, buffer_size: usize) -> mpsc::Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel(buffer_size);
        self.senders.write().await.push(tx);
        rx
    }

    /// 모든 구독자에게 이벤트를 전달합니다.
    ///
    /// 연결이 끊긴 구독자는 제거되며, 버퍼가 가득 찬 구독자에 대해서는
    /// 해당 이벤트를 버립니다 (발행 작업은 절대 블로킹되지 않음).
    pub async fn emit(&self, event: EngineEvent) {
        let mut senders = self.senders.write().await;
        senders.retain(|tx| !tx.is_closed());

        for tx in senders.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event.clone()) {
                debug!(kind = event.kind(), "구독자 버퍼가 가득 차 이벤트를 버림");
            }
        }
    }

    /// 현재 구독자 수를 반환합니다.
    pub async fn subscriber_count(&self) -> usize {
        self.senders.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exec_core::{OrderRequest, Symbol};
    use rust_decimal::Decimal;

    fn order_event() -> EngineEvent {
        let symbol = Symbol::crypto("BTC", "USDT");
        let order = Order::from_request(OrderRequest::market_buy(symbol, Decimal::ONE), "simulated");
        EngineEvent::OrderStatusChanged(order)
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_in_order() {
        let notifier = EventNotifier::new();
        let mut rx1 = notifier.subscribe(8).await;
        let mut rx2 = notifier.subscribe(8).await;

        let first = order_event();
        let second = order_event();
        notifier.emit(first.clone()).await;
        notifier.emit(second.clone()).await;

        for rx in [&mut rx1, &mut rx2] {
            let a = rx.try_recv().unwrap();
            let b = rx.try_recv().unwrap();
            match (&a, &first, &b, &second) {
                (
                    EngineEvent::OrderStatusChanged(a),
                    EngineEvent::OrderStatusChanged(first),
                    EngineEvent::OrderStatusChanged(b),
                    EngineEvent::OrderStatusChanged(second),
                ) => {
                    assert_eq!(a.id, first.id);
                    assert_eq!(b.id, second.id);
                }
                _ => panic!("unexpected event kinds"),
            }
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_break_emit() {
        let notifier = EventNotifier::new();
        let rx = notifier.subscribe(8).await;
        let mut live = notifier.subscribe(8).await;
        drop(rx);

        notifier.emit(order_event()).await;

        assert!(live.try_recv().is_ok());
        assert_eq!(notifier.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_event_without_blocking() {
        let notifier = EventNotifier::new();
        let mut rx = notifier.subscribe(1).await;

        notifier.emit(order_event()).await;
        notifier.emit(order_event()).await; // 버퍼 초과 - 버려짐

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
