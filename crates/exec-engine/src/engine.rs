//! 호출자 대상 실행 엔진 파사드.
//!
//! 전송 계층에 독립적인 API를 제공합니다: 주문 제출/취소/상태 조회,
//! 리스크 검증, 포지션 조회, 잔고 조회, 이벤트 구독. 브로커와 저장소
//! 구현은 프로세스 시작 시 주입되며 엔진 내부에는 이름 기반 분기가
//! 없습니다.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;
use uuid::Uuid;

use exec_broker::Broker;
use exec_core::{EngineConfig, Order, OrderRequest, Position, PositionSummary};
use exec_risk::{RiskEvaluator, RiskSettings, RiskValidation};

use crate::events::{EngineEvent, EventNotifier};
use crate::lifecycle::{EngineError, FillHandler, OrderLifecycleManager};
use crate::positions::PositionTracker;
use crate::store::OrderStore;

/// 주문 실행 엔진.
///
/// 내부 구성 요소를 하나로 묶은 핸들입니다. 복제가 저렴하므로 여러 태스크에
/// 자유롭게 전달할 수 있습니다.
#[derive(Clone)]
pub struct ExecutionEngine {
    lifecycle: Arc<OrderLifecycleManager>,
    tracker: Arc<PositionTracker>,
    notifier: Arc<EventNotifier>,
    config: EngineConfig,
}

impl ExecutionEngine {
    /// 주입된 브로커/저장소/리스크 설정으로 엔진을 구성합니다.
    ///
    /// `starting_balance`는 리스크 평가에 쓰이는 잔고 스냅샷의 초기값이며,
    /// 이후 `get_balance` 호출과 조정 스윕이 브로커에서 갱신합니다.
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn OrderStore>,
        risk_settings: RiskSettings,
        config: EngineConfig,
        starting_balance: Decimal,
    ) -> Self {
        let notifier = Arc::new(EventNotifier::new());
        let tracker = Arc::new(PositionTracker::new(
            broker.clone(),
            notifier.clone(),
            risk_settings.clone(),
        ));
        let evaluator = RiskEvaluator::new(risk_settings);
        let lifecycle = Arc::new(OrderLifecycleManager::new(
            broker,
            store,
            evaluator,
            notifier.clone(),
            tracker.clone() as Arc<dyn FillHandler>,
            tracker.clone(),
            config.clone(),
            starting_balance,
        ));

        Self {
            lifecycle,
            tracker,
            notifier,
            config,
        }
    }

    // ==================== 주문 ====================

    /// 주문을 제출합니다. 같은 멱등성 키로는 최대 한 번만 제출됩니다.
    pub async fn submit_order(&self, request: OrderRequest) -> Result<Order, EngineError> {
        self.lifecycle.submit_order(request).await
    }

    /// 주문을 취소합니다.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order, EngineError> {
        self.lifecycle.cancel_order(order_id).await
    }

    /// 주문 상태를 조회합니다. 미완료 주문은 반환 전에 조정됩니다.
    pub async fn get_order_status(&self, order_id: Uuid) -> Result<Order, EngineError> {
        self.lifecycle.get_order_status(order_id).await
    }

    /// 부수효과 없이 주문을 리스크 정책에 대해서만 검증합니다.
    pub async fn validate_order(
        &self,
        request: &OrderRequest,
    ) -> Result<RiskValidation, EngineError> {
        self.lifecycle.validate_order(request).await
    }

    /// 모든 미완료 주문을 브로커 상태와 조정합니다.
    pub async fn reconcile_active_orders(&self) {
        self.lifecycle.reconcile_active_orders().await;
    }

    // ==================== 포지션 ====================

    /// 모든 오픈 포지션을 반환합니다.
    pub async fn open_positions(&self) -> Vec<Position> {
        self.tracker.open_positions().await
    }

    /// (거래소, 심볼)로 포지션을 조회합니다.
    pub async fn get_position(&self, exchange: &str, symbol: &str) -> Option<Position> {
        self.tracker.get_position(exchange, symbol).await
    }

    /// 포지션 요약을 반환합니다.
    pub async fn position_summary(&self) -> PositionSummary {
        self.tracker.summary().await
    }

    /// 모든 오픈 포지션의 가격을 갱신합니다.
    pub async fn refresh_prices(&self) {
        self.tracker.refresh_prices().await;
    }

    // ==================== 잔고 / 이벤트 ====================

    /// 브로커에서 호가 통화 잔고를 조회합니다. 리스크 평가용 스냅샷도 함께
    /// 갱신됩니다.
    pub async fn get_balance(&self) -> Result<Decimal, EngineError> {
        self.lifecycle.refresh_balance().await
    }

    /// 엔진 이벤트를 구독합니다.
    pub async fn subscribe(&self, buffer_size: usize) -> mpsc::Receiver<EngineEvent> {
        self.notifier.subscribe(buffer_size).await
    }

    // ==================== 백그라운드 태스크 ====================

    /// 조정 스윕과 가격 갱신 백그라운드 태스크를 시작합니다.
    ///
    /// 모든 미완료 주문은 `reconcile_interval`마다, 모든 오픈 포지션 가격은
    /// `price_refresh_interval`마다 갱신됩니다. 반환된 핸들을 drop하거나
    /// abort하면 태스크가 종료됩니다.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let lifecycle = self.lifecycle.clone();
        let reconcile_interval = self.config.reconcile_interval();
        let reconcile_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reconcile_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(error) = lifecycle.refresh_balance().await {
                    warn!(error = %error, "잔고 갱신 실패");
                }
                lifecycle.reconcile_active_orders().await;
            }
        });

        let tracker = self.tracker.clone();
        let refresh_interval = self.config.price_refresh_interval();
        let price_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tracker.refresh_prices().await;
            }
        });

        vec![reconcile_task, price_task]
    }
}
