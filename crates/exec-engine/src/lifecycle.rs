//! 주문 생명주기 관리.
//!
//! 제공 기능:
//! - 멱등성 키 기반 at-most-once 주문 제출
//! - 리스크 정책 평가 및 거부 처리
//! - 데드라인이 적용된 브로커 호출
//! - 브로커 상태와의 조정(reconciliation) 및 주기적 스윕
//! - 주문 취소
//!
//! 같은 멱등성 키에 대한 작업은 키별 비동기 가드로 직렬화되며, 서로 다른
//! 키의 작업은 완전히 병렬로 진행됩니다. 공유 상태 잠금은 브로커/저장소
//! 호출을 가로질러 유지되지 않습니다.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use exec_broker::{Broker, BrokerError};
use exec_core::{EngineConfig, Order, OrderRequest, OrderStatusType, OrderType, Price};
use exec_risk::{RiskEvaluator, RiskValidation};

use crate::events::{EngineEvent, EventNotifier};
use crate::positions::PositionTracker;
use crate::store::{OrderStore, StoreError};

/// 실행 엔진 에러 유형.
#[derive(Debug, Error)]
pub enum EngineError {
    /// 리스크 정책 거부. 사유를 조정해 재제출할 수 있습니다.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// 알 수 없는 주문 ID
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    /// 브로커 호출 실패
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// 저장소 실패
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// 제출 데드라인 초과. 결과를 알 수 없으므로 주문은 실패로 간주되지
    /// 않으며, 조정 스윕이 브로커 상태로 해소할 때까지 미결로 남습니다.
    #[error("Broker call timed out; order outcome unknown until reconciliation")]
    SubmissionTimeout,
}

/// Filled 전이의 결과를 처리하는 핸들러.
///
/// 상태 차이 감지(조정)와 체결 결과 처리(포지션 갱신)는 이 trait을 통해서만
/// 연결되어 서로 독립적으로 테스트할 수 있습니다. 조정기는 주문이 Filled로
/// 전이하는 순간 정확히 한 번 호출합니다.
#[async_trait]
pub trait FillHandler: Send + Sync {
    async fn on_fill(&self, order: &Order);
}

/// 주문 제출, 멱등성, 조정, 취소를 담당하는 생명주기 매니저.
pub struct OrderLifecycleManager {
    broker: Arc<dyn Broker>,
    store: Arc<dyn OrderStore>,
    evaluator: RiskEvaluator,
    notifier: Arc<EventNotifier>,
    fill_handler: Arc<dyn FillHandler>,
    positions: Arc<PositionTracker>,
    config: EngineConfig,
    /// 리스크 평가에 쓰는 잔고 스냅샷 (refresh_balance로 갱신)
    balance: RwLock<Decimal>,
    /// 멱등성 키별 직렬화 가드
    submission_guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OrderLifecycleManager {
    /// 새 생명주기 매니저를 생성합니다.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn OrderStore>,
        evaluator: RiskEvaluator,
        notifier: Arc<EventNotifier>,
        fill_handler: Arc<dyn FillHandler>,
        positions: Arc<PositionTracker>,
        config: EngineConfig,
        starting_balance: Decimal,
    ) -> Self {
        Self {
            broker,
            store,
            evaluator,
            notifier,
            fill_handler,
            positions,
            config,
            balance: RwLock::new(starting_balance),
            submission_guards: Mutex::new(HashMap::new()),
        }
    }

    // ==================== 주문 제출 ====================

    /// 주문을 제출합니다.
    ///
    /// 같은 `client_order_id`로는 몇 번을 호출하든 (순차든 동시든) 브로커
    /// 주문은 최대 한 번만 생성되며, 중복 호출은 저장된 주문을 그대로
    /// 반환합니다.
    pub async fn submit_order(&self, request: OrderRequest) -> Result<Order, EngineError> {
        let request = request.ensure_client_order_id();
        let client_key = request
            .client_order_id
            .clone()
            .unwrap_or_default();

        let guard = self.guard_for(&client_key).await;
        let _serialized = guard.lock().await;

        // 멱등성 단락: 같은 키로 이미 제출된 주문은 그대로 반환
        if let Some(existing) = self.store.get_by_client_order_id(&client_key).await? {
            debug!(
                client_order_id = %client_key,
                order_id = %existing.id,
                "중복 제출 감지; 기존 주문 반환"
            );
            return Ok(existing);
        }

        let mut order = Order::from_request(request.clone(), self.broker.name());
        self.store.create(&order).await?;

        // 리스크 평가. 지정가가 없으면 현재 시장 가격으로 명목 가치를 계산
        let reference_price = match order.price {
            Some(limit) => limit,
            None => match self.fetch_price(&order).await {
                Ok(price) => price,
                Err(error) => {
                    order.set_rejected(&error.to_string());
                    self.store.update(&order).await?;
                    self.notifier
                        .emit(EngineEvent::OrderStatusChanged(order.clone()))
                        .await;
                    self.release_guard(&client_key).await;
                    return Err(error);
                }
            },
        };

        let balance = *self.balance.read().await;
        let open_positions = self.positions.open_positions().await;
        let verdict = self
            .evaluator
            .evaluate(&request, reference_price, balance, &open_positions);

        if !verdict.is_valid {
            let reason = verdict.reason().to_string();
            warn!(
                order_id = %order.id,
                client_order_id = %order.client_order_id,
                reason = %reason,
                "주문이 리스크 검사에서 거부됨"
            );
            order.set_rejected(&reason);
            self.store.update(&order).await?;
            self.notifier
                .emit(EngineEvent::OrderStatusChanged(order.clone()))
                .await;
            self.release_guard(&client_key).await;
            return Err(EngineError::Validation(reason));
        }

        // 브로커 제출 (데드라인 적용)
        match timeout(self.config.broker_timeout(), self.broker.place_order(&request)).await {
            Err(_elapsed) => {
                // 결과 불명: 실패로 가정하지 않고 Pending 유지. 조정 스윕이
                // 브로커 상태를 기준으로 해소한다.
                warn!(
                    order_id = %order.id,
                    client_order_id = %order.client_order_id,
                    "주문 제출 타임아웃; 조정 대기"
                );
                Err(EngineError::SubmissionTimeout)
            }
            Ok(Err(error)) => {
                order.set_rejected(&error.to_string());
                self.store.update(&order).await?;
                self.notifier
                    .emit(EngineEvent::OrderStatusChanged(order.clone()))
                    .await;
                self.release_guard(&client_key).await;
                Err(EngineError::Broker(error))
            }
            Ok(Ok(ack)) => {
                let now = Utc::now();
                order.exchange_order_id = Some(ack.order_id.clone());
                order.status = OrderStatusType::Open;
                order.submitted_at = Some(now);
                order.updated_at = now;
                self.store.update(&order).await?;

                info!(
                    order_id = %order.id,
                    exchange_order_id = %ack.order_id,
                    symbol = %order.symbol,
                    side = %order.side,
                    quantity = %order.quantity,
                    "주문 제출됨"
                );
                self.notifier
                    .emit(EngineEvent::OrderStatusChanged(order.clone()))
                    .await;

                // 시장가 주문은 거래소에서 거의 즉시 체결되므로 짧게 기다린 뒤
                // 한 번 바로 조정한다
                if order.order_type == OrderType::Market {
                    tokio::time::sleep(self.config.market_settle_delay()).await;
                    if let Err(error) = self.reconcile_order(&mut order).await {
                        warn!(
                            order_id = %order.id,
                            error = %error,
                            "시장가 주문 즉시 조정 실패; 스윕에서 재시도"
                        );
                    }
                }

                Ok(order)
            }
        }
    }

    // ==================== 취소 ====================

    /// 주문을 취소합니다.
    ///
    /// 알 수 없는 ID면 실패하고, 이미 최종 상태면 주문을 그대로 반환합니다.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order, EngineError> {
        let order = self
            .store
            .get_by_id(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))?;

        let guard = self.guard_for(&order.client_order_id).await;
        let _serialized = guard.lock().await;

        // 가드 획득 후 최신 상태 재조회
        let mut order = self
            .store
            .get_by_id(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))?;

        if order.status.is_final() {
            return Ok(order);
        }

        if let Some(exchange_order_id) = order.exchange_order_id.clone() {
            match timeout(
                self.config.broker_timeout(),
                self.broker.cancel_order(&order.symbol, &exchange_order_id),
            )
            .await
            {
                Err(_elapsed) => {
                    // 결과 불명: 로컬 상태는 유지하고 스윕이 실제 상태로 수렴
                    warn!(order_id = %order.id, "주문 취소 타임아웃; 조정 대기");
                    return Err(EngineError::SubmissionTimeout);
                }
                Ok(Err(error)) => return Err(EngineError::Broker(error)),
                Ok(Ok(_)) => {}
            }
        }

        let now = Utc::now();
        order.status = OrderStatusType::Cancelled;
        order.closed_at = Some(now);
        order.updated_at = now;
        self.store.update(&order).await?;

        info!(order_id = %order.id, "주문 취소됨");
        self.notifier
            .emit(EngineEvent::OrderStatusChanged(order.clone()))
            .await;
        self.release_guard(&order.client_order_id).await;

        Ok(order)
    }

    // ==================== 상태 조회 ====================

    /// 주문 상태를 조회합니다.
    ///
    /// 최종 상태의 주문은 네트워크 호출 없이 저장소에서 반환되고, 미완료
    /// 주문은 반환 전에 브로커와 한 번 조정됩니다.
    pub async fn get_order_status(&self, order_id: Uuid) -> Result<Order, EngineError> {
        let order = self
            .store
            .get_by_id(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))?;

        if order.status.is_final() {
            return Ok(order);
        }

        let guard = self.guard_for(&order.client_order_id).await;
        let _serialized = guard.lock().await;

        let mut order = self
            .store
            .get_by_id(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound(order_id))?;

        if order.status.is_active() {
            // 조정 실패는 동기적으로 표면화하지 않음 - 다음 스윕에서 재시도
            if let Err(error) = self.reconcile_order(&mut order).await {
                warn!(order_id = %order.id, error = %error, "상태 조회 중 조정 실패");
            }
        }

        Ok(order)
    }

    // ==================== 조정 ====================

    /// 모든 미완료 주문을 브로커 상태와 조정합니다 (주기적 스윕).
    ///
    /// 개별 주문의 조정 실패는 로그로만 남기고 다음 스윕에서 재시도합니다.
    pub async fn reconcile_active_orders(&self) {
        let active = match self.store.get_active_orders().await {
            Ok(orders) => orders,
            Err(error) => {
                warn!(error = %error, "활성 주문 조회 실패; 스윕 건너뜀");
                return;
            }
        };

        for stored in active {
            let guard = self.guard_for(&stored.client_order_id).await;
            let _serialized = guard.lock().await;

            // 가드 획득 사이에 상태가 바뀔 수 있으므로 재조회
            let mut order = match self.store.get_by_id(stored.id).await {
                Ok(Some(order)) if order.status.is_active() => order,
                Ok(_) => continue,
                Err(error) => {
                    warn!(order_id = %stored.id, error = %error, "주문 재조회 실패");
                    continue;
                }
            };

            if let Err(error) = self.reconcile_order(&mut order).await {
                warn!(
                    order_id = %order.id,
                    error = %error,
                    "조정 실패; 다음 스윕에서 재시도"
                );
            }
        }
    }

    /// 단일 주문을 브로커 상태와 조정합니다. 호출자는 해당 주문의 키 가드를
    /// 보유해야 합니다.
    ///
    /// 상태 또는 체결 수량이 달라졌을 때만 저장/이벤트 발행이 일어나고,
    /// Filled로 전이하는 순간에만 체결 핸들러가 정확히 한 번 호출됩니다.
    async fn reconcile_order(&self, order: &mut Order) -> Result<bool, EngineError> {
        if order.status.is_final() {
            return Ok(false);
        }

        let Some(exchange_order_id) = order.exchange_order_id.clone() else {
            // 제출 결과 불명 주문은 브로커 계약(거래소 ID 기반 조회)으로는
            // 해소할 수 없다. 침묵 속에 방치하지 않도록 스윕마다 경고를 남김.
            warn!(
                order_id = %order.id,
                client_order_id = %order.client_order_id,
                "거래소 주문 ID가 없어 조정할 수 없음"
            );
            return Ok(false);
        };

        let status = match timeout(
            self.config.broker_timeout(),
            self.broker.get_order_status(&order.symbol, &exchange_order_id),
        )
        .await
        {
            Err(_elapsed) => {
                return Err(EngineError::Broker(BrokerError::Timeout(format!(
                    "get_order_status {}",
                    exchange_order_id
                ))))
            }
            Ok(Err(error)) => return Err(EngineError::Broker(error)),
            Ok(Ok(status)) => status,
        };

        let status_changed = status.status != order.status;
        let fill_changed = status.filled_quantity != order.filled_quantity;
        if !status_changed && !fill_changed {
            return Ok(false);
        }

        order.apply_fill_report(status.filled_quantity, status.average_price);
        let became_filled = status.status == OrderStatusType::Filled;
        order.status = status.status;
        if order.status.is_final() && order.closed_at.is_none() {
            order.closed_at = Some(Utc::now());
        }
        self.store.update(order).await?;

        info!(
            order_id = %order.id,
            status = %order.status,
            filled_quantity = %order.filled_quantity,
            "주문 상태 조정됨"
        );
        self.notifier
            .emit(EngineEvent::OrderStatusChanged(order.clone()))
            .await;

        if became_filled {
            self.fill_handler.on_fill(order).await;
        }
        if order.status.is_final() {
            self.release_guard(&order.client_order_id).await;
        }

        Ok(true)
    }

    // ==================== 잔고 ====================

    /// 브로커에서 잔고를 조회해 스냅샷을 갱신합니다.
    pub async fn refresh_balance(&self) -> Result<Decimal, EngineError> {
        let balance = match timeout(
            self.config.broker_timeout(),
            self.broker.get_balance(&self.config.quote_currency),
        )
        .await
        {
            Err(_elapsed) => {
                return Err(EngineError::Broker(BrokerError::Timeout(
                    "get_balance".to_string(),
                )))
            }
            Ok(Err(error)) => return Err(EngineError::Broker(error)),
            Ok(Ok(balance)) => balance,
        };

        *self.balance.write().await = balance;
        Ok(balance)
    }

    /// 현재 잔고 스냅샷을 반환합니다.
    pub async fn cached_balance(&self) -> Decimal {
        *self.balance.read().await
    }

    // ==================== 검증 전용 ====================

    /// 부수효과 없이 주문을 리스크 정책에 대해서만 평가합니다.
    pub async fn validate_order(&self, request: &OrderRequest) -> Result<RiskValidation, EngineError> {
        let reference_price = match request.price {
            Some(limit) => limit,
            None => {
                match timeout(
                    self.config.broker_timeout(),
                    self.broker.get_current_price(&request.symbol),
                )
                .await
                {
                    Err(_elapsed) => {
                        return Err(EngineError::Broker(BrokerError::Timeout(
                            "get_current_price".to_string(),
                        )))
                    }
                    Ok(Err(error)) => return Err(EngineError::Broker(error)),
                    Ok(Ok(price)) => price,
                }
            }
        };

        let balance = *self.balance.read().await;
        let open_positions = self.positions.open_positions().await;
        Ok(self
            .evaluator
            .evaluate(request, reference_price, balance, &open_positions))
    }

    // ==================== 내부 ====================

    async fn fetch_price(&self, order: &Order) -> Result<Price, EngineError> {
        match timeout(
            self.config.broker_timeout(),
            self.broker.get_current_price(&order.symbol),
        )
        .await
        {
            Err(_elapsed) => Err(EngineError::Broker(BrokerError::Timeout(format!(
                "get_current_price {}",
                order.symbol
            )))),
            Ok(Err(error)) => Err(EngineError::Broker(error)),
            Ok(Ok(price)) => Ok(price),
        }
    }

    /// 멱등성 키에 대한 직렬화 가드를 가져오거나 생성합니다.
    async fn guard_for(&self, client_key: &str) -> Arc<Mutex<()>> {
        let mut guards = self.submission_guards.lock().await;
        guards
            .entry(client_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 최종 상태에 도달한 주문의 가드를 제거합니다.
    ///
    /// 대기 중인 태스크는 Arc로 기존 가드를 계속 보유하므로 제거는
    /// 안전하며, 이후 조회는 멱등성 단락이나 최종 상태 검사로 걸러집니다.
    async fn release_guard(&self, client_key: &str) {
        self.submission_guards.lock().await.remove(client_key);
    }
}
