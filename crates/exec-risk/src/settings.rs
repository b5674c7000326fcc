//! 리스크 정책 설정.

use exec_core::{Position, Price, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 전역 리스크 정책 설정.
///
/// 리스크 평가기가 참조하는 프로세스 전역 설정입니다. `enabled`가 꺼져 있으면
/// 검증 전체가 비활성화되어 모든 주문이 수락됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSettings {
    /// 리스크 검증 활성화 여부 (기본값: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// 호가 통화 기준 최소 주문 크기 (기본값: 10.0)
    #[serde(default = "default_min_order_size")]
    pub min_order_size: Decimal,

    /// 호가 통화 기준 최대 주문 크기 (없으면 제한 없음)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_order_size: Option<Decimal>,

    /// 계좌 잔고 대비 최대 포지션 크기 비율 (기본값: 10%)
    #[serde(default = "default_max_position_size_pct")]
    pub max_position_size_pct: f64,

    /// 최대 동시 포지션 수 (기본값: 10)
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,

    /// 계좌 잔고 대비 최대 총 노출 비율 (기본값: 50%)
    #[serde(default = "default_max_total_exposure_pct")]
    pub max_total_exposure_pct: f64,

    /// 새 포지션에 적용되는 기본 손절 비율 (기본값: 2%, 0이면 비활성)
    #[serde(default = "default_stop_loss_pct")]
    pub default_stop_loss_pct: f64,

    /// 새 포지션에 적용되는 기본 익절 비율 (기본값: 5%, 0이면 비활성)
    #[serde(default = "default_take_profit_pct")]
    pub default_take_profit_pct: f64,
}

fn default_true() -> bool {
    true
}

fn default_min_order_size() -> Decimal {
    Decimal::from(10)
}

fn default_max_position_size_pct() -> f64 {
    10.0
}

fn default_max_concurrent_positions() -> usize {
    10
}

fn default_max_total_exposure_pct() -> f64 {
    50.0
}

fn default_stop_loss_pct() -> f64 {
    2.0
}

fn default_take_profit_pct() -> f64 {
    5.0
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_order_size: default_min_order_size(),
            max_order_size: None,
            max_position_size_pct: default_max_position_size_pct(),
            max_concurrent_positions: default_max_concurrent_positions(),
            max_total_exposure_pct: default_max_total_exposure_pct(),
            default_stop_loss_pct: default_stop_loss_pct(),
            default_take_profit_pct: default_take_profit_pct(),
        }
    }
}

impl RiskSettings {
    /// 새 포지션의 기본 손절 가격을 계산합니다.
    pub fn default_stop_loss(&self, entry_price: Price, side: Side) -> Option<Price> {
        Position::stop_loss_from_pct(entry_price, side, self.default_stop_loss_pct)
    }

    /// 새 포지션의 기본 익절 가격을 계산합니다.
    pub fn default_take_profit(&self, entry_price: Price, side: Side) -> Option<Price> {
        Position::take_profit_from_pct(entry_price, side, self.default_take_profit_pct)
    }
}
