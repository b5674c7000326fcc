//! 포지션 모델.
//!
//! 이 모듈은 오픈 포지션 관련 타입을 정의합니다:
//! - `Position` - 하나의 (거래소, 심볼)에 대한 순 노출
//! - `PositionSummary` - 포트폴리오 요약
//!
//! 이 엔진은 (거래소, 심볼) 키당 최대 하나의 포지션만 유지합니다. 같은 키에
//! 대한 새 매수 체결은 기존 포지션을 평단 계산 없이 대체하고, 매도 체결은
//! 수량과 무관하게 전량 청산으로 처리됩니다 (롱 전용 단순 모델).

use crate::domain::Side;
use crate::types::{pct_of, Price, Quantity, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 심볼의 보유량을 나타내는 오픈 포지션.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// 내부 포지션 ID
    pub id: Uuid,
    /// 거래소 이름
    pub exchange: String,
    /// 거래 심볼
    pub symbol: Symbol,
    /// 포지션 방향 (롱 = Buy, 숏 = Sell)
    pub side: Side,
    /// 현재 보유 수량
    pub quantity: Quantity,
    /// 진입 가격
    pub entry_price: Price,
    /// 현재 시장 가격 (주기적으로 갱신됨)
    pub current_price: Price,
    /// 손절 가격
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Price>,
    /// 익절 가격
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Price>,
    /// 이 포지션을 연 전략
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
    /// 이 포지션을 연 주문의 내부 ID
    pub opened_by: Uuid,
    /// 포지션 오픈 타임스탬프
    pub opened_at: DateTime<Utc>,
    /// 마지막 업데이트 타임스탬프
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// 새 포지션을 생성합니다. 현재 가격은 진입 가격으로 초기화됩니다.
    pub fn new(
        exchange: impl Into<String>,
        symbol: Symbol,
        side: Side,
        quantity: Quantity,
        entry_price: Price,
        opened_by: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            exchange: exchange.into(),
            symbol,
            side,
            quantity,
            entry_price,
            current_price: entry_price,
            stop_loss: None,
            take_profit: None,
            strategy_id: None,
            opened_by,
            opened_at: now,
            updated_at: now,
        }
    }

    /// 전략 ID를 설정합니다.
    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    /// 손절/익절 가격을 설정합니다.
    pub fn with_protection(mut self, stop_loss: Option<Price>, take_profit: Option<Price>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    /// 현재 가격을 갱신합니다.
    pub fn update_price(&mut self, current_price: Price) {
        self.current_price = current_price;
        self.updated_at = Utc::now();
    }

    /// 미실현 손익 (현재 가치 - 진입 가치, 방향에 따라 부호 조정).
    pub fn unrealized_pnl(&self) -> Decimal {
        let price_diff = match self.side {
            Side::Buy => self.current_price - self.entry_price,
            Side::Sell => self.entry_price - self.current_price,
        };
        price_diff * self.quantity
    }

    /// 미실현 손익률 (%).
    pub fn unrealized_pnl_pct(&self) -> Decimal {
        let entry_value = self.entry_notional_value();
        if entry_value.is_zero() {
            return Decimal::ZERO;
        }
        (self.unrealized_pnl() / entry_value) * Decimal::from(100)
    }

    /// 현재 가격 기준 명목 가치.
    pub fn notional_value(&self) -> Decimal {
        self.current_price * self.quantity
    }

    /// 진입 시점의 명목 가치.
    pub fn entry_notional_value(&self) -> Decimal {
        self.entry_price * self.quantity
    }

    /// 손절 가격에 도달했는지 확인합니다 (롱: 현재가 <= 손절가).
    pub fn stop_loss_hit(&self) -> bool {
        match (self.stop_loss, self.side) {
            (Some(stop), Side::Buy) => self.current_price <= stop,
            (Some(stop), Side::Sell) => self.current_price >= stop,
            (None, _) => false,
        }
    }

    /// 익절 가격에 도달했는지 확인합니다 (롱: 현재가 >= 익절가).
    pub fn take_profit_hit(&self) -> bool {
        match (self.take_profit, self.side) {
            (Some(target), Side::Buy) => self.current_price >= target,
            (Some(target), Side::Sell) => self.current_price <= target,
            (None, _) => false,
        }
    }

    /// 진입가 대비 퍼센트로 손절 가격을 계산합니다 (0이면 비활성).
    pub fn stop_loss_from_pct(entry_price: Price, side: Side, pct: f64) -> Option<Price> {
        if pct <= 0.0 {
            return None;
        }
        let distance = pct_of(entry_price, pct);
        Some(match side {
            Side::Buy => entry_price - distance,
            Side::Sell => entry_price + distance,
        })
    }

    /// 진입가 대비 퍼센트로 익절 가격을 계산합니다 (0이면 비활성).
    pub fn take_profit_from_pct(entry_price: Price, side: Side, pct: f64) -> Option<Price> {
        if pct <= 0.0 {
            return None;
        }
        let distance = pct_of(entry_price, pct);
        Some(match side {
            Side::Buy => entry_price + distance,
            Side::Sell => entry_price - distance,
        })
    }
}

/// 포트폴리오 개요를 위한 포지션 요약.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSummary {
    /// 오픈 포지션 총 개수
    pub total_positions: usize,
    /// 총 미실현 손익
    pub total_unrealized_pnl: Decimal,
    /// 총 명목 가치
    pub total_notional_value: Decimal,
}

impl PositionSummary {
    /// 포지션 목록으로부터 요약을 생성합니다.
    pub fn from_positions(positions: &[Position]) -> Self {
        Self {
            total_positions: positions.len(),
            total_unrealized_pnl: positions.iter().map(|p| p.unrealized_pnl()).sum(),
            total_notional_value: positions.iter().map(|p| p.notional_value()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_position(quantity: Quantity, entry: Price) -> Position {
        Position::new(
            "simulated",
            Symbol::crypto("BTC", "USDT"),
            Side::Buy,
            quantity,
            entry,
            Uuid::new_v4(),
        )
    }

    #[test]
    fn test_unrealized_pnl() {
        let mut position = test_position(dec!(1.0), dec!(50000));

        position.update_price(dec!(55000));
        assert_eq!(position.unrealized_pnl(), dec!(5000));
        assert_eq!(position.unrealized_pnl_pct(), dec!(10));

        position.update_price(dec!(48000));
        assert_eq!(position.unrealized_pnl(), dec!(-2000));
    }

    #[test]
    fn test_short_side_pnl_sign() {
        let mut position = test_position(dec!(1.0), dec!(50000));
        position.side = Side::Sell;

        // 가격 하락 - 숏 포지션 수익
        position.update_price(dec!(48000));
        assert_eq!(position.unrealized_pnl(), dec!(2000));
    }

    #[test]
    fn test_stop_loss_flag() {
        let mut position = test_position(dec!(0.1), dec!(50000))
            .with_protection(Some(dec!(49000)), Some(dec!(52500)));

        assert!(!position.stop_loss_hit());
        position.update_price(dec!(48900));
        assert!(position.stop_loss_hit());
        assert!(!position.take_profit_hit());
    }

    #[test]
    fn test_take_profit_flag() {
        let mut position = test_position(dec!(0.1), dec!(50000))
            .with_protection(Some(dec!(49000)), Some(dec!(52500)));

        position.update_price(dec!(52500));
        assert!(position.take_profit_hit());
        assert!(!position.stop_loss_hit());
    }

    #[test]
    fn test_protection_from_pct() {
        let stop = Position::stop_loss_from_pct(dec!(50000), Side::Buy, 2.0);
        assert_eq!(stop, Some(dec!(49000)));

        let target = Position::take_profit_from_pct(dec!(50000), Side::Buy, 5.0);
        assert_eq!(target, Some(dec!(52500)));

        // 0%는 보호 주문 비활성화
        assert_eq!(Position::stop_loss_from_pct(dec!(50000), Side::Buy, 0.0), None);
    }

    #[test]
    fn test_position_summary() {
        let mut a = test_position(dec!(0.1), dec!(50000));
        a.update_price(dec!(55000));
        let b = test_position(dec!(1.0), dec!(3000));

        let summary = PositionSummary::from_positions(&[a, b]);
        assert_eq!(summary.total_positions, 2);
        assert_eq!(summary.total_unrealized_pnl, dec!(500));
        assert_eq!(summary.total_notional_value, dec!(8500)); // 5500 + 3000
    }
}
