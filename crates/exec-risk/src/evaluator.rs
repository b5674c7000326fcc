//! 주문 리스크 평가기.
//!
//! 주문, 참조 가격, 계좌 잔고, 현재 오픈 포지션만으로 수락/거부를 결정하는
//! 순수 함수입니다. 검사는 순서대로 수행되며 첫 실패에서 중단됩니다:
//!
//! 1. 명목 가치 >= 최소 주문 크기
//! 2. 명목 가치 <= 최대 주문 크기 (설정된 경우)
//! 3. 명목 가치 <= 잔고 × 최대 포지션 비율
//! 4. 오픈 포지션 수 < 최대 동시 포지션 수
//! 5. 현재 노출 + 명목 가치 <= 잔고 × 최대 총 노출 비율

use exec_core::{pct_of, OrderRequest, Position, Price};
use rust_decimal::Decimal;

use crate::settings::RiskSettings;

/// 리스크 검증 결과.
#[derive(Debug, Clone)]
pub struct RiskValidation {
    /// 주문이 리스크 검사를 통과했는지 여부
    pub is_valid: bool,
    /// 거부 사유 (통과 시 None)
    pub reason: Option<String>,
}

impl RiskValidation {
    /// 유효한 결과 생성.
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    /// 무효한 결과 생성.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }

    /// 거부 사유를 반환합니다 (통과한 결과에서는 빈 문자열).
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

/// 주문 검증을 위한 리스크 평가기.
#[derive(Debug, Clone)]
pub struct RiskEvaluator {
    settings: RiskSettings,
}

impl RiskEvaluator {
    /// 주어진 설정으로 새 평가기를 생성합니다.
    pub fn new(settings: RiskSettings) -> Self {
        Self { settings }
    }

    /// 설정 참조를 반환합니다.
    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    /// 주문을 리스크 정책에 대해 평가합니다.
    ///
    /// # 인자
    /// * `order` - 검증할 주문 요청
    /// * `reference_price` - 지정가가 없을 때 명목 가치 계산에 쓰는 시장 가격
    /// * `balance` - 호가 통화 기준 계좌 잔고
    /// * `positions` - 현재 오픈 포지션들
    pub fn evaluate(
        &self,
        order: &OrderRequest,
        reference_price: Price,
        balance: Decimal,
        positions: &[Position],
    ) -> RiskValidation {
        if !self.settings.enabled {
            return RiskValidation::valid();
        }

        let notional = order.quantity * order.price.unwrap_or(reference_price);

        // Check 1: 최소 주문 크기
        if notional < self.settings.min_order_size {
            return RiskValidation::invalid(format!(
                "Order value {:.2} is below minimum order size {:.2}",
                notional, self.settings.min_order_size
            ));
        }

        // Check 2: 최대 주문 크기
        if let Some(max_order_size) = self.settings.max_order_size {
            if notional > max_order_size {
                return RiskValidation::invalid(format!(
                    "Order value {:.2} exceeds max order size {:.2}",
                    notional, max_order_size
                ));
            }
        }

        // Check 3: 잔고 대비 최대 포지션 크기
        let max_position = pct_of(balance, self.settings.max_position_size_pct);
        if notional > max_position {
            return RiskValidation::invalid(format!(
                "Order value {:.2} exceeds max position size {:.2} ({}% of balance)",
                notional, max_position, self.settings.max_position_size_pct
            ));
        }

        // Check 4: 최대 동시 포지션 수
        if positions.len() >= self.settings.max_concurrent_positions {
            return RiskValidation::invalid(format!(
                "Maximum concurrent positions reached ({})",
                self.settings.max_concurrent_positions
            ));
        }

        // Check 5: 최대 총 노출
        let current_exposure: Decimal = positions.iter().map(|p| p.notional_value()).sum();
        let max_exposure = pct_of(balance, self.settings.max_total_exposure_pct);
        if current_exposure + notional > max_exposure {
            return RiskValidation::invalid(format!(
                "Total exposure {:.2} would exceed limit {:.2} ({}% of balance)",
                current_exposure + notional,
                max_exposure,
                self.settings.max_total_exposure_pct
            ));
        }

        RiskValidation::valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exec_core::{Side, Symbol};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn btc() -> Symbol {
        Symbol::crypto("BTC", "USDT")
    }

    fn open_position(quantity: Decimal, price: Decimal) -> Position {
        Position::new("simulated", btc(), Side::Buy, quantity, price, Uuid::new_v4())
    }

    #[test]
    fn test_accepts_order_within_limits() {
        let evaluator = RiskEvaluator::new(RiskSettings::default());
        let order = OrderRequest::market_buy(btc(), dec!(0.01));

        // 명목 가치 500, 잔고 10000 (최대 포지션 1000)
        let result = evaluator.evaluate(&order, dec!(50000), dec!(10000), &[]);
        assert!(result.is_valid);
        assert!(result.reason.is_none());
    }

    #[test]
    fn test_rejects_below_min_order_size() {
        let evaluator = RiskEvaluator::new(RiskSettings::default());
        let order = OrderRequest::limit_buy(btc(), dec!(0.0001), dec!(50000));

        // 명목 가치 5 < 최소 10
        let result = evaluator.evaluate(&order, dec!(50000), dec!(10000), &[]);
        assert!(!result.is_valid);
        assert!(result.reason().contains("below minimum order size"));
    }

    #[test]
    fn test_rejects_above_max_order_size() {
        let settings = RiskSettings {
            max_order_size: Some(dec!(400)),
            ..Default::default()
        };
        let evaluator = RiskEvaluator::new(settings);
        let order = OrderRequest::market_buy(btc(), dec!(0.01));

        let result = evaluator.evaluate(&order, dec!(50000), dec!(10000), &[]);
        assert!(!result.is_valid);
        assert!(result.reason().contains("exceeds max order size"));
    }

    #[test]
    fn test_rejects_above_max_position_size() {
        let evaluator = RiskEvaluator::new(RiskSettings::default());

        // 잔고 100, 최대 포지션 10% = 10; 명목 가치 25는 거부되어야 함
        let order = OrderRequest::limit_buy(btc(), dec!(0.0005), dec!(50000));
        let result = evaluator.evaluate(&order, dec!(50000), dec!(100), &[]);

        assert!(!result.is_valid);
        assert!(result.reason().contains("exceeds max position size"));
        assert!(result.reason().contains("(10% of balance)"));
    }

    #[test]
    fn test_rejects_at_max_concurrent_positions() {
        let settings = RiskSettings {
            max_concurrent_positions: 2,
            ..Default::default()
        };
        let evaluator = RiskEvaluator::new(settings);
        let positions = vec![
            open_position(dec!(0.001), dec!(50000)),
            open_position(dec!(0.001), dec!(50000)),
        ];

        let order = OrderRequest::market_buy(btc(), dec!(0.01));
        let result = evaluator.evaluate(&order, dec!(50000), dec!(100000), &positions);

        assert!(!result.is_valid);
        assert!(result.reason().contains("Maximum concurrent positions"));
    }

    #[test]
    fn test_rejects_above_total_exposure() {
        let evaluator = RiskEvaluator::new(RiskSettings::default());

        // 잔고 10000, 최대 노출 50% = 5000; 기존 노출 4800 + 신규 500 > 5000
        let positions = vec![open_position(dec!(0.096), dec!(50000))];
        let order = OrderRequest::market_buy(btc(), dec!(0.01));
        let result = evaluator.evaluate(&order, dec!(50000), dec!(10000), &positions);

        assert!(!result.is_valid);
        assert!(result.reason().contains("Total exposure"));
    }

    #[test]
    fn test_disabled_accepts_everything() {
        let settings = RiskSettings {
            enabled: false,
            ..Default::default()
        };
        let evaluator = RiskEvaluator::new(settings);

        // 검증이 꺼져 있으면 최소 크기 미달도 통과
        let order = OrderRequest::limit_buy(btc(), dec!(0.0001), dec!(50000));
        let result = evaluator.evaluate(&order, dec!(50000), Decimal::ZERO, &[]);
        assert!(result.is_valid);
    }

    #[test]
    fn test_limit_price_takes_precedence_over_reference() {
        let evaluator = RiskEvaluator::new(RiskSettings::default());

        // 지정가 40000 기준 명목 가치 400; 참조 가격 50000은 무시됨
        let order = OrderRequest::limit_buy(btc(), dec!(0.01), dec!(40000));
        let result = evaluator.evaluate(&order, dec!(50000), dec!(10000), &[]);
        assert!(result.is_valid);
    }
}
