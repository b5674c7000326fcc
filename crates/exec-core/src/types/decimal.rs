//! 정밀한 금융 계산을 위한 Decimal 유틸리티.

use rust_decimal::Decimal;

/// 금융 정밀도를 위한 가격 타입.
pub type Price = Decimal;

/// 주문 수량을 위한 타입.
pub type Quantity = Decimal;

/// 퍼센트 타입 (10.0 = 10%).
pub type Percentage = f64;

/// 잔고 대비 퍼센트를 금액으로 변환합니다.
///
/// 부동소수점 오차를 피하기 위해 퍼센트를 정수로 스케일링한 뒤
/// Decimal 연산만 사용합니다 (소수점 4자리까지 지원).
/// 예시: `pct_of(1000, 10.0)` = 100.
pub fn pct_of(amount: Decimal, pct: Percentage) -> Decimal {
    let scaled_pct = (pct * 10000.0).round() as i64;
    (amount * Decimal::from(scaled_pct)) / Decimal::from(1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_pct_of() {
        assert_eq!(pct_of(dec!(1000), 10.0), dec!(100));
        assert_eq!(pct_of(dec!(100), 10.0), dec!(10));
        assert_eq!(pct_of(dec!(1000), 2.5), dec!(25));
    }

    #[test]
    fn test_pct_of_fractional() {
        // 10.5% of 200 = 21
        assert_eq!(pct_of(dec!(200), 10.5), dec!(21));
    }
}
