//! 브로커 에러 타입.

use thiserror::Error;

/// 브로커 관련 에러.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    Network(String),

    /// 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 요청 한도 초과
    #[error("Rate limit exceeded")]
    RateLimited,

    /// 거래소 API 에러 코드
    #[error("API error {code}: {message}")]
    ApiError { code: i32, message: String },

    /// 잔고 부족
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// 주문을 찾을 수 없음
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// 심볼을 찾을 수 없음
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// 유효하지 않은 수량
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    /// 주문 거부됨
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// 지원되지 않는 작업
    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl BrokerError {
    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::Network(_) | BrokerError::Timeout(_) | BrokerError::RateLimited
        )
    }

    /// 재시도하면 안 되는 치명적 에러인지 확인.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BrokerError::InsufficientBalance(_)
                | BrokerError::InvalidQuantity(_)
                | BrokerError::OrderRejected(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(BrokerError::Network("reset".to_string()).is_retryable());
        assert!(BrokerError::RateLimited.is_retryable());
        assert!(!BrokerError::OrderRejected("bad".to_string()).is_retryable());

        assert!(BrokerError::InsufficientBalance("USDT".to_string()).is_fatal());
        assert!(!BrokerError::Timeout("5s".to_string()).is_fatal());
    }
}
