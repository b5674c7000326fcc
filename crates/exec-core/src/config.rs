//! 설정 관리.
//!
//! 엔진 설정은 TOML 파일에서 로드되며 `EXEC__` 접두사의 환경 변수로
//! 재정의할 수 있습니다 (예: `EXEC__ENGINE__BROKER_TIMEOUT_MS=2000`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 실행 엔진 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// 잔고 조회에 사용하는 호가 통화 (예: "USDT")
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,

    /// 브로커 호출 데드라인 (밀리초)
    #[serde(default = "default_broker_timeout_ms")]
    pub broker_timeout_ms: u64,

    /// 시장가 주문 제출 후 정산 확인까지의 대기 시간 (밀리초, 최대 1초)
    #[serde(default = "default_market_settle_delay_ms")]
    pub market_settle_delay_ms: u64,

    /// 미완료 주문 조정 주기 (초)
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,

    /// 포지션 가격 갱신 주기 (초)
    #[serde(default = "default_price_refresh_interval_secs")]
    pub price_refresh_interval_secs: u64,

    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨 필터 (예: "info", "exec_engine=debug")
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn default_quote_currency() -> String {
    "USDT".to_string()
}

fn default_broker_timeout_ms() -> u64 {
    5000
}

fn default_market_settle_delay_ms() -> u64 {
    500
}

fn default_reconcile_interval_secs() -> u64 {
    5
}

fn default_price_refresh_interval_secs() -> u64 {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            quote_currency: default_quote_currency(),
            broker_timeout_ms: default_broker_timeout_ms(),
            market_settle_delay_ms: default_market_settle_delay_ms(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            price_refresh_interval_secs: default_price_refresh_interval_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// 브로커 호출 데드라인.
    pub fn broker_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_timeout_ms)
    }

    /// 시장가 주문 정산 대기. 1초를 넘지 않도록 제한됩니다.
    pub fn market_settle_delay(&self) -> Duration {
        Duration::from_millis(self.market_settle_delay_ms.min(1000))
    }

    /// 조정 스윕 주기.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// 가격 갱신 주기.
    pub fn price_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.price_refresh_interval_secs)
    }

    /// 파일과 환경 변수에서 설정을 로드합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("EXEC")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 기본 경로에서 설정을 로드합니다. 파일이 없으면 기본값을 사용합니다.
    pub fn load_default() -> Result<Self, config::ConfigError> {
        let path = Path::new("config/default.toml");
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
