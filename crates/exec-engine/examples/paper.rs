//! 시뮬레이션 브로커 위에서 엔진을 구동하는 모의투자 데모.
//!
//! 실행: `cargo run -p exec-engine --example paper`

use std::sync::Arc;

use anyhow::Result;
use rust_decimal_macros::dec;
use tracing::info;

use exec_broker::{Broker, SimConfig, SimulatedBroker};
use exec_core::{init_logging, EngineConfig, OrderRequest, Symbol};
use exec_engine::{ExecutionEngine, MemoryOrderStore};
use exec_risk::RiskSettings;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = EngineConfig::load_default()?;
    init_logging(&config.logging).ok();

    let symbol = Symbol::crypto("BTC", "USDT");
    let broker = Arc::new(SimulatedBroker::new(
        SimConfig::default()
            .with_balance("USDT", dec!(10000))
            .with_price(&symbol, dec!(50000)),
    ));
    let store = Arc::new(MemoryOrderStore::new());

    let starting_balance = broker.get_balance(&config.quote_currency).await?;
    let engine = ExecutionEngine::new(
        broker.clone(),
        store,
        RiskSettings::default(),
        config,
        starting_balance,
    );
    let tasks = engine.spawn_background_tasks();

    // 시장가 매수 → 포지션 오픈
    let order = engine
        .submit_order(OrderRequest::market_buy(symbol.clone(), dec!(0.01)).with_strategy("demo"))
        .await?;
    info!(order_id = %order.id, status = %order.status, "매수 주문 완료");

    // 가격 상승 후 미실현 손익 확인
    broker.set_price(&symbol, dec!(52000)).await;
    engine.refresh_prices().await;
    for position in engine.open_positions().await {
        info!(
            symbol = %position.symbol,
            entry_price = %position.entry_price,
            current_price = %position.current_price,
            unrealized_pnl = %position.unrealized_pnl(),
            "오픈 포지션"
        );
    }

    // 시장가 매도 → 포지션 종료
    let order = engine
        .submit_order(OrderRequest::market_sell(symbol.clone(), dec!(0.01)))
        .await?;
    info!(order_id = %order.id, status = %order.status, "매도 주문 완료");

    let balance = engine.get_balance().await?;
    info!(balance = %balance, open_positions = engine.open_positions().await.len(), "데모 종료");

    for task in tasks {
        task.abort();
    }
    Ok(())
}
