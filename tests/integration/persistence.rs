use crate::*;

use loralogger_services::{RotatingLogSink, TtlStoreSink};

/// Store down + fail-fast: the log sink never sees the datagram.
#[tokio::test]
async fn store_failure_skips_log_sink() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(UnreachableStore::default());
    let sinks = fail_fast()
        .with(Arc::new(TtlStoreSink::new(store.clone())))
        .with(Arc::new(RotatingLogSink::new(dir.path(), "lora.log")));
    let (collector, gateway) = start(loopback(), sinks).await?;

    gateway.send(&push_data(EUI)).await?;
    wait_until(Duration::from_secs(5), || store.attempts() == 1).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(store.attempts(), 1);
    assert!(log_files(dir.path(), "lora.log").is_empty());

    // Ingestion carries on after the failure.
    gateway.send(&push_data(EUI)).await?;
    wait_until(Duration::from_secs(5), || store.attempts() == 2).await?;

    collector.close().await?;
    Ok(())
}

/// Store down + best-effort: the log sink still records the datagram.
#[tokio::test]
async fn best_effort_still_logs_when_store_is_down() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(UnreachableStore::default());
    let sinks = best_effort()
        .with(Arc::new(TtlStoreSink::new(store.clone())))
        .with(Arc::new(RotatingLogSink::new(dir.path(), "lora.log")));
    let (collector, gateway) = start(loopback(), sinks).await?;

    gateway.send(&push_data(EUI)).await?;
    wait_until(Duration::from_secs(5), || log_lines(dir.path()).len() == 1).await?;
    assert_eq!(store.attempts(), 1);
    assert!(log_lines(dir.path())[0].contains(EUI_HEX));

    collector.close().await?;
    Ok(())
}
