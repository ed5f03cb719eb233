use crate::*;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use loralogger_core::wire::GatewayId;
use loralogger_services::{RotatingLogSink, SqliteTtlStore, TtlStoreSink};

/// PUSH_DATA lands in both the store and the day's log file.
#[tokio::test]
async fn push_data_is_recorded_by_both_sinks() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = SqliteTtlStore::open(&dir.path().join("raw.sqlite3"), "loralogger")?;
    let logs = dir.path().join("logs");
    let sinks = fail_fast()
        .with(Arc::new(TtlStoreSink::new(Arc::new(store.clone()))))
        .with(Arc::new(RotatingLogSink::new(&logs, "lora.log")));

    let (collector, gateway) = start(loopback(), sinks).await?;
    let raw = push_data(EUI);
    gateway.send(&raw).await?;

    wait_until(Duration::from_secs(5), || log_lines(&logs).len() == 1).await?;
    assert_eq!(store.count().await?, 1);

    let line = &log_lines(&logs)[0];
    let fields: Vec<&str> = line.split(", ").collect();
    assert_eq!(fields.len(), 3, "unexpected line {line:?}");
    assert!(chrono::DateTime::parse_from_rfc3339(fields[0]).is_ok());
    assert_eq!(fields[1], EUI_HEX);
    assert_eq!(BASE64.decode(fields[2])?, raw);

    let files = log_files(&logs, "lora.log");
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with(logs.join(Utc::now().format("%Y").to_string())));

    collector.close().await?;
    Ok(())
}

/// Only gateway-originated kinds are recorded; junk and acks are not.
#[tokio::test]
async fn only_gateway_kinds_are_recorded() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let sinks = fail_fast().with(Arc::new(RotatingLogSink::new(dir.path(), "lora.log")));
    let (collector, gateway) = start(loopback(), sinks).await?;

    gateway.send(&[0x02, 0x00, 0x01]).await?; // too short
    gateway.send(&[0x01, 0x00, 0x01, 0x00]).await?; // protocol v1
    gateway.send(&[0x02, 0x00, 0x01, 0x7f]).await?; // unknown kind
    gateway.send(&[0x02, 0x00, 0x01, PUSH_DATA, 0xb8]).await?; // truncated EUI
    gateway.send(&[0x02, 0x00, 0x01, PUSH_ACK]).await?;
    gateway.send(&gateway_datagram(PULL_DATA, EUI, b"")).await?;
    gateway.send(&gateway_datagram(TX_ACK, EUI + 1, b"{}")).await?;
    gateway.send(&push_data(EUI + 2)).await?;

    wait_until(Duration::from_secs(5), || log_lines(dir.path()).len() == 3).await?;
    // Give stragglers a chance to show up if any slipped through.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut gateways: Vec<String> = log_lines(dir.path())
        .iter()
        .map(|l| l.split(", ").nth(1).unwrap_or_default().to_string())
        .collect();
    gateways.sort();
    assert_eq!(
        gateways,
        vec![
            GatewayId::from(EUI).to_string(),
            GatewayId::from(EUI + 1).to_string(),
            GatewayId::from(EUI + 2).to_string(),
        ]
    );
    assert_eq!(collector.received(), 8);

    collector.close().await?;
    Ok(())
}

/// A collector restarted on the same port and log root keeps appending.
#[tokio::test]
async fn restart_continues_the_same_day_file() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let sinks = fail_fast().with(Arc::new(RotatingLogSink::new(dir.path(), "lora.log")));
    let (collector, gateway) = start(loopback(), sinks).await?;
    let addr = collector.local_addr();
    gateway.send(&push_data(EUI)).await?;
    wait_until(Duration::from_secs(5), || log_lines(dir.path()).len() == 1).await?;
    collector.close().await?;

    let config = CollectorConfig {
        bind: addr.to_string(),
        ..CollectorConfig::default()
    };
    let sinks = fail_fast().with(Arc::new(RotatingLogSink::new(dir.path(), "lora.log")));
    let (collector, gateway) = start(config, sinks).await?;
    gateway.send(&push_data(EUI)).await?;
    wait_until(Duration::from_secs(5), || log_lines(dir.path()).len() == 2).await?;

    // A restart within the test could straddle midnight UTC; both days are fine.
    assert!(log_files(dir.path(), "lora.log").len() <= 2);
    collector.close().await?;
    Ok(())
}

/// Many gateways at once: every datagram is recorded exactly once.
#[tokio::test]
async fn burst_from_many_gateways() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = SqliteTtlStore::open(&dir.path().join("raw.sqlite3"), "loralogger")?;
    let sinks = fail_fast()
        .with(Arc::new(TtlStoreSink::new(Arc::new(store.clone()))))
        .with(Arc::new(RotatingLogSink::new(dir.path().join("logs"), "lora.log")));
    let (collector, gateway) = start(loopback(), sinks).await?;

    for i in 0..50u64 {
        gateway.send(&push_data(EUI + i)).await?;
        // Loopback drops under pressure if the receiver falls behind.
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let logs = dir.path().join("logs");
    wait_until(Duration::from_secs(10), || log_lines(&logs).len() == 50).await?;
    let mut seen: Vec<String> = log_lines(&logs)
        .iter()
        .map(|l| l.split(", ").nth(1).unwrap_or_default().to_string())
        .collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 50);
    // Items sharing a receive microsecond overwrite each other.
    assert!((1..=50).contains(&store.count().await?));

    collector.close().await?;
    Ok(())
}

/// The registry is reachable from the collector for a downlink path.
#[tokio::test]
async fn registry_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let sinks = fail_fast().with(Arc::new(RotatingLogSink::new(dir.path(), "lora.log")));
    let (collector, gateway) = start(loopback(), sinks).await?;

    let id = GatewayId::from(EUI);
    assert!(collector.gateways().get_gateway(&id).is_err());
    collector.gateways().set_gateway(id, gateway_addr(&gateway))?;
    assert_eq!(collector.gateways().get_gateway(&id)?, gateway_addr(&gateway));

    collector.close().await?;
    Ok(())
}
