//! loralogger integration test harness.
//!
//! Runs a real collector on a loopback UDP port with real sinks under a
//! temporary directory, and drives it with packet-forwarder datagrams the
//! way a gateway would.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::net::UdpSocket;

use loralogger_core::config::{CollectorConfig, SinkPolicy};
use loralogger_services::{SinkChain, SinkError, TtlItem, TtlStore};
use loraloggerd::Collector;

mod ingest;
mod persistence;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Gateway EUI used throughout, as a Raspberry Pi based gateway would report it.
pub const EUI: u64 = 0xb827_ebff_fe61_0001;
pub const EUI_HEX: &str = "b827ebfffe610001";

pub const PUSH_DATA: u8 = 0x00;
pub const PUSH_ACK: u8 = 0x01;
pub const PULL_DATA: u8 = 0x02;
pub const TX_ACK: u8 = 0x05;

/// A gateway-originated datagram: prefix, EUI, JSON body.
pub fn gateway_datagram(kind: u8, eui: u64, body: &[u8]) -> Vec<u8> {
    let mut raw = vec![0x02, 0xbe, 0xef, kind];
    raw.extend_from_slice(&eui.to_be_bytes());
    raw.extend_from_slice(body);
    raw
}

pub fn push_data(eui: u64) -> Vec<u8> {
    gateway_datagram(
        PUSH_DATA,
        eui,
        br#"{"rxpk":[{"tmst":3512348611,"freq":868.1,"datr":"SF7BW125","data":"QAEBAQGAAQABNfKk"}]}"#,
    )
}

pub fn loopback() -> CollectorConfig {
    CollectorConfig {
        bind: "127.0.0.1:0".into(),
        ..CollectorConfig::default()
    }
}

/// Start a collector and a gateway-side socket connected to it.
pub async fn start(config: CollectorConfig, sinks: SinkChain) -> Result<(Collector, UdpSocket)> {
    let collector = Collector::new(&config, sinks)
        .await
        .context("collector should start")?;
    let gateway = UdpSocket::bind("127.0.0.1:0").await?;
    gateway.connect(collector.local_addr()).await?;
    Ok((collector, gateway))
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

/// Every `file_name` below `root`, in path order.
pub fn log_files(root: &Path, file_name: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().is_some_and(|n| n == file_name) {
                found.push(path);
            }
        }
    }
    found.sort();
    found
}

/// All lines of every log partition below `root`.
pub fn log_lines(root: &Path) -> Vec<String> {
    log_files(root, "lora.log")
        .iter()
        .filter_map(|p| std::fs::read_to_string(p).ok())
        .flat_map(|text| text.lines().map(str::to_string).collect::<Vec<_>>())
        .collect()
}

/// A TTL store that is always down, counting attempts.
#[derive(Default)]
pub struct UnreachableStore {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl TtlStore for UnreachableStore {
    async fn upsert(&self, _item: TtlItem) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Unavailable("connection refused".into()))
    }
}

impl UnreachableStore {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

pub fn fail_fast() -> SinkChain {
    SinkChain::new(SinkPolicy::FailFast)
}

pub fn best_effort() -> SinkChain {
    SinkChain::new(SinkPolicy::BestEffort)
}

pub fn gateway_addr(gateway: &UdpSocket) -> SocketAddr {
    gateway.local_addr().expect("bound socket has an address")
}
