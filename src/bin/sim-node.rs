//! Host simulation of a WiNoT star network.
//!
//! Runs one access point and one client on a simulated radio medium:
//! - the client joins, then sends a 1500-byte frame every two seconds
//! - the access point echoes every frame it receives
//! - the client checks the echo byte for byte
//!
//! Per-station statistics are served at http://localhost:8080/stats.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin sim-node
//! cargo run --bin sim-node -- winot.json   # JSON LinkConfig
//! RUST_LOG=debug cargo run --bin sim-node
//! ```

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use winot::link::{ClientId, LinkState, Role, RxOutcome, SharedLink, Transport, WinotLink};
use winot::radio::{AirFrame, SimAir, SimRadio};
use winot::stats::DEFAULT_STATS_PORT;
use winot::{LinkConfig, LinkStats, StatsServer, WINOT_DATA_BUF_SIZE};

/// Tick period of both stations.
const TICK_MS: u64 = 1;

/// How often the client sends a test frame.
const SEND_INTERVAL: Duration = Duration::from_secs(2);

/// Size of the client's test frame.
const TEST_FRAME_LEN: usize = 1500;

const AP_STATION: u32 = 1;
const CLIENT_STATION: u32 = 2;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== WiNoT simulation starting ===");

    let config = match std::env::args().nth(1) {
        Some(path) => match LinkConfig::load(&path) {
            Ok(config) => {
                info!("Loaded config from {}", path);
                config
            }
            Err(e) => {
                error!("Invalid config: {}", e);
                std::process::exit(1);
            }
        },
        None => LinkConfig::default(),
    };

    let air = SimAir::new();
    let ap_stats = Arc::new(LinkStats::new("ap"));
    let client_stats = Arc::new(LinkStats::new("client"));

    let ap = match start_station(&air, AP_STATION, Role::AccessPoint, &config, &ap_stats) {
        Ok(link) => link,
        Err(e) => {
            error!("Access point failed to start: {}", e);
            std::process::exit(1);
        }
    };
    let client = match start_station(&air, CLIENT_STATION, Role::Client, &config, &client_stats) {
        Ok(link) => link,
        Err(e) => {
            error!("Client failed to start: {}", e);
            std::process::exit(1);
        }
    };

    // Keep server alive - variable intentionally unused except for Drop
    let _stats_server = match StatsServer::start(
        None,
        DEFAULT_STATS_PORT,
        vec![ap_stats.clone(), client_stats.clone()],
    ) {
        Ok(server) => Some(server),
        Err(e) => {
            warn!("Failed to start stats server: {}", e);
            None
        }
    };

    let cancel = CancellationToken::new();
    let tasks = vec![
        tokio::spawn(radio_isr(air.subscribe(), ap.clone(), cancel.clone())),
        tokio::spawn(radio_isr(air.subscribe(), client.clone(), cancel.clone())),
        tokio::spawn(access_point_loop(ap, cancel.clone())),
        tokio::spawn(client_loop(client, config.join_declared_len, cancel.clone())),
    ];

    info!("Running (Ctrl+C to exit)...");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Shutting down");
    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            error!("Task panicked: {}", e);
        }
    }

    info!("ap: {}", ap_stats.to_json());
    info!("client: {}", client_stats.to_json());
}

fn start_station(
    air: &SimAir,
    station: u32,
    role: Role,
    config: &LinkConfig,
    stats: &Arc<LinkStats>,
) -> Result<SharedLink<SimRadio>, winot::LinkError> {
    let mut link = WinotLink::with_stats(air.attach(station), config.clone(), stats.clone())?;
    link.initialize(role, config.tx_power)?;
    Ok(SharedLink::new(link))
}

/// Delivers frames from the medium the way the radio interrupt would.
async fn radio_isr(
    mut rx: broadcast::Receiver<AirFrame>,
    link: SharedLink<SimRadio>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => received,
        };
        match received {
            Ok(frame) => {
                let (station, outcome) = link.with(|l| {
                    let station = l.radio().station();
                    let outcome = l
                        .radio()
                        .accepts(&frame)
                        .then(|| l.on_radio_frame(&frame.data));
                    (station, outcome)
                });
                if let Some(RxOutcome::Rejected(reason)) = outcome {
                    debug!(
                        "station {} rejected frame from {}: {}",
                        station, frame.from, reason
                    );
                }
            }
            Err(RecvError::Lagged(missed)) => warn!("Receiver lagged, {} frames lost", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn access_point_loop(link: SharedLink<SimRadio>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_MS));
    let mut buf = [0u8; WINOT_DATA_BUF_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        link.with(|l| {
            let state = l.on_tick(TICK_MS as u32);
            if state == LinkState::Listening && !l.clients().is_empty() {
                if let Err(e) = l.begin_communicating() {
                    warn!("AP could not open data phase: {}", e);
                }
            }

            match l.poll(&mut buf) {
                Ok(Some(len)) => {
                    debug!("AP received {} bytes, echoing", len);
                    if let Err(e) = l.send(&buf[..len]) {
                        warn!("AP echo failed: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("AP poll failed: {}", e),
            }
        });
    }
}

async fn client_loop(link: SharedLink<SimRadio>, declared_len: u8, cancel: CancellationToken) {
    let id = ClientId::random();
    if let Err(e) = link.with(|l| l.request_join(id, declared_len)) {
        error!("Join request failed: {}", e);
        return;
    }
    info!("Client {} requested join", id);

    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_MS));
    let mut send_timer = tokio::time::interval(SEND_INTERVAL);
    send_timer.tick().await;

    let mut sequence: u8 = 0;
    let mut expected: Option<Vec<u8>> = None;
    let mut buf = [0u8; WINOT_DATA_BUF_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                link.with(|l| {
                    l.on_tick(TICK_MS as u32);
                    match l.poll(&mut buf) {
                        Ok(Some(len)) => match expected.take() {
                            Some(sent) if sent[..] == buf[..len] => {
                                info!("Echo of {} bytes verified", len);
                            }
                            Some(_) => warn!("Echo of {} bytes does not match", len),
                            None => debug!("Unsolicited frame of {} bytes", len),
                        },
                        Ok(None) => {}
                        Err(e) => warn!("Client poll failed: {}", e),
                    }
                });
            }
            _ = send_timer.tick() => {
                if expected.is_some() {
                    warn!("No echo for previous frame");
                }
                let frame: Vec<u8> = (0..TEST_FRAME_LEN)
                    .map(|i| (i as u8).wrapping_add(sequence))
                    .collect();
                sequence = sequence.wrapping_add(1);
                match link.with(|l| l.send(&frame)) {
                    Ok(len) => {
                        debug!("Client sent {} bytes", len);
                        expected = Some(frame);
                    }
                    Err(e) => warn!("Client send failed: {}", e),
                }
            }
        }
    }
}
