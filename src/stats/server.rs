//! HTTP `/stats` endpoint.
//!
//! Runs on its own thread with `tiny_http` and serves [`LinkStats`] as JSON.

use super::LinkStats;
use log::{error, info, warn};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Response, Server};

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// Poll interval for the shutdown flag.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// HTTP stats server. Drop it to stop.
pub struct StatsServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl StatsServer {
    /// Start serving `stats` on `bind_addr:port` (`None` binds 0.0.0.0).
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        stats: Vec<Arc<LinkStats>>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, e.to_string()))?;

        info!("Stats server listening on http://{}/stats", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = thread::spawn(move || run_server(server, stats, flag));

        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    /// Stop the server. May take up to one poll interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render(stats: &[Arc<LinkStats>]) -> String {
    let nodes: Vec<_> = stats.iter().map(|s| s.snapshot()).collect();
    serde_json::to_string(&nodes).unwrap_or_else(|_| "[]".to_string())
}

fn run_server(server: Server, stats: Vec<Arc<LinkStats>>, shutdown: Arc<AtomicBool>) {
    let content_type = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]);
    let allow_get = Header::from_bytes(&b"Allow"[..], &b"GET"[..]);

    loop {
        if shutdown.load(Ordering::Acquire) {
            info!("Stats server shutting down");
            break;
        }

        let request = match server.recv_timeout(RECV_TIMEOUT) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                error!("Stats server error: {}", e);
                break;
            }
        };

        let response = if request.method() != &Method::Get {
            let mut response = Response::from_string("Method Not Allowed").with_status_code(405);
            if let Ok(h) = allow_get.clone() {
                response = response.with_header(h);
            }
            response
        } else if matches!(request.url(), "/stats" | "/stats/") {
            let mut response = Response::from_string(render(&stats)).with_status_code(200);
            if let Ok(h) = content_type.clone() {
                response = response.with_header(h);
            }
            response
        } else {
            Response::from_string("Not Found").with_status_code(404)
        };

        if let Err(e) = request.respond(response) {
            warn!("Failed to send stats response: {}", e);
        }
    }
}
