//! Websocket firehose source: one persistent `transactionSubscribe`
//! subscription with bounded-backoff reconnect, keepalive pings, a silence
//! watchdog, and early signature dedup.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{Notify, RwLock};
use tokio::time;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message},
};
use tracing::{debug, error, info, warn};

use crate::classifier::SignatureWindow;
use crate::config::Config;
use crate::errors::SniperError;
use crate::metrics::metrics;
use crate::types::RawEventSender;

use super::messages::{parse_frame, subscribe_request};
use super::source::{ProgramSet, TxStreamSource};

const INGEST_SIGNATURE_CAP: usize = 20_000;

pub struct WssSource {
    endpoint: String,
    token: Option<String>,
    programs: ProgramSet,
    cfg: Config,
    last_heartbeat: Arc<RwLock<Instant>>,
    stop_notify: Arc<Notify>,
}

impl WssSource {
    pub fn new(endpoint: String, token: Option<String>, programs: ProgramSet, cfg: Config) -> Self {
        Self {
            endpoint,
            token,
            programs,
            cfg,
            last_heartbeat: Arc::new(RwLock::new(Instant::now())),
            stop_notify: Arc::new(Notify::new()),
        }
    }

    fn healthy_window(&self) -> Duration {
        Duration::from_millis(self.cfg.wss_max_silent_ms)
    }

    async fn update_heartbeat(&self) {
        *self.last_heartbeat.write().await = Instant::now();
    }

    /// One connection lifetime. Returns when the stream ends, the watchdog
    /// fires, or a stop is requested (the latter returns `false` = don't
    /// reconnect).
    async fn run_connection(&self, raw_tx: &RawEventSender, dedup: &mut SignatureWindow) -> bool {
        let mut request = match self.endpoint.as_str().into_client_request() {
            Ok(r) => r,
            Err(e) => {
                error!(endpoint = self.endpoint.as_str(), error = %e, "invalid firehose endpoint");
                return false;
            }
        };
        if let Some(token) = &self.token {
            match format!("Bearer {token}").parse() {
                Ok(value) => {
                    request.headers_mut().insert("authorization", value);
                }
                Err(e) => warn!(error = %e, "unusable firehose token; connecting without auth"),
            }
        }

        let (ws, _) = match connect_async(request).await {
            Ok(ok) => ok,
            Err(e) => {
                error!(endpoint = self.endpoint.as_str(), error = %e, "firehose connect failed");
                return true;
            }
        };
        info!(endpoint = self.endpoint.as_str(), "firehose connected");

        let (mut write, mut read) = ws.split();
        let subscribe = subscribe_request(&self.programs.account_include());
        if let Err(e) = write.send(Message::Text(subscribe)).await {
            error!(error = %e, "firehose subscribe failed");
            return true;
        }
        self.update_heartbeat().await;

        let mut ping_ticker = time::interval(Duration::from_secs(self.cfg.wss_ping_interval_secs));
        ping_ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let notified = self.stop_notify.notified();
        tokio::pin!(notified);

        loop {
            tokio::select! {
                _ = &mut notified => {
                    warn!(target: "firehose", "stop requested; closing connection");
                    let _ = write.send(Message::Close(None)).await;
                    return false;
                }
                _ = ping_ticker.tick() => {
                    if write.send(Message::Ping(Vec::new())).await.is_err() {
                        warn!(target: "firehose", "ping failed; reconnecting");
                        return true;
                    }
                    let last = *self.last_heartbeat.read().await;
                    if last.elapsed() > self.healthy_window() {
                        warn!(target: "firehose", "silent too long; reconnecting");
                        return true;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.update_heartbeat().await;
                            match parse_frame(&text) {
                                Ok(Some(event)) => {
                                    if !dedup.insert(&event.signature) {
                                        metrics().record_frame(true);
                                        continue;
                                    }
                                    if raw_tx.send(event).await.is_err() {
                                        warn!(target: "firehose", "raw channel closed; stopping");
                                        return false;
                                    }
                                }
                                Ok(None) => {}
                                Err(SniperError::Protocol { message }) => {
                                    metrics().record_parse_error();
                                    debug!(target: "firehose", message, "malformed frame dropped");
                                }
                                Err(e) => {
                                    metrics().record_parse_error();
                                    debug!(target: "firehose", error = %e, "frame dropped");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            self.update_heartbeat().await;
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.update_heartbeat().await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            warn!(target: "firehose", ?frame, "server closed connection");
                            return true;
                        }
                        Some(Ok(_)) => {
                            // binary frames are not part of either provider contract
                            self.update_heartbeat().await;
                        }
                        Some(Err(e)) => {
                            warn!(target: "firehose", error = %e, "stream error; reconnecting");
                            return true;
                        }
                        None => {
                            warn!(target: "firehose", "stream ended; reconnecting");
                            return true;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TxStreamSource for WssSource {
    async fn run(&self, raw_tx: RawEventSender) {
        let mut dedup = SignatureWindow::new(INGEST_SIGNATURE_CAP);
        let mut backoff = self.cfg.wss_reconnect_backoff_ms.max(1_000);
        let max_backoff = self.cfg.wss_reconnect_backoff_max_ms;

        loop {
            let started = Instant::now();
            let reconnect = self.run_connection(&raw_tx, &mut dedup).await;
            if !reconnect {
                return;
            }
            // A healthy run resets the backoff schedule.
            if started.elapsed() > Duration::from_secs(60) {
                backoff = self.cfg.wss_reconnect_backoff_ms.max(1_000);
            }

            debug!(target: "firehose", backoff_ms = backoff, "reconnecting after backoff");
            tokio::select! {
                _ = self.stop_notify.notified() => return,
                _ = time::sleep(Duration::from_millis(backoff)) => {}
            }
            backoff = backoff.saturating_mul(2).min(max_backoff.max(1_000));
        }
    }

    fn is_healthy(&self) -> bool {
        match self.last_heartbeat.try_read() {
            Ok(last) => last.elapsed() < self.healthy_window(),
            Err(_) => true,
        }
    }

    fn request_stop(&self) {
        self.stop_notify.notify_waiters();
    }
}
