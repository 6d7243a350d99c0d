// Per-connection device session
// State machine: routing, identifying, running, closing

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::router;
use crate::codec::teltonika::{TeltonikaCodec, TeltonikaEvent, GREETING_ACCEPT, GREETING_REJECT};
use crate::codec::tfms90::{self, DataFrame, LoginRequest, Tfms90Codec, Tfms90Event};
use crate::constants;
use crate::device::{tfms90_key, DevicePatch};
use crate::error::{SessionError, StoreError};
use crate::store::StoreGateway;
use crate::telemetry::{Protocol, TelemetryRecord};

/// Per-session tunables, threaded in from the top-level configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub peek_timeout: Duration,
    pub identify_timeout: Duration,
    pub idle_timeout_tfms90: Duration,
    pub idle_timeout_teltonika: Duration,
    pub coalesce_interval: Duration,
    pub store_call_timeout: Duration,
    pub insert_queue_depth: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            peek_timeout: Duration::from_secs(constants::ROUTER_PEEK_TIMEOUT_SECS),
            identify_timeout: Duration::from_secs(constants::IDENTIFY_TIMEOUT_SECS),
            idle_timeout_tfms90: Duration::from_secs(constants::IDLE_TIMEOUT_TFMS90_SECS),
            idle_timeout_teltonika: Duration::from_secs(constants::IDLE_TIMEOUT_TELTONIKA_SECS),
            coalesce_interval: Duration::from_secs(constants::TOUCH_COALESCE_SECS),
            store_call_timeout: Duration::from_secs(constants::STORE_CALL_TIMEOUT_SECS),
            insert_queue_depth: constants::INSERT_QUEUE_DEPTH,
        }
    }
}

/// State of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Running the protocol router.
    Routing,
    /// Awaiting LG (TFMS90) or the IMEI greeting (Teltonika).
    Identifying,
    /// Parsing, acking and persisting telemetry.
    Running,
    /// Flushing and closing the socket.
    Closing,
}

/// Insert and drop tallies, logged when the session closes.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub inserted: AtomicU64,
    pub dropped: AtomicU64,
}

/// Identity bound during the Identifying state.
#[derive(Debug, Clone)]
struct Identity {
    /// Canonical key telemetry rows are written under.
    device_key: String,
    /// Id echoed in TFMS90 acks.
    ack_id: String,
}

/// One device connection's state machine.
pub struct DeviceSession {
    conn: Connection,
    store: Arc<dyn StoreGateway>,
    settings: SessionSettings,
    cancel: CancellationToken,
    state: SessionState,
    identity: Option<Identity>,
    counters: Arc<SessionCounters>,
}

impl DeviceSession {
    pub fn new(
        conn: Connection,
        store: Arc<dyn StoreGateway>,
        settings: SessionSettings,
        cancel: CancellationToken,
    ) -> Self {
        DeviceSession {
            conn,
            store,
            settings,
            cancel,
            state: SessionState::Routing,
            identity: None,
            counters: Arc::new(SessionCounters::default()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion. Returns when the device
    /// disconnects, goes idle, fails identification, or shutdown is
    /// signalled.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::Routing;
        let (protocol, peek) = router::route(&mut self.conn, self.settings.peek_timeout).await?;

        self.state = SessionState::Identifying;
        let result = match protocol {
            Protocol::Tfms90 => self.run_tfms90(peek).await,
            Protocol::Teltonika => self.run_teltonika(peek).await,
        };

        self.state = SessionState::Closing;
        let _ = self.conn.shutdown().await;
        info!(
            peer = %self.conn.peer_addr(),
            device = self.identity.as_ref().map(|i| i.device_key.as_str()).unwrap_or("-"),
            inserted = self.counters.inserted.load(Ordering::Relaxed),
            dropped = self.counters.dropped.load(Ordering::Relaxed),
            "session closed"
        );
        result
    }

    // ---- TFMS90 ----

    async fn run_tfms90(&mut self, peek: Vec<u8>) -> Result<(), SessionError> {
        let mut codec = Tfms90Codec::new();
        let mut pending: VecDeque<Tfms90Event> = codec.feed(&peek).into();

        // Identifying: wait for an LG, or accept a data frame from a
        // reconnecting device that skips login. Either way the identity
        // must resolve to a device row before anything is persisted.
        let deadline = Instant::now() + self.settings.identify_timeout;
        let mut buf = vec![0u8; constants::READ_CHUNK_BYTES];
        while self.identity.is_none() {
            if let Some(event) = pending.pop_front() {
                match event {
                    Tfms90Event::Login(login) => self.login(login).await?,
                    Tfms90Event::Data(frame) => {
                        let device_key = frame.record.device_key.clone();
                        let device = self
                            .store_call(self.store.lookup_by_key(&device_key))
                            .await?;
                        if device.is_none() {
                            warn!(device = %device_key, "data frame from unregistered device, closing");
                            return Err(SessionError::UnknownDevice(device_key));
                        }
                        debug!(device = %frame.device_field, "identified by data frame");
                        self.identity = Some(Identity {
                            device_key,
                            ack_id: frame.device_field.clone(),
                        });
                        // Reprocess in the running loop so it is acked
                        // and persisted like any other frame.
                        pending.push_front(Tfms90Event::Data(frame));
                    }
                }
                continue;
            }
            let n = self.read_until(deadline, &mut buf).await?;
            pending.extend(codec.feed(&buf[..n]));
        }

        self.state = SessionState::Running;
        let lane = InsertLane::start(
            self.store.clone(),
            self.device_key(),
            self.settings.clone(),
            self.counters.clone(),
        );

        let result = self.tfms90_loop(&mut codec, &mut pending, &lane).await;
        lane.finish().await;
        result
    }

    async fn tfms90_loop(
        &mut self,
        codec: &mut Tfms90Codec,
        pending: &mut VecDeque<Tfms90Event>,
        lane: &InsertLane,
    ) -> Result<(), SessionError> {
        let idle = self.settings.idle_timeout_tfms90;
        let mut buf = vec![0u8; constants::READ_CHUNK_BYTES];

        loop {
            while let Some(event) = pending.pop_front() {
                match event {
                    // A repeated LG re-registers and refreshes firmware.
                    Tfms90Event::Login(login) => self.login(login).await?,
                    Tfms90Event::Data(frame) => self.handle_frame(frame, lane).await?,
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("shutdown signalled");
                    return Ok(());
                }
                read = time::timeout(idle, self.conn.read_chunk(&mut buf)) => match read {
                    Err(_) => {
                        info!("idle timeout, closing");
                        return Ok(());
                    }
                    Ok(Ok(0)) => {
                        debug!("device EOF");
                        return Ok(());
                    }
                    Ok(Ok(n)) => pending.extend(codec.feed(&buf[..n])),
                    Ok(Err(e)) => return Err(e.into()),
                },
            }
        }
    }

    /// Resolve an LG against the store: unknown IMEI terminates the
    /// connection with nothing persisted; a known device gets its short
    /// id (allocating on first contact) and the login ack.
    async fn login(&mut self, login: LoginRequest) -> Result<(), SessionError> {
        let device = self
            .store_call(self.store.lookup_by_imei(&login.imei))
            .await?;
        let Some(device) = device else {
            warn!(imei = %login.imei, "login from unregistered imei, closing");
            return Err(SessionError::UnknownDevice(login.imei));
        };

        let short_id = match device.short_device_id {
            Some(id) => id,
            None => {
                self.store_call(self.store.allocate_short_id(Protocol::Tfms90))
                    .await?
            }
        };

        let patch = DevicePatch {
            device_key: tfms90_key(short_id),
            short_device_id: short_id,
            firmware_version: login.firmware_version,
            sim_iccid: login.sim_iccid,
            last_seen: Utc::now(),
            is_active: true,
        };
        self.store_call(self.store.register_device(device.id, patch))
            .await?;

        info!(imei = %login.imei, short_id, "device registered");
        self.identity = Some(Identity {
            device_key: tfms90_key(short_id),
            ack_id: short_id.to_string(),
        });
        self.conn.write_bytes(&tfms90::login_ack(short_id)).await?;
        Ok(())
    }

    async fn handle_frame(
        &mut self,
        frame: DataFrame,
        lane: &InsertLane,
    ) -> Result<(), SessionError> {
        let (device_key, ack_id) = match &self.identity {
            Some(identity) => (identity.device_key.clone(), identity.ack_id.clone()),
            None => {
                warn!("data frame before identification, dropping");
                return Ok(());
            }
        };
        if frame.device_field != ack_id {
            warn!(
                bound = %ack_id,
                seen = %frame.device_field,
                "frame device id differs from bound identity"
            );
        }

        let mut record = frame.record;
        record.device_key = device_key;
        lane.enqueue(record, &self.counters);

        let ack = tfms90::data_ack(&frame.ack_token, &ack_id, 1);
        self.conn.write_bytes(&ack).await?;
        Ok(())
    }

    // ---- Teltonika ----

    async fn run_teltonika(&mut self, peek: Vec<u8>) -> Result<(), SessionError> {
        let mut codec = TeltonikaCodec::new();
        let mut pending: VecDeque<TeltonikaEvent> =
            codec.feed(&peek).map_err(SessionError::Desync)?.into();

        let deadline = Instant::now() + self.settings.identify_timeout;
        let mut buf = vec![0u8; constants::READ_CHUNK_BYTES];
        while self.identity.is_none() {
            if let Some(event) = pending.pop_front() {
                match event {
                    TeltonikaEvent::Greeting { imei } => self.greet(imei).await?,
                    other => {
                        warn!(?other, "packet before greeting, dropping");
                    }
                }
                continue;
            }
            let n = self.read_until(deadline, &mut buf).await?;
            pending.extend(codec.feed(&buf[..n]).map_err(SessionError::Desync)?);
        }

        self.state = SessionState::Running;
        let lane = InsertLane::start(
            self.store.clone(),
            self.device_key(),
            self.settings.clone(),
            self.counters.clone(),
        );

        let result = self.teltonika_loop(&mut codec, &mut pending, &lane).await;
        lane.finish().await;
        result
    }

    /// Accept or reject the IMEI greeting. Acceptance requires the IMEI
    /// to be registered; rejection writes the 0x00 ack and closes.
    async fn greet(&mut self, imei: String) -> Result<(), SessionError> {
        let known = self.store_call(self.store.registered_imeis()).await?;
        if !known.contains(&imei) {
            warn!(%imei, "greeting from unregistered imei, rejecting");
            let _ = self.conn.write_bytes(&GREETING_REJECT).await;
            return Err(SessionError::UnknownDevice(imei));
        }

        info!(%imei, "device accepted");
        self.identity = Some(Identity {
            device_key: imei.clone(),
            ack_id: imei,
        });
        self.conn.write_bytes(&GREETING_ACCEPT).await?;
        Ok(())
    }

    async fn teltonika_loop(
        &mut self,
        codec: &mut TeltonikaCodec,
        pending: &mut VecDeque<TeltonikaEvent>,
        lane: &InsertLane,
    ) -> Result<(), SessionError> {
        let idle = self.settings.idle_timeout_teltonika;
        let mut buf = vec![0u8; constants::READ_CHUNK_BYTES];

        loop {
            while let Some(event) = pending.pop_front() {
                match event {
                    TeltonikaEvent::Batch { records, ack } => {
                        let device_key = self.device_key();
                        for mut record in records {
                            record.device_key = device_key.clone();
                            lane.enqueue(record, &self.counters);
                        }
                        self.conn.write_bytes(&ack).await?;
                    }
                    // CRC or structure failure: zero ack, stream stays up.
                    TeltonikaEvent::Rejected { ack, reason } => {
                        warn!(%reason, "batch rejected");
                        self.conn.write_bytes(&ack).await?;
                    }
                    TeltonikaEvent::Greeting { imei } => {
                        warn!(%imei, "unexpected repeat greeting, ignoring");
                    }
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("shutdown signalled");
                    return Ok(());
                }
                read = time::timeout(idle, self.conn.read_chunk(&mut buf)) => match read {
                    Err(_) => {
                        info!("idle timeout, closing");
                        return Ok(());
                    }
                    Ok(Ok(0)) => {
                        debug!("device EOF");
                        return Ok(());
                    }
                    Ok(Ok(n)) => {
                        pending.extend(codec.feed(&buf[..n]).map_err(SessionError::Desync)?)
                    }
                    Ok(Err(e)) => return Err(e.into()),
                },
            }
        }
    }

    // ---- shared ----

    fn device_key(&self) -> String {
        self.identity
            .as_ref()
            .map(|i| i.device_key.clone())
            .unwrap_or_default()
    }

    /// Read within the identification deadline.
    async fn read_until(
        &mut self,
        deadline: Instant,
        buf: &mut [u8],
    ) -> Result<usize, SessionError> {
        match time::timeout_at(deadline, self.conn.read_chunk(buf)).await {
            Ok(Ok(0)) => Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "device closed before identification",
            ))),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SessionError::IdentifyTimeout),
        }
    }

    /// Apply the per-operation store deadline.
    async fn store_call<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, SessionError> {
        match time::timeout(self.settings.store_call_timeout, op).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(StoreError::Timeout.into()),
        }
    }
}

/// Per-connection store writer.
///
/// The session parses and acks synchronously and pushes records through
/// a bounded queue; this task drains it in order, inserting with one
/// retry and coalescing last-seen touches. A full queue drops the
/// record, which beats stalling the device into a retry storm.
struct InsertLane {
    tx: mpsc::Sender<TelemetryRecord>,
    handle: JoinHandle<()>,
}

impl InsertLane {
    fn start(
        store: Arc<dyn StoreGateway>,
        device_key: String,
        settings: SessionSettings,
        counters: Arc<SessionCounters>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<TelemetryRecord>(settings.insert_queue_depth);
        let handle = tokio::spawn(async move {
            let mut latest_ts: Option<DateTime<Utc>> = None;
            let mut last_touch: Option<Instant> = None;

            while let Some(record) = rx.recv().await {
                latest_ts = Some(latest_ts.map_or(record.timestamp, |t| t.max(record.timestamp)));

                if insert_with_retry(&store, &record, settings.store_call_timeout).await {
                    counters.inserted.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                }

                let due = last_touch.map_or(true, |t| t.elapsed() >= settings.coalesce_interval);
                if due {
                    if let Some(ts) = latest_ts {
                        let touch = store.touch_last_seen(&device_key, ts);
                        if matches!(
                            time::timeout(settings.store_call_timeout, touch).await,
                            Ok(Ok(()))
                        ) {
                            last_touch = Some(Instant::now());
                        }
                    }
                }
            }

            // Parting touch so the latest timestamp survives the close.
            if let Some(ts) = latest_ts {
                let _ = time::timeout(
                    settings.store_call_timeout,
                    store.touch_last_seen(&device_key, ts),
                )
                .await;
            }
        });

        InsertLane { tx, handle }
    }

    fn enqueue(&self, record: TelemetryRecord, counters: &SessionCounters) {
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(device = %record.device_key, "insert queue full, dropping record");
            }
            Err(TrySendError::Closed(record)) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(device = %record.device_key, "insert lane gone, dropping record");
            }
        }
    }

    /// Close the queue and wait for the drain. Writes already submitted
    /// are allowed to complete.
    async fn finish(self) {
        drop(self.tx);
        let _ = self.handle.await;
    }
}

async fn insert_with_retry(
    store: &Arc<dyn StoreGateway>,
    record: &TelemetryRecord,
    deadline: Duration,
) -> bool {
    for attempt in 0..2 {
        match time::timeout(deadline, store.insert_telemetry(record)).await {
            Ok(Ok(_)) => return true,
            Ok(Err(e)) => {
                warn!(error = %e, attempt, "telemetry insert failed");
            }
            Err(_) => {
                warn!(attempt, "telemetry insert timed out");
            }
        }
    }
    false
}
