//! Managed connection: lifecycle, locked register I/O, chunking and probing
//!
//! One `ManagedConnection` owns one device endpoint. A single `tokio` mutex
//! guards the client handle and the `connected` flag, so a poller cycle and
//! a manually triggered read can never interleave on the same socket. The
//! handle is replaced wholesale on every reconnect, never mutated in place.

use chrono::{DateTime, Utc};
use errors::{LinkError, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{ClientFactory, RegisterClient};
use crate::poller::PollerHandle;
use crate::reader::{plan_chunks, probe_addresses};
use crate::types::{
    validate_range, ConnectionConfig, ConnectionSnapshot, ConnectionSpec, DeviceLimits, PollEntry,
    PollSpec, ReadOutcome, ReadRequest, RegisterSpace, WriteValue,
};

/// Socket-side state guarded by the per-connection lock.
///
/// Invariant: `connected == true` implies `client.is_some()` and the handle
/// was healthy at the last operation.
struct IoState {
    client: Option<Box<dyn RegisterClient>>,
    connected: bool,
}

/// One managed Modbus TCP session
pub struct ManagedConnection {
    id: Uuid,
    name: String,
    config: ConnectionConfig,
    limits: DeviceLimits,
    factory: Arc<dyn ClientFactory>,
    io: Mutex<IoState>,
    last_read: Mutex<Option<Vec<u16>>>,
    connected_since: Mutex<Option<DateTime<Utc>>>,
    history: Mutex<VecDeque<PollEntry>>,
    poller: Mutex<Option<PollerHandle>>,
    poll_spec: Mutex<Option<PollSpec>>,
}

impl ManagedConnection {
    pub(crate) fn new(spec: ConnectionSpec, factory: Arc<dyn ClientFactory>) -> Self {
        let name = spec
            .name
            .unwrap_or_else(|| spec.config.endpoint());

        Self {
            id: Uuid::new_v4(),
            name,
            config: spec.config,
            limits: spec.limits,
            factory,
            io: Mutex::new(IoState {
                client: None,
                connected: false,
            }),
            last_read: Mutex::new(None),
            connected_since: Mutex::new(None),
            history: Mutex::new(VecDeque::new()),
            poller: Mutex::new(None),
            poll_spec: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    pub fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    pub async fn connected(&self) -> bool {
        self.io.lock().await.connected
    }

    /// Point-in-time copy of identity and state for UI listings
    pub async fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            id: self.id,
            name: self.name.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            unit: self.config.unit,
            connected: self.io.lock().await.connected,
            connect_timeout_ms: self.config.connect_timeout_ms,
            operation_timeout_ms: self.config.operation_timeout_ms,
            retries: self.config.retries,
            connected_since: *self.connected_since.lock().await,
            polling: self.poller.lock().await.is_some(),
        }
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Establish (or replace) the session socket.
    ///
    /// Never fails with an error: all internal faults are absorbed into the
    /// boolean result so callers can degrade gracefully.
    pub async fn connect(&self) -> bool {
        let mut state = self.io.lock().await;
        self.connect_locked(&mut state, None).await.is_ok()
    }

    /// Like [`connect`](Self::connect), with a one-off transport timeout
    /// replacing the configured `connect_timeout_ms` for this call only.
    pub async fn connect_with_timeout(&self, connect_timeout: Duration) -> bool {
        let mut state = self.io.lock().await;
        self.connect_locked(&mut state, Some(connect_timeout))
            .await
            .is_ok()
    }

    /// Drop the handle and mark disconnected. Idempotent.
    pub async fn close(&self) {
        let mut state = self.io.lock().await;
        state.client = None;
        state.connected = false;
        *self.connected_since.lock().await = None;
        debug!("Disconnected: {}", self.endpoint());
    }

    /// Connect attempt ladder, run while holding the I/O lock.
    ///
    /// Up to `1 + retries` attempts with linear backoff between them:
    /// predictable worst-case wait for interactive use, unlike exponential.
    async fn connect_locked(
        &self,
        state: &mut IoState,
        timeout_override: Option<Duration>,
    ) -> Result<()> {
        let endpoint = self.endpoint();
        let attempts_allowed = self.config.retries + 1;

        let mut config = self.config.clone();
        if let Some(t) = timeout_override {
            config.connect_timeout_ms = u64::try_from(t.as_millis()).unwrap_or(u64::MAX);
        }

        for attempt in 1..=attempts_allowed {
            // Discard any prior handle before dialing a fresh one
            state.client = None;
            state.connected = false;

            match self.factory.connect(&config).await {
                Ok(client) => {
                    state.client = Some(client);
                    state.connected = true;
                    *self.connected_since.lock().await = Some(Utc::now());
                    info!("Connected: {} (attempt {})", endpoint, attempt);
                    return Ok(());
                },
                Err(e) => {
                    if attempt < attempts_allowed {
                        let backoff = self.config.retry_backoff() * attempt;
                        warn!(
                            "Retry {}/{}: {} ({}ms)",
                            attempt,
                            attempts_allowed,
                            e,
                            backoff.as_millis()
                        );
                        sleep(backoff).await;
                    } else {
                        warn!("Connect failed: {}: {}", endpoint, e);
                    }
                },
            }
        }

        state.client = None;
        state.connected = false;
        Err(LinkError::ConnectFailed {
            endpoint,
            attempts: attempts_allowed,
        })
    }

    /// Make sure a healthy handle is present, reconnecting once if allowed
    async fn ensure_ready(&self, state: &mut IoState, allow_reconnect: bool) -> Result<()> {
        if state.connected && state.client.is_some() {
            return Ok(());
        }

        if !allow_reconnect {
            return Err(LinkError::ConnectionClosed {
                endpoint: self.endpoint(),
            });
        }

        // Reconnect failure escalates to ConnectionClosed for the caller
        self.connect_locked(state, None)
            .await
            .map_err(|_| LinkError::ConnectionClosed {
                endpoint: self.endpoint(),
            })
            .map(|_| ())
    }

    /// Apply the fault -> disconnect table after a wire operation
    async fn note_fault(&self, state: &mut IoState, fault: &LinkError) {
        if fault.forces_disconnect() {
            warn!("Link suspect, closing {}: {}", self.endpoint(), fault);
            state.client = None;
            state.connected = false;
            *self.connected_since.lock().await = None;
        }
    }

    // ========================================================================
    // Register I/O
    // ========================================================================

    /// Read `count` items from `space` starting at `address`.
    ///
    /// Values are unsigned 16-bit register words; coil/discrete reads report
    /// 0/1. Oversized requests are chunked transparently.
    pub async fn read(
        &self,
        space: RegisterSpace,
        address: u16,
        count: u16,
        allow_reconnect: bool,
    ) -> Result<Vec<u16>> {
        let req = ReadRequest::new(space, address, count).allow_reconnect(allow_reconnect);
        Ok(self.read_with(req).await?.values)
    }

    /// Read with full request options, including the opt-in address probe
    pub async fn read_with(&self, req: ReadRequest) -> Result<ReadOutcome> {
        validate_range(req.address, req.count)?;

        let mut state = self.io.lock().await;
        let outcome = self.read_locked(&mut state, req).await;

        if let Ok(outcome) = &outcome {
            *self.last_read.lock().await = Some(outcome.values.clone());
        }
        outcome
    }

    async fn read_locked(&self, state: &mut IoState, req: ReadRequest) -> Result<ReadOutcome> {
        match self
            .chunked_read(state, req.space, req.address, req.count, req.allow_reconnect)
            .await
        {
            Ok(values) => Ok(ReadOutcome::plain(values)),
            Err(fault) if fault.is_illegal_address() && req.try_alternatives => {
                self.probe_fallback(state, req, fault).await
            },
            Err(fault) => Err(fault),
        }
    }

    /// Sequential sub-requests within the device's per-request limit.
    ///
    /// A sub-response shorter than requested ends the read early: the partial
    /// concatenation is returned, a short response is not itself an error.
    async fn chunked_read(
        &self,
        state: &mut IoState,
        space: RegisterSpace,
        address: u16,
        count: u16,
        allow_reconnect: bool,
    ) -> Result<Vec<u16>> {
        let chunks = plan_chunks(address, count, self.limits.max_for(space));
        let delay = self.limits.inter_request_delay();
        let mut values = Vec::with_capacity(count as usize);

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                sleep(delay).await;
            }

            let part = self
                .single_read(state, space, chunk.address, chunk.count, allow_reconnect)
                .await?;
            let short = part.len() < chunk.count as usize;
            values.extend(part);

            if short {
                debug!(
                    "Short response at {} ({}/{} items), stopping",
                    chunk.address,
                    values.len(),
                    count
                );
                break;
            }
        }

        Ok(values)
    }

    /// One wire read with the disconnect policy applied on fault
    async fn single_read(
        &self,
        state: &mut IoState,
        space: RegisterSpace,
        address: u16,
        count: u16,
        allow_reconnect: bool,
    ) -> Result<Vec<u16>> {
        self.ensure_ready(state, allow_reconnect).await?;

        let client = state.client.as_mut().ok_or_else(|| LinkError::ConnectionClosed {
            endpoint: self.endpoint(),
        })?;

        match client.read(space, address, count).await {
            Ok(values) => Ok(values),
            Err(fault) => {
                self.note_fault(state, &fault).await;
                Err(fault)
            },
        }
    }

    /// Probe neighboring addresses after an illegal-address fault.
    ///
    /// Single-unit reads at `+1, -1, +2, -2, ...`; the first responsive
    /// address becomes the new base and the original request is reissued
    /// there with probing disabled. Probes reconnect freely: the fault that
    /// got us here already marked the link suspect.
    async fn probe_fallback(
        &self,
        state: &mut IoState,
        req: ReadRequest,
        original: LinkError,
    ) -> Result<ReadOutcome> {
        let radius = self.limits.probe_radius;
        info!(
            "Probing +/-{} around {} after illegal address",
            radius, req.address
        );

        for candidate in probe_addresses(req.address, radius) {
            match self.single_read(state, req.space, candidate, 1, true).await {
                Ok(_) => {
                    debug!("Probe hit at {}, rebasing read", candidate);
                    let values = self
                        .chunked_read(state, req.space, candidate, req.count, true)
                        .await?;
                    return Ok(ReadOutcome {
                        values,
                        adjusted_from: Some(req.address),
                        adjusted_to: Some(candidate),
                    });
                },
                Err(e) => {
                    debug!("Probe {} failed: {}", candidate, e);
                },
            }
        }

        // Re-raise the original fault with the probe attempt noted
        Err(match original {
            LinkError::IllegalAddress {
                endpoint, address, ..
            } => LinkError::IllegalAddress {
                endpoint,
                address,
                detail: format!(", no responsive address within +/-{radius}"),
            },
            other => other,
        })
    }

    /// Write one or more values to a writable register space.
    ///
    /// Single-value and multi-value writes dispatch to distinct wire
    /// operations for devices that only support one of them.
    pub async fn write(
        &self,
        space: RegisterSpace,
        address: u16,
        value: impl Into<WriteValue>,
        allow_reconnect: bool,
    ) -> Result<()> {
        if !space.writable() {
            return Err(LinkError::UnsupportedOperation {
                space: space.to_string(),
                operation: "write".to_string(),
            });
        }

        let value = value.into();
        match &value {
            WriteValue::Single(_) => validate_range(address, 1)?,
            WriteValue::Multiple(values) => {
                if values.is_empty() {
                    return Err(LinkError::Validation("empty value list".to_string()));
                }
                let count = u16::try_from(values.len()).map_err(|_| {
                    LinkError::Validation(format!("value list too long: {}", values.len()))
                })?;
                validate_range(address, count)?;
            },
        }

        let mut state = self.io.lock().await;
        self.ensure_ready(&mut state, allow_reconnect).await?;

        let client = state.client.as_mut().ok_or_else(|| LinkError::ConnectionClosed {
            endpoint: self.endpoint(),
        })?;

        let result = match &value {
            WriteValue::Single(v) => client.write_single(space, address, *v).await,
            WriteValue::Multiple(values) => client.write_multiple(space, address, values).await,
        };

        match result {
            Ok(()) => Ok(()),
            Err(fault) => {
                self.note_fault(&mut state, &fault).await;
                Err(fault)
            },
        }
    }

    /// Most recent successful read values, if any
    pub async fn last_read(&self) -> Option<Vec<u16>> {
        self.last_read.lock().await.clone()
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Start the background poller, replacing any existing one.
    ///
    /// Stops and joins the previous poller first, so at most one cadence is
    /// ever appending to this connection's history.
    pub async fn start_poll(self: &Arc<Self>, spec: PollSpec) -> Result<()> {
        spec.validate()?;

        self.stop_poll().await;

        *self.poll_spec.lock().await = Some(spec.clone());
        let handle = PollerHandle::spawn(Arc::clone(self), spec);
        *self.poller.lock().await = Some(handle);
        Ok(())
    }

    /// Signal the poller and wait (bounded) for it to terminate.
    ///
    /// If the loop is stuck past the bound it is detached; its next cycle
    /// still observes the signal and exits.
    pub async fn stop_poll(&self) {
        let handle = self.poller.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    /// The most recently configured poll, if any
    pub async fn poll_spec(&self) -> Option<PollSpec> {
        self.poll_spec.lock().await.clone()
    }

    /// Snapshot copy of the bounded poll history, oldest first
    pub async fn poll_history(&self) -> Vec<PollEntry> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// Drop all accumulated history entries
    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    /// Append one poll cycle record, evicting the oldest past `max_history`
    pub(crate) async fn record_poll_entry(&self, entry: PollEntry, max_history: usize) {
        let mut history = self.history.lock().await;
        history.push_back(entry);
        while history.len() > max_history {
            history.pop_front();
        }
    }
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("endpoint", &self.endpoint())
            .finish_non_exhaustive()
    }
}
