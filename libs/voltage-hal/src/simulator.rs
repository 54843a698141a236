//! Simulated register device
//!
//! [`SimulatedDevice`] emulates an environmental sensor controller on a
//! byte-oriented bus: random latency, injected transient faults, scenario
//! presets and a background task that drifts the sensor registers.
//!
//! Lock discipline:
//! - the register map lock is never held across an `.await`
//! - the state cell is never held while events are emitted
//! - change events for one address reach the sink in apply order
//! - lifecycle operations re-check the state after every simulated delay, so
//!   a concurrent `release` wins and the operation reports `false`

mod fault;
mod mutation;
mod scenario;
mod store;

pub use fault::FaultInjector;
pub use scenario::Scenario;
pub use store::{RegisterChange, RegisterStore};

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bytes::bit_field::set_bit;
use crate::catalog::{self, addr, status_bits, DeviceDefinition};
use crate::config::{
    CommunicationConfig, FaultInjectionConfig, MutationConfig, ProtocolKind, SimulatorConfig,
};
use crate::device::{ConnectionState, Device, DeviceDataResult, DeviceInfo, DeviceLogger, ResetKind};
use crate::error::{CommErrorKind, HalError, Result};
use crate::events::{DeviceEvent, SharedEventSink};
use crate::register::{RegisterAccess, RegisterMap};
use crate::statistics::{CommunicationStatistics, StatisticsTracker};
use mutation::MutationTask;

/// Largest single step of the temperature/humidity drift, in raw counts
const DRIFT_STEP: i32 = 15;
/// Pull towards the scenario target per tick, in raw counts
const DRIFT_PULL: i32 = 5;
/// Humidity is reported in 0.01 %RH
const HUMIDITY_MAX: i32 = 10_000;

const CAPABILITIES: [&str; 8] = [
    "read",
    "write",
    "transfer",
    "probe",
    "soft_reset",
    "factory_reset",
    "fault_injection",
    "background_drift",
];

enum Latency {
    Elapsed,
    Cancelled,
    TimedOut,
}

/// Shared state of one simulated device
pub(crate) struct DeviceInner {
    id: String,
    name: String,
    definition: DeviceDefinition,
    register_maps: RwLock<Arc<Vec<RegisterMap>>>,
    communication: RwLock<CommunicationConfig>,
    scenario: RwLock<Scenario>,
    mutation_config: MutationConfig,
    state: Mutex<ConnectionState>,
    store: RegisterStore,
    faults: FaultInjector,
    stats: StatisticsTracker,
    /// WriteOnce registers programmed since the last factory reset
    programmed: Mutex<HashSet<u32>>,
    sink: SharedEventSink,
    logger: DeviceLogger,
    mutation: MutationTask,
    disposed: AtomicBool,
}

/// Simulated environmental sensor controller
///
/// Cloning yields another handle to the same device.
#[derive(Clone)]
pub struct SimulatedDevice {
    inner: Arc<DeviceInner>,
}

impl std::fmt::Debug for SimulatedDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDevice")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state())
            .finish()
    }
}

impl SimulatedDevice {
    /// Simulated environmental sensor with the catalog register maps
    pub fn new(config: SimulatorConfig, sink: SharedEventSink) -> Result<Self> {
        Self::with_definition(config, catalog::environmental_sensor(), sink)
    }

    pub fn with_definition(
        config: SimulatorConfig,
        definition: DeviceDefinition,
        sink: SharedEventSink,
    ) -> Result<Self> {
        config.validate()?;
        definition.validate()?;

        let logger = DeviceLogger::new(&config.device_id, &config.name);
        logger.log_config("scenario", config.scenario.as_str());
        logger.log_config(
            "latency",
            &format!("{}..={}ms", config.latency.min_ms, config.latency.max_ms),
        );
        if config.fault_injection.enabled {
            logger.log_config(
                "fault_probability",
                &config.fault_injection.probability.to_string(),
            );
        }

        let inner = DeviceInner {
            store: RegisterStore::new(definition.default_values()),
            register_maps: RwLock::new(Arc::new(definition.register_maps.clone())),
            faults: FaultInjector::new(config.latency, config.fault_injection, config.seed),
            id: config.device_id,
            name: config.name,
            definition,
            communication: RwLock::new(config.communication),
            scenario: RwLock::new(config.scenario),
            mutation_config: config.mutation,
            state: Mutex::new(ConnectionState::Uninitialized),
            stats: StatisticsTracker::new(),
            programmed: Mutex::new(HashSet::new()),
            sink,
            logger,
            mutation: MutationTask::default(),
            disposed: AtomicBool::new(false),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Release and permanently disable the device (idempotent)
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.release().await;
        info!("Device {} disposed", self.inner.id);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    pub fn scenario(&self) -> Scenario {
        *self.inner.scenario.read()
    }

    /// Takes effect at the next soft reset or initialise
    pub fn set_scenario(&self, scenario: Scenario) {
        self.inner.logger.log_config("scenario", scenario.as_str());
        *self.inner.scenario.write() = scenario;
    }

    pub fn fault_injection(&self) -> FaultInjectionConfig {
        self.inner.faults.fault_injection()
    }

    pub fn set_fault_injection(&self, config: FaultInjectionConfig) -> Result<()> {
        if !(0.0..=1.0).contains(&config.probability) {
            return Err(HalError::invalid_config(
                "fault_injection.probability",
                format!("{} not in [0, 1]", config.probability),
            ));
        }
        self.inner.faults.set_fault_injection(config);
        Ok(())
    }

    /// Swap one bit field's label map; readers holding the old maps keep them
    pub fn replace_bit_field_labels(
        &self,
        address: u32,
        field: &str,
        labels: BTreeMap<u32, String>,
    ) -> Result<()> {
        let mut guard = self.inner.register_maps.write();
        let mut maps: Vec<RegisterMap> = (**guard).clone();

        let map = maps
            .iter_mut()
            .find(|m| m.address == address)
            .ok_or(HalError::RegisterNotFound(address))?;
        let register = map.name.clone();
        let bit_field = map
            .bit_field_mut(field)
            .ok_or_else(|| HalError::FieldNotFound {
                register,
                field: field.to_string(),
            })?;
        bit_field.replace_labels(labels);

        *guard = Arc::new(maps);
        Ok(())
    }

    /// Register bytes as currently stored, bypassing the bus
    pub fn register_snapshot(&self) -> BTreeMap<u32, u8> {
        self.inner.store.snapshot()
    }

    /// Number of times the register map lock has been taken
    pub fn register_lock_count(&self) -> u64 {
        self.inner.store.lock_count()
    }

    pub fn is_drift_running(&self) -> bool {
        self.inner.mutation.is_running()
    }

    pub fn definition(&self) -> &DeviceDefinition {
        &self.inner.definition
    }

    fn start_drift(&self) {
        if !self.inner.mutation_config.enabled {
            return;
        }
        if self
            .inner
            .mutation
            .start(Arc::downgrade(&self.inner), self.inner.mutation_config.period())
        {
            debug!(
                "Drift task started for {} every {:?}",
                self.inner.id,
                self.inner.mutation_config.period()
            );
        }
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        self.mutation.cancel();
    }
}

impl DeviceInner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(HalError::disposed(&self.id));
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `next`, then log and notify outside the state lock
    fn transition(&self, next: ConnectionState, reason: &str) -> Result<ConnectionState> {
        let old = {
            let mut state = self.state.lock();
            let old = *state;
            if !old.can_transition_to(next) {
                return Err(HalError::invalid_state(format!(
                    "{}: {} -> {} not allowed",
                    self.id, old, next
                )));
            }
            *state = next;
            old
        };

        self.logger.log_status(old, next, reason);
        self.sink.emit(DeviceEvent::ConnectionStateChanged {
            device_id: self.id.clone(),
            old,
            new: next,
            reason: Some(reason.to_string()),
            timestamp: Utc::now(),
        });
        Ok(old)
    }

    async fn release(&self) {
        if let Some(handle) = self.mutation.stop() {
            if let Err(e) = handle.await {
                self.emit_warning(&format!("drift task ended abnormally: {}", e));
            }
        }
        if self.state() != ConnectionState::Uninitialized {
            // any state may return to Uninitialized
            if let Err(e) = self.transition(ConnectionState::Uninitialized, "released") {
                warn!("{}: release refused: {}", self.id, e);
            }
        }
    }

    fn emit_warning(&self, message: &str) {
        warn!("{}: {}", self.id, message);
        self.sink.emit(DeviceEvent::Warning {
            device_id: self.id.clone(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// `false` once a concurrent release moved the device out of `expected`
    fn still_in(&self, expected: ConnectionState, operation: &str) -> bool {
        let state = self.state();
        if state == expected {
            return true;
        }
        self.emit_warning(&format!("{} abandoned, device is {}", operation, state));
        false
    }

    /// Closing transition of a lifecycle operation; a refusal means the
    /// device was released meanwhile and is reported as a warning
    fn settle(&self, next: ConnectionState, reason: &str) -> bool {
        match self.transition(next, reason) {
            Ok(_) => true,
            Err(e) => {
                self.emit_warning(&format!("{} ignored: {}", reason, e));
                false
            },
        }
    }

    fn emit_error(&self, address: Option<u32>, kind: CommErrorKind, message: &str) {
        self.logger
            .log_fault(address.unwrap_or_default(), kind, message);
        self.sink.emit(DeviceEvent::CommunicationError {
            device_id: self.id.clone(),
            address,
            kind,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn emit_changes(&self, changes: &[RegisterChange]) {
        let timestamp = Utc::now();
        for change in changes {
            self.sink.emit(DeviceEvent::RegisterValueChanged {
                device_id: self.id.clone(),
                address: change.address,
                old: change.old,
                new: change.new,
                timestamp,
            });
        }
    }

    /// Bus failure: count it, report it, build the result
    fn fail(
        &self,
        address: u32,
        kind: CommErrorKind,
        message: impl Into<String>,
        started: Instant,
    ) -> DeviceDataResult {
        let message = message.into();
        self.stats.record_failure();
        self.emit_error(Some(address), kind, &message);
        DeviceDataResult::failure(address, kind, message, started.elapsed())
    }

    fn cancelled(&self, address: u32, started: Instant) -> DeviceDataResult {
        self.stats.record_failure();
        debug!("{}: operation at 0x{:04X} cancelled", self.id, address);
        DeviceDataResult::cancelled(address, started.elapsed())
    }

    /// Sleep for a simulated bus delay, capped by the configured timeout
    async fn simulate_latency(&self, cancel: &CancellationToken) -> Latency {
        if cancel.is_cancelled() {
            return Latency::Cancelled;
        }

        let delay = self.faults.latency();
        let timeout = self.communication.read().timeout();
        if delay.is_zero() {
            return Latency::Elapsed;
        }

        let (wait, outcome) = if delay > timeout {
            (timeout, Latency::TimedOut)
        } else {
            (delay, Latency::Elapsed)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Latency::Cancelled,
            _ = tokio::time::sleep(wait) => outcome,
        }
    }

    /// Common front half of every data operation
    ///
    /// Returns the failure result when the transaction must not reach the
    /// register map.
    async fn begin_transaction(
        &self,
        address: u32,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Option<DeviceDataResult> {
        let state = self.state();
        if !state.is_ready() {
            return Some(self.fail(
                address,
                CommErrorKind::HardwareError,
                format!("device is {}", state),
                started,
            ));
        }

        match self.simulate_latency(cancel).await {
            Latency::Cancelled => return Some(self.cancelled(address, started)),
            Latency::TimedOut => {
                return Some(self.fail(
                    address,
                    CommErrorKind::Timeout,
                    format!("no response within {:?}", self.communication.read().timeout()),
                    started,
                ))
            },
            Latency::Elapsed => {},
        }

        // state may have moved while we slept
        let state = self.state();
        if !state.is_ready() {
            return Some(self.fail(
                address,
                CommErrorKind::HardwareError,
                format!("device is {}", state),
                started,
            ));
        }

        if let Some(kind) = self.faults.roll() {
            return Some(self.fail(address, kind, "injected bus fault", started));
        }
        None
    }

    /// Access violation message for the first register in range that forbids `op`
    fn access_violation(&self, address: u32, length: usize, write: bool) -> Option<String> {
        let maps = self.register_maps.read().clone();
        maps.iter()
            .filter(|m| overlaps(m, address, length))
            .find_map(|m| {
                if write && !m.access.is_writable() {
                    Some(format!("{} is read-only", m.name))
                } else if !write && !m.access.is_readable() {
                    Some(format!("{} is write-only", m.name))
                } else {
                    None
                }
            })
    }

    /// Claim every WriteOnce register in range, all or nothing
    fn claim_write_once(&self, address: u32, length: usize) -> std::result::Result<Vec<u32>, String> {
        let maps = self.register_maps.read().clone();
        let targets: Vec<&RegisterMap> = maps
            .iter()
            .filter(|m| m.access == RegisterAccess::WriteOnce && overlaps(m, address, length))
            .collect();

        let mut programmed = self.programmed.lock();
        if let Some(done) = targets.iter().find(|m| programmed.contains(&m.address)) {
            return Err(format!("{} already programmed", done.name));
        }
        let claimed: Vec<u32> = targets.iter().map(|m| m.address).collect();
        programmed.extend(claimed.iter().copied());
        Ok(claimed)
    }

    fn release_write_once(&self, claimed: &[u32]) {
        let mut programmed = self.programmed.lock();
        for address in claimed {
            programmed.remove(address);
        }
    }

    /// Write preset bytes through the store, notifying changes
    fn apply_updates(&self, updates: Vec<(u32, u8)>) -> std::result::Result<usize, u32> {
        self.store
            .modify(|_| updates, |changes| self.emit_changes(changes))
            .map(|changes| changes.len())
    }

    /// One drift step; `false` tells the task to exit
    pub(crate) fn mutation_tick(&self, token: &CancellationToken) -> bool {
        if token.is_cancelled() || self.is_disposed() {
            return false;
        }
        if !self.state().is_ready() {
            return true;
        }

        let scenario = *self.scenario.read();
        let result = self.store.modify(
            |map| {
                let byte = |a: u32| map.get(&a).copied().unwrap_or_default();
                let temperature =
                    u16::from_le_bytes([byte(addr::TEMPERATURE), byte(addr::TEMPERATURE + 1)]);
                let humidity = u16::from_le_bytes([byte(addr::HUMIDITY), byte(addr::HUMIDITY + 1)]);
                let threshold = byte(addr::THRESHOLD_HIGH);
                let status = byte(addr::STATUS);
                let counter = byte(addr::COUNTER);

                self.faults
                    .with_rng(|rng| {
                        let mut updates = Vec::with_capacity(6);

                        let temperature = match scenario.temperature_target() {
                            Some(target) => {
                                let noise = rng.gen_range(-DRIFT_STEP..=DRIFT_STEP);
                                let next = drift(temperature, target, noise, u16::MAX as i32);
                                let [lo, hi] = next.to_le_bytes();
                                updates.push((addr::TEMPERATURE, lo));
                                updates.push((addr::TEMPERATURE + 1, hi));
                                next
                            },
                            None => temperature,
                        };
                        if let Some(target) = scenario.humidity_target() {
                            let noise = rng.gen_range(-DRIFT_STEP..=DRIFT_STEP);
                            let [lo, hi] = drift(humidity, target, noise, HUMIDITY_MAX).to_le_bytes();
                            updates.push((addr::HUMIDITY, lo));
                            updates.push((addr::HUMIDITY + 1, hi));
                        }

                        updates.push((addr::COUNTER, counter.wrapping_add(1)));

                        // THRESHOLD_HIGH is whole degrees, TEMPERATURE is 0.01 degree, same offset
                        let alert = temperature as u32 >= threshold as u32 * 100;
                        let mut next_status = status as u32;
                        next_status = set_bit(next_status, status_bits::DATA_READY, true);
                        next_status = set_bit(next_status, status_bits::OVERRUN, rng.gen_bool(0.05));
                        next_status = set_bit(next_status, status_bits::ALERT, alert);
                        next_status =
                            set_bit(next_status, status_bits::ERROR, scenario.latches_error());
                        updates.push((addr::STATUS, next_status as u8));

                        updates
                    })
            },
            |changes| self.emit_changes(changes),
        );

        match result {
            Ok(changes) => self.logger.log_mutation(changes.len()),
            Err(missing) => {
                self.emit_warning(&format!("drift skipped, 0x{:04X} not defined", missing))
            },
        }
        true
    }
}

fn overlaps(map: &RegisterMap, address: u32, length: usize) -> bool {
    let start = address as u64;
    let end = start + length as u64;
    let range = map.address_range();
    (range.start as u64) < end && start < range.end as u64
}

/// Random walk of `current` pulled towards `target`, clamped to `0..=max`
fn drift(current: u16, target: u16, noise: i32, max: i32) -> u16 {
    let pull = (target as i32 - current as i32).signum() * DRIFT_PULL;
    (current as i32 + pull + noise).clamp(0, max) as u16
}

fn validate_range(address: u32, length: usize) -> Result<()> {
    let fits = length > 0
        && u32::try_from(length - 1)
            .ok()
            .and_then(|last| address.checked_add(last))
            .is_some();
    if fits {
        Ok(())
    } else {
        Err(HalError::InvalidAddressRange { address, length })
    }
}

#[async_trait]
impl Device for SimulatedDevice {
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn device_type(&self) -> &str {
        &self.inner.definition.device_type
    }

    fn protocol(&self) -> ProtocolKind {
        self.inner.communication.read().protocol()
    }

    fn address(&self) -> u16 {
        self.inner.communication.read().device_address
    }

    async fn initialize(&self, cancel: &CancellationToken) -> Result<bool> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        if inner.state().is_ready() {
            return Ok(true);
        }

        inner.transition(ConnectionState::Initializing, "initialize requested")?;
        inner.logger.log_init(self.protocol(), "identifying device");

        match inner.simulate_latency(cancel).await {
            Latency::Cancelled => {
                inner.settle(ConnectionState::Uninitialized, "initialization cancelled");
                return Ok(false);
            },
            Latency::TimedOut => {
                inner.emit_error(None, CommErrorKind::Timeout, "no response to identification");
                inner.settle(ConnectionState::Error, "identification timed out");
                return Ok(false);
            },
            Latency::Elapsed => {},
        }
        if !inner.still_in(ConnectionState::Initializing, "initialization") {
            return Ok(false);
        }

        if let Some(kind) = inner.faults.roll() {
            let message = format!("identification failed: {}", kind);
            inner.emit_error(None, kind, &message);
            inner.settle(ConnectionState::Error, &message);
            return Ok(false);
        }

        let (id_address, expected) = inner.definition.identity_register();
        match inner.store.read_range(id_address, 1) {
            Ok(bytes) if bytes.first() == Some(&expected) => {},
            other => {
                let message = match other {
                    Ok(bytes) => format!(
                        "unexpected device id {:?}, expected 0x{:02X}",
                        bytes.first(),
                        expected
                    ),
                    Err(missing) => format!("identity register 0x{:04X} not defined", missing),
                };
                inner.emit_error(Some(id_address), CommErrorKind::HardwareError, &message);
                inner.settle(ConnectionState::Error, &message);
                return Ok(false);
            },
        }

        let scenario = *inner.scenario.read();
        if let Err(missing) = inner.apply_updates(scenario.preset()) {
            let message = format!("scenario {} references undefined 0x{:04X}", scenario, missing);
            inner.emit_error(Some(missing), CommErrorKind::AddressError, &message);
            inner.settle(ConnectionState::Error, &message);
            return Ok(false);
        }

        if !inner.settle(ConnectionState::Ready, "initialized") {
            return Ok(false);
        }
        inner.logger.log_init(self.protocol(), &format!("ready, scenario {}", scenario));
        self.start_drift();
        Ok(true)
    }

    async fn release(&self) -> Result<()> {
        self.inner.release().await;
        Ok(())
    }

    async fn probe(&self, cancel: &CancellationToken) -> Result<bool> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        let state = inner.state();
        if !matches!(state, ConnectionState::Ready | ConnectionState::NotResponding) {
            return Ok(false);
        }

        let answered = match inner.simulate_latency(cancel).await {
            Latency::Cancelled => return Ok(false),
            Latency::TimedOut => {
                inner.emit_error(None, CommErrorKind::Timeout, "probe timed out");
                false
            },
            Latency::Elapsed => match inner.faults.roll() {
                Some(kind) => {
                    inner.emit_error(None, kind, "probe not answered");
                    false
                },
                None => true,
            },
        };

        match (inner.state(), answered) {
            (ConnectionState::Ready, false) => {
                inner.settle(ConnectionState::NotResponding, "probe not answered");
            },
            (ConnectionState::NotResponding, true) => {
                inner.settle(ConnectionState::Ready, "probe answered");
            },
            _ => {},
        }
        Ok(answered)
    }

    async fn reset(&self, kind: ResetKind, cancel: &CancellationToken) -> Result<bool> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        let previous = inner.transition(ConnectionState::Resetting, &format!("{} reset", kind))?;
        inner.logger.log_reset(kind);

        match inner.simulate_latency(cancel).await {
            Latency::Cancelled => {
                let fallback = if previous == ConnectionState::Ready {
                    ConnectionState::Ready
                } else {
                    ConnectionState::Error
                };
                if inner.settle(fallback, "reset cancelled") {
                    inner.emit_warning(&format!(
                        "{} reset cancelled, device back to {}",
                        kind, fallback
                    ));
                }
                return Ok(false);
            },
            Latency::TimedOut => {
                inner.emit_error(None, CommErrorKind::Timeout, "reset not acknowledged");
                inner.settle(ConnectionState::Error, "reset timed out");
                return Ok(false);
            },
            Latency::Elapsed => {},
        }
        if !inner.still_in(ConnectionState::Resetting, &format!("{} reset", kind)) {
            return Ok(false);
        }

        if let Some(fault) = inner.faults.roll() {
            let message = format!("{} reset failed: {}", kind, fault);
            inner.emit_error(None, fault, &message);
            inner.settle(ConnectionState::Error, &message);
            return Ok(false);
        }

        let applied = match kind {
            ResetKind::Soft => {
                let preset = inner.scenario.read().preset();
                inner.apply_updates(preset)
            },
            ResetKind::Factory => {
                inner.programmed.lock().clear();
                inner.apply_updates(
                    inner
                        .definition
                        .default_values()
                        .iter()
                        .map(|(a, v)| (*a, *v))
                        .collect(),
                )
            },
        };
        match applied {
            Ok(changed) => debug!("{}: {} reset changed {} bytes", inner.id, kind, changed),
            Err(missing) => {
                let message = format!("{} reset references undefined 0x{:04X}", kind, missing);
                inner.emit_error(Some(missing), CommErrorKind::AddressError, &message);
                inner.settle(ConnectionState::Error, &message);
                return Ok(false);
            },
        }

        inner.stats.reset();
        if !inner.settle(ConnectionState::Ready, &format!("{} reset complete", kind)) {
            return Ok(false);
        }
        self.start_drift();
        Ok(true)
    }

    async fn read_register(
        &self,
        address: u32,
        length: usize,
        cancel: &CancellationToken,
    ) -> Result<DeviceDataResult> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        validate_range(address, length)?;

        let started = Instant::now();
        if let Some(failed) = inner.begin_transaction(address, started, cancel).await {
            return Ok(failed);
        }

        if let Some(message) = inner.access_violation(address, length, false) {
            return Ok(inner.fail(address, CommErrorKind::AddressError, message, started));
        }

        let data = match inner.store.read_range(address, length) {
            Ok(data) => data,
            Err(missing) => {
                return Ok(inner.fail(
                    address,
                    CommErrorKind::AddressError,
                    format!("address 0x{:04X} not defined", missing),
                    started,
                ))
            },
        };

        let elapsed = started.elapsed();
        inner.stats.record_success(0, data.len(), elapsed);
        inner.logger.log_read(address, &data, elapsed);

        let result = DeviceDataResult::success(address, data, elapsed);
        inner.sink.emit(DeviceEvent::DataReceived {
            device_id: inner.id.clone(),
            address,
            data: result.data().clone(),
            timestamp: result.timestamp(),
        });
        Ok(result)
    }

    async fn write_register(
        &self,
        address: u32,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<DeviceDataResult> {
        let inner = &self.inner;
        inner.ensure_alive()?;
        validate_range(address, data.len())?;

        let started = Instant::now();
        if let Some(failed) = inner.begin_transaction(address, started, cancel).await {
            return Ok(failed);
        }

        if let Some(message) = inner.access_violation(address, data.len(), true) {
            return Ok(inner.fail(address, CommErrorKind::AddressError, message, started));
        }
        let claimed = match inner.claim_write_once(address, data.len()) {
            Ok(claimed) => claimed,
            Err(message) => {
                return Ok(inner.fail(address, CommErrorKind::AddressError, message, started))
            },
        };

        if let Err(missing) = inner
            .store
            .write_bytes(address, data, |changes| inner.emit_changes(changes))
        {
            inner.release_write_once(&claimed);
            return Ok(inner.fail(
                address,
                CommErrorKind::AddressError,
                format!("address 0x{:04X} not defined", missing),
                started,
            ));
        }

        let elapsed = started.elapsed();
        inner.stats.record_success(data.len(), 0, elapsed);
        inner.logger.log_write(address, data, elapsed);
        Ok(DeviceDataResult::success(address, Vec::new(), elapsed))
    }

    async fn transfer(
        &self,
        write: &[u8],
        read_length: usize,
        cancel: &CancellationToken,
    ) -> Result<DeviceDataResult> {
        let inner = &self.inner;
        inner.ensure_alive()?;

        let started = Instant::now();
        let framed = match write {
            [hi, lo, rest @ ..] => Some((u16::from_be_bytes([*hi, *lo]) as u32, rest)),
            _ => None,
        };

        let state = inner.state();
        if !state.is_ready() {
            let address = framed.map(|(pointer, _)| pointer).unwrap_or_default();
            return Ok(inner.fail(
                address,
                CommErrorKind::HardwareError,
                format!("device is {}", state),
                started,
            ));
        }

        let Some((pointer, payload)) = framed else {
            return Ok(inner.fail(
                0,
                CommErrorKind::ProtocolError,
                format!("transfer needs a 2-byte register pointer, got {} bytes", write.len()),
                started,
            ));
        };

        if !payload.is_empty() {
            let written = self.write_register(pointer, payload, cancel).await?;
            if !written.is_success() || read_length == 0 {
                return Ok(written);
            }
        }

        if read_length == 0 {
            if let Some(failed) = inner.begin_transaction(pointer, started, cancel).await {
                return Ok(failed);
            }
            let elapsed = started.elapsed();
            inner.stats.record_success(write.len(), 0, elapsed);
            return Ok(DeviceDataResult::success(pointer, Vec::new(), elapsed));
        }

        self.read_register(pointer, read_length, cancel).await
    }

    fn get_device_info(&self) -> DeviceInfo {
        let inner = &self.inner;
        let communication = inner.communication.read();
        DeviceInfo {
            id: inner.id.clone(),
            name: inner.name.clone(),
            device_type: inner.definition.device_type.clone(),
            protocol: communication.protocol(),
            address: communication.device_address,
            firmware_version: inner.definition.firmware_version.clone(),
            hardware_revision: inner.definition.hardware_revision.clone(),
            register_count: inner.register_maps.read().len(),
            capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn get_communication_config(&self) -> CommunicationConfig {
        self.inner.communication.read().clone()
    }

    fn set_communication_config(&self, config: CommunicationConfig) -> Result<()> {
        self.inner.ensure_alive()?;
        config.validate()?;
        let logger = &self.inner.logger;
        logger.log_config("protocol", &config.protocol().to_string());
        logger.log_config("device_address", &format!("0x{:02X}", config.device_address));
        logger.log_config("timeout_ms", &config.timeout_ms.to_string());
        *self.inner.communication.write() = config;
        Ok(())
    }

    fn get_register_maps(&self) -> Arc<Vec<RegisterMap>> {
        self.inner.register_maps.read().clone()
    }

    fn statistics(&self) -> CommunicationStatistics {
        self.inner.stats.snapshot()
    }
}
