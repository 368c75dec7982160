//! Signal decoder and message-state machine
//!
//! One `CanParser` watches one bus for a fixed set of messages. Each poll
//! it decodes the subscribed frames, verifies checksums and rolling
//! counters, tracks per-message freshness, and folds everything into two
//! aggregate flags: `can_valid` (every subscribed message alive and clean)
//! and `bus_timeout` (nothing at all arriving on the bus). Data-quality
//! faults never raise - a vehicle controller would rather coast on
//! stale-but-flagged values than unwind the stack mid-maneuver.

use crate::config::ParserConfig;
use crate::dbc::{Dbc, DbcRegistry, Message, MsgRef};
use crate::types::{CanData, CodecError, Result, MAX_FRAME_LEN};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Consecutive counter mismatches before a message is declared dead
pub const MAX_BAD_COUNTER: u32 = 5;

/// Consecutive invalid polls before `can_valid` drops
const CAN_INVALID_CNT: u32 = 5;

/// Timestamp history depth per message
const TS_RING_CAPACITY: usize = 500;

/// Minimum observed span before the frequency estimate is trusted
const FREQ_WINDOW_NS: u64 = 1_000_000_000;

/// Upper clamp on the estimated message frequency
const MAX_FREQ_HZ: f64 = 100.0;

/// Bus timeout before any per-message threshold is established
const BUS_TIMEOUT_DEFAULT_NS: u64 = 500_000_000;

/// Fixed-capacity timestamp history.
///
/// Oldest entries are overwritten once the buffer fills; the span between
/// oldest and newest feeds the frequency estimate.
struct TimestampRing {
    buf: Box<[u64; TS_RING_CAPACITY]>,
    head: usize,
    len: usize,
}

impl TimestampRing {
    fn new() -> Self {
        Self {
            buf: Box::new([0; TS_RING_CAPACITY]),
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, nanos: u64) {
        let tail = (self.head + self.len) % TS_RING_CAPACITY;
        self.buf[tail] = nanos;
        if self.len < TS_RING_CAPACITY {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % TS_RING_CAPACITY;
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn is_full(&self) -> bool {
        self.len == TS_RING_CAPACITY
    }

    fn oldest(&self) -> Option<u64> {
        (self.len > 0).then(|| self.buf[self.head])
    }

    fn newest(&self) -> Option<u64> {
        (self.len > 0).then(|| self.buf[(self.head + self.len - 1) % TS_RING_CAPACITY])
    }
}

/// Decoder state for one subscribed message.
struct MessageState {
    address: u32,
    name: String,
    ignore_checksum: bool,
    ignore_counter: bool,
    /// Event-only message: freshness never gates validity
    ignore_alive: bool,
    /// Last committed physical value per signal
    vals: HashMap<String, f64>,
    /// Every value committed since the previous poll
    all_vals: HashMap<String, Vec<f64>>,
    ts_ring: TimestampRing,
    /// Estimated (or caller-declared) receive frequency in Hz
    frequency: f64,
    /// Staleness limit in nanoseconds; 0 until established
    timeout_threshold: u64,
    first_seen_nanos: u64,
    last_seen_nanos: u64,
    last_counter: Option<u64>,
    counter_fail: u32,
    /// Scratch for decoded values, reused across frames
    scratch: Vec<f64>,
}

impl MessageState {
    fn new(msg: &Message, expected_hz: u32, config: ParserConfig) -> Self {
        let timeout_threshold = if expected_hz > 0 {
            (1_000_000_000 / u64::from(expected_hz)) * 10
        } else {
            0
        };
        let vals = msg
            .signals()
            .iter()
            .map(|s| (s.name.clone(), 0.0))
            .collect();
        let all_vals = msg
            .signals()
            .iter()
            .map(|s| (s.name.clone(), Vec::new()))
            .collect();
        Self {
            address: msg.address,
            name: msg.name.clone(),
            ignore_checksum: config.ignore_checksum,
            ignore_counter: config.ignore_counter,
            ignore_alive: expected_hz == 0,
            vals,
            all_vals,
            ts_ring: TimestampRing::new(),
            frequency: f64::from(expected_hz),
            timeout_threshold,
            first_seen_nanos: 0,
            last_seen_nanos: 0,
            last_counter: None,
            counter_fail: 0,
            scratch: Vec::new(),
        }
    }

    /// Decode one frame; returns whether its values were committed.
    ///
    /// A checksum or counter failure rejects the frame whole: no value is
    /// committed and the previously committed values stay visible.
    fn parse(&mut self, msg: &Message, nanos: u64, data: &[u8]) -> bool {
        if self.first_seen_nanos == 0 {
            self.first_seen_nanos = nanos;
        }

        let mut checksum_failed = false;
        let mut counter_failed = false;
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();

        for sig in msg.signals() {
            let raw = sig.extract_raw(data);
            if !self.ignore_checksum {
                if let Some(expected) = sig.calc_checksum(self.address, data) {
                    if expected != raw {
                        checksum_failed = true;
                    }
                }
            }
            if !self.ignore_counter && sig.is_counter && !self.update_counter(raw, sig.size) {
                counter_failed = true;
            }
            scratch.push(sig.sign_extend(raw) as f64 * sig.factor + sig.offset);
        }

        if checksum_failed || counter_failed {
            log::warn!(
                "0x{:X} message checks failed, checksum failed {}, counter failed {}",
                self.address,
                checksum_failed,
                counter_failed
            );
            self.scratch = scratch;
            return false;
        }

        for (sig, &value) in msg.signals().iter().zip(scratch.iter()) {
            if let Some(v) = self.vals.get_mut(&sig.name) {
                *v = value;
            }
            if let Some(all) = self.all_vals.get_mut(&sig.name) {
                all.push(value);
            }
        }
        self.scratch = scratch;

        self.last_seen_nanos = nanos;
        self.ts_ring.push(nanos);
        self.estimate_frequency();
        true
    }

    /// Track the rolling counter with hysteresis.
    ///
    /// The observed value always becomes the new reference, so a single
    /// glitch desynchronizes only one frame. The first observation seeds
    /// the sequence without a comparison.
    fn update_counter(&mut self, observed: u64, size: u16) -> bool {
        let mask = if size < 64 {
            (1u64 << size) - 1
        } else {
            u64::MAX
        };
        let ok = match self.last_counter {
            None => true,
            Some(last) => (last.wrapping_add(1) & mask) == observed,
        };
        if ok {
            self.counter_fail = self.counter_fail.saturating_sub(1);
        } else {
            self.counter_fail = (self.counter_fail + 1).min(MAX_BAD_COUNTER);
            log::info!(
                "0x{:X} COUNTER FAIL #{}, last: {:?}, curr: {}",
                self.address,
                self.counter_fail,
                self.last_counter,
                observed
            );
        }
        self.last_counter = Some(observed);
        ok
    }

    /// Lazily (re-)estimate the receive frequency from the timestamp ring.
    ///
    /// Kicks in once at least three stamps span more than a second (or the
    /// ring is full), which tolerates a wrong or zero expected frequency
    /// from the subscriber.
    fn estimate_frequency(&mut self) {
        if self.ts_ring.len() < 3 {
            return;
        }
        let (Some(oldest), Some(newest)) = (self.ts_ring.oldest(), self.ts_ring.newest()) else {
            return;
        };
        let span = newest.saturating_sub(oldest);
        if span == 0 || (span <= FREQ_WINDOW_NS && !self.ts_ring.is_full()) {
            return;
        }
        let hz = (self.ts_ring.len() - 1) as f64 * 1e9 / span as f64;
        self.frequency = hz.min(MAX_FREQ_HZ);
        self.timeout_threshold = (10.0 * 1e9 / self.frequency) as u64;
    }

    /// Whether the last committed values are still trustworthy at `nanos`.
    fn valid(&self, nanos: u64) -> bool {
        if self.ignore_alive {
            return true;
        }
        if self.last_seen_nanos == 0 {
            return false;
        }
        if self.timeout_threshold > 0
            && nanos.saturating_sub(self.last_seen_nanos) > self.timeout_threshold
        {
            return false;
        }
        true
    }

    fn clear_all_vals(&mut self) {
        for values in self.all_vals.values_mut() {
            values.clear();
        }
    }
}

/// Decodes subscribed messages from one bus and tracks their health.
pub struct CanParser {
    dbc: Arc<Dbc>,
    bus: u8,
    states: HashMap<u32, MessageState>,
    can_invalid_cnt: u32,
    can_valid: bool,
    bus_timeout: bool,
    last_nonempty_nanos: Option<u64>,
}

impl CanParser {
    /// Subscribe to messages on a bus with default enforcement.
    ///
    /// Each subscription pairs a message (by name or address) with its
    /// expected receive frequency in Hz; 0 marks an event-only message
    /// whose freshness never gates validity. Fails fast on a missing DBC,
    /// an unknown message, or two subscriptions resolving to one address.
    pub fn new<'a, M>(
        registry: &DbcRegistry,
        dbc_name: &str,
        subscriptions: &[(M, u32)],
        bus: u8,
    ) -> Result<Self>
    where
        M: Into<MsgRef<'a>> + Copy,
    {
        Self::with_config(registry, dbc_name, subscriptions, bus, ParserConfig::new())
    }

    /// Subscribe with explicit enforcement configuration.
    pub fn with_config<'a, M>(
        registry: &DbcRegistry,
        dbc_name: &str,
        subscriptions: &[(M, u32)],
        bus: u8,
        config: ParserConfig,
    ) -> Result<Self>
    where
        M: Into<MsgRef<'a>> + Copy,
    {
        let dbc = registry.load(dbc_name)?;
        let mut states = HashMap::new();
        for &(key, expected_hz) in subscriptions {
            let key = key.into();
            let msg = dbc.message(key).ok_or_else(|| {
                CodecError::MessageNotFound(match key {
                    MsgRef::Address(a) => format!("0x{a:X}"),
                    MsgRef::Name(n) => n.to_string(),
                })
            })?;
            if states.contains_key(&msg.address) {
                return Err(CodecError::DuplicateSubscription(msg.address));
            }
            states.insert(msg.address, MessageState::new(msg, expected_hz, config));
        }
        Ok(Self {
            dbc,
            bus,
            states,
            can_invalid_cnt: CAN_INVALID_CNT,
            can_valid: false,
            bus_timeout: false,
            last_nonempty_nanos: None,
        })
    }

    /// Feed one poll's worth of batches; returns the set of addresses that
    /// committed at least one frame.
    ///
    /// Batches, and frames within a batch, are processed strictly in the
    /// given order. Frames from other buses, unsubscribed addresses, or
    /// longer than 64 bytes are dropped silently.
    pub fn update(&mut self, batches: &[CanData]) -> BTreeSet<u32> {
        for state in self.states.values_mut() {
            state.clear_all_vals();
        }
        let mut updated = BTreeSet::new();
        for batch in batches {
            self.update_frames(batch, &mut updated);
            self.update_valid(batch.nanos);
        }
        updated
    }

    fn update_frames(&mut self, batch: &CanData, updated: &mut BTreeSet<u32>) {
        let mut bus_empty = true;
        for frame in &batch.frames {
            if frame.bus != self.bus {
                continue;
            }
            bus_empty = false;
            let Some(state) = self.states.get_mut(&frame.address) else {
                continue;
            };
            if frame.data.len() > MAX_FRAME_LEN {
                log::warn!(
                    "dropping oversize frame for 0x{:X} ({} bytes)",
                    frame.address,
                    frame.data.len()
                );
                continue;
            }
            let Some(msg) = self.dbc.message(frame.address) else {
                continue;
            };
            if state.parse(msg, batch.nanos, &frame.data) {
                updated.insert(frame.address);
            }
        }
        if !bus_empty {
            self.last_nonempty_nanos = Some(batch.nanos);
        }
        let last = *self.last_nonempty_nanos.get_or_insert(batch.nanos);
        self.bus_timeout = batch.nanos.saturating_sub(last) > self.bus_timeout_threshold();
    }

    /// The tightest established per-message staleness limit; before any
    /// message establishes one, a 500 ms ceiling applies.
    fn bus_timeout_threshold(&self) -> u64 {
        self.states
            .values()
            .filter(|s| s.timeout_threshold > 0)
            .map(|s| s.timeout_threshold)
            .min()
            .unwrap_or(BUS_TIMEOUT_DEFAULT_NS)
    }

    fn update_valid(&mut self, nanos: u64) {
        let mut all_valid = true;
        let mut counters_valid = true;
        for state in self.states.values() {
            if state.counter_fail >= MAX_BAD_COUNTER {
                counters_valid = false;
            }
            if !state.valid(nanos) {
                // quiet during the first second after a message appears
                if state.first_seen_nanos != 0
                    && nanos.saturating_sub(state.first_seen_nanos) > FREQ_WINDOW_NS
                {
                    log::warn!("{} (0x{:X}) is not fresh", state.name, state.address);
                }
                all_valid = false;
            }
        }
        self.can_invalid_cnt = if all_valid {
            0
        } else {
            (self.can_invalid_cnt + 1).min(CAN_INVALID_CNT)
        };
        self.can_valid = counters_valid && self.can_invalid_cnt < CAN_INVALID_CNT;
    }

    /// Latest committed physical values for a message.
    pub fn vl<'a>(&self, msg: impl Into<MsgRef<'a>>) -> Option<&HashMap<String, f64>> {
        self.state_of(msg.into()).map(|s| &s.vals)
    }

    /// Every value committed since the previous poll, per signal. Catches
    /// duplicate frames within one cycle.
    pub fn vl_all<'a>(&self, msg: impl Into<MsgRef<'a>>) -> Option<&HashMap<String, Vec<f64>>> {
        self.state_of(msg.into()).map(|s| &s.all_vals)
    }

    /// Timestamp of the last committed frame, if any.
    pub fn ts_nanos<'a>(&self, msg: impl Into<MsgRef<'a>>) -> Option<u64> {
        self.state_of(msg.into())
            .and_then(|s| (s.last_seen_nanos != 0).then_some(s.last_seen_nanos))
    }

    /// Whether every subscribed message is alive and clean.
    pub fn can_valid(&self) -> bool {
        self.can_valid
    }

    /// Whether the bus itself has gone silent.
    pub fn bus_timeout(&self) -> bool {
        self.bus_timeout
    }

    fn state_of(&self, key: MsgRef<'_>) -> Option<&MessageState> {
        let address = match key {
            MsgRef::Address(a) => a,
            MsgRef::Name(n) => self.dbc.message(n)?.address,
        };
        self.states.get(&address)
    }
}
