//! The per-link sync state machine.
//!
//! # States (for beginners)
//!
//! ```text
//!   Disconnected ──transport up──▶ Handshaking ──snapshot──▶ Synchronized
//!        ▲                              ▲                        │
//!        │                              └──── Resyncing ◀────────┘
//!        └────────── transport lost (from any state)    retries exhausted
//! ```
//!
//! - **Handshaking** – the device has sent `Hello`; the host answers with one
//!   `FullSnapshot`.  The device enters `Synchronized` on receiving it, the
//!   host on receiving its `Ack`.
//! - **Synchronized** – `Delta`s flow host→device and `Intent`s device→host.
//!   Every reliable message is retransmitted with the *same* `msg_id` until
//!   acknowledged, at most `max_retries` times.
//! - **Resyncing** – retries ran out.  The device immediately reopens the
//!   handshake; the host asks its application for a fresh snapshot.
//!
//! # Ordering
//!
//! Reliable inbound messages are delivered in `msg_id` order.  A message
//! that arrives ahead of a gap is buffered (up to `reorder_window`) and
//! released once the gap closes.  A `FullSnapshot` supersedes anything older
//! than itself.  A duplicate is never re-delivered: the recorded `Ack`/`Nack`
//! is replayed instead.
//!
//! # I/O model
//!
//! The engine performs no I/O and reads no clock.  The caller feeds it
//! decoded envelopes and the current [`Tick`], then drains
//! [`LinkEngine::drain_outbox`] onto the wire.

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, info, trace, warn};

use crate::protocol::messages::{Envelope, NackReason, SyncMessage, PROTOCOL_VERSION};
use crate::protocol::sequence::{seq_distance, seq_newer, MsgIdCounter};
use crate::sync::timing::{SyncTimings, Tick};

/// How many recent replies are remembered for duplicate replay.
const REPLY_MEMORY: usize = 32;

// ── Public types ──────────────────────────────────────────────────────────────

/// Which end of the link this engine runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Host,
    Device,
}

/// Link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Handshaking,
    Synchronized,
    Resyncing,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Handshaking => "Handshaking",
            LinkState::Synchronized => "Synchronized",
            LinkState::Resyncing => "Resyncing",
        };
        f.write_str(s)
    }
}

/// Something the application must react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// An inbound message, in order.  The host must answer every delivered
    /// `Intent` with [`LinkEngine::acknowledge`] or [`LinkEngine::reject`];
    /// everything else is acknowledged automatically.
    Deliver { msg_id: u16, message: SyncMessage },
    /// One of our reliable messages was acknowledged (reported once).
    Acked(u16),
    /// One of our reliable messages was rejected.
    Nacked { msg_id: u16, reason: NackReason },
    /// One of our reliable messages was abandoned after exhausting retries.
    Expired(u16),
    StateChanged { from: LinkState, to: LinkState },
    /// Host only: send a `FullSnapshot` now.
    SnapshotNeeded,
}

// ── Internal bookkeeping ──────────────────────────────────────────────────────

#[derive(Debug)]
struct Pending {
    envelope: Envelope,
    sent_at: Tick,
    attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Ack,
    Nack(NackReason),
    /// Delivered to the application, verdict not given yet.
    Awaiting,
}

#[derive(Debug, Default)]
struct InboundSequencer {
    expected: Option<u16>,
    buffered: Vec<Envelope>,
    replies: VecDeque<(u16, Reply)>,
}

impl InboundSequencer {
    fn reset(&mut self) {
        self.expected = None;
        self.buffered.clear();
        self.replies.clear();
    }

    fn record(&mut self, msg_id: u16, reply: Reply) {
        if let Some(slot) = self.replies.iter_mut().find(|(id, _)| *id == msg_id) {
            slot.1 = reply;
            return;
        }
        if self.replies.len() == REPLY_MEMORY {
            self.replies.pop_front();
        }
        self.replies.push_back((msg_id, reply));
    }

    fn reply_for(&self, msg_id: u16) -> Option<Reply> {
        self.replies
            .iter()
            .find(|(id, _)| *id == msg_id)
            .map(|(_, r)| *r)
    }

    fn take_buffered(&mut self, msg_id: u16) -> Option<Envelope> {
        let pos = self.buffered.iter().position(|e| e.msg_id == msg_id)?;
        Some(self.buffered.swap_remove(pos))
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Sync protocol engine for one end of one link.
#[derive(Debug)]
pub struct LinkEngine {
    role: LinkRole,
    timings: SyncTimings,
    state: LinkState,
    ids: MsgIdCounter,
    pending: VecDeque<Pending>,
    inbound: InboundSequencer,
    outbox: VecDeque<Envelope>,
    events: Vec<LinkEvent>,
    now: Tick,
    last_rx: Tick,
    last_tx: Tick,
    last_snapshot: Tick,
    snapshot_in_flight: Option<u16>,
    last_hello: Option<u16>,
}

impl LinkEngine {
    pub fn new(role: LinkRole, timings: SyncTimings) -> Self {
        Self {
            role,
            timings,
            state: LinkState::Disconnected,
            ids: MsgIdCounter::new(),
            pending: VecDeque::new(),
            inbound: InboundSequencer::default(),
            outbox: VecDeque::new(),
            events: Vec::new(),
            now: 0,
            last_rx: 0,
            last_tx: 0,
            last_snapshot: 0,
            snapshot_in_flight: None,
            last_hello: None,
        }
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn timings(&self) -> &SyncTimings {
        &self.timings
    }

    pub fn is_synchronized(&self) -> bool {
        self.state == LinkState::Synchronized
    }

    /// Number of reliable messages awaiting acknowledgement.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ── Transport lifecycle ──────────────────────────────────────────────────

    /// The transport became readable and writable.
    pub fn on_transport_up(&mut self, now: Tick) -> Vec<LinkEvent> {
        self.now = now;
        if self.state != LinkState::Disconnected {
            return self.take_events();
        }
        self.last_rx = now;
        self.last_tx = now;
        self.last_snapshot = now;
        match self.role {
            LinkRole::Device => self.begin_handshake(),
            LinkRole::Host => self.set_state(LinkState::Handshaking),
        }
        self.take_events()
    }

    /// The transport failed.  Everything in flight is discarded.
    pub fn on_transport_lost(&mut self) -> Vec<LinkEvent> {
        if self.state != LinkState::Disconnected {
            if !self.pending.is_empty() {
                info!("dropping {} unacknowledged messages", self.pending.len());
            }
            self.pending.clear();
            self.outbox.clear();
            self.inbound.reset();
            self.snapshot_in_flight = None;
            self.last_hello = None;
            self.set_state(LinkState::Disconnected);
        }
        self.take_events()
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Queues a reliable message under a fresh `msg_id`.
    ///
    /// Returns `None` when the message cannot be carried in the current
    /// state (link down, wrong direction, or sync traffic before the first
    /// snapshot).
    pub fn send_reliable(&mut self, message: SyncMessage) -> Option<u16> {
        if !self.can_send_reliable(&message) {
            debug!(
                "not sending {:?} in state {}",
                message.message_type(),
                self.state
            );
            return None;
        }
        let msg_id = self.ids.next();
        if matches!(message, SyncMessage::FullSnapshot(_)) {
            // Older sync traffic is covered by the snapshot.
            self.pending.retain(|p| {
                !matches!(
                    p.envelope.message,
                    SyncMessage::FullSnapshot(_)
                        | SyncMessage::Delta { .. }
                        | SyncMessage::SessionAdded(_)
                        | SyncMessage::SessionRemoved(_)
                )
            });
            self.snapshot_in_flight = Some(msg_id);
            self.last_snapshot = self.now;
            if self.state == LinkState::Resyncing {
                self.set_state(LinkState::Handshaking);
            }
        }
        let envelope = Envelope::new(msg_id, message);
        self.pending.push_back(Pending {
            envelope: envelope.clone(),
            sent_at: self.now,
            attempts: 0,
        });
        self.push_out(envelope);
        Some(msg_id)
    }

    /// Queues a control message (`Heartbeat`, `MediaKey`) that is never
    /// retried.  Returns `false` if the link is down.
    pub fn send_unreliable(&mut self, message: SyncMessage) -> bool {
        if self.state == LinkState::Disconnected || message.is_reliable() {
            return false;
        }
        self.push_control(message);
        true
    }

    /// Accepts a delivered `Intent`.
    pub fn acknowledge(&mut self, msg_id: u16) {
        if self.state == LinkState::Disconnected {
            return;
        }
        self.inbound.record(msg_id, Reply::Ack);
        self.push_control(SyncMessage::Ack { msg_id });
    }

    /// Rejects a delivered `Intent`.
    pub fn reject(&mut self, msg_id: u16, reason: NackReason) {
        if self.state == LinkState::Disconnected {
            return;
        }
        self.inbound.record(msg_id, Reply::Nack(reason));
        self.push_control(SyncMessage::Nack { msg_id, reason });
    }

    /// Takes every envelope waiting to be written.
    pub fn drain_outbox(&mut self) -> Vec<Envelope> {
        self.outbox.drain(..).collect()
    }

    /// Returns events raised outside `receive`/`tick` (for example by
    /// [`send_reliable`](Self::send_reliable) leaving `Resyncing`).
    pub fn take_events(&mut self) -> Vec<LinkEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Processes one decoded inbound envelope.
    pub fn receive(&mut self, envelope: Envelope, now: Tick) -> Vec<LinkEvent> {
        self.now = now;
        if self.state == LinkState::Disconnected {
            debug!("ignoring msg {} while disconnected", envelope.msg_id);
            return self.take_events();
        }
        self.last_rx = now;

        let Envelope { msg_id, message } = envelope;
        match message {
            SyncMessage::Ack { msg_id: acked } => self.on_ack(acked),
            SyncMessage::Nack {
                msg_id: nacked,
                reason,
            } => self.on_nack(nacked, reason),
            SyncMessage::Heartbeat => trace!("heartbeat from peer"),
            SyncMessage::MediaKey(key) => self.events.push(LinkEvent::Deliver {
                msg_id,
                message: SyncMessage::MediaKey(key),
            }),
            SyncMessage::Hello { protocol_version } => match self.role {
                LinkRole::Host => self.on_hello(msg_id, protocol_version),
                LinkRole::Device => debug!("device ignores Hello from peer"),
            },
            other => self.on_sequenced(msg_id, other),
        }
        self.take_events()
    }

    // ── Timers ────────────────────────────────────────────────────────────────

    /// Advances timers: retransmission, heartbeat, silence detection, and
    /// (host only) periodic resync.
    pub fn tick(&mut self, now: Tick) -> Vec<LinkEvent> {
        self.now = now;
        if self.state == LinkState::Disconnected {
            return self.take_events();
        }

        self.retransmit_due(now);

        if self.state == LinkState::Synchronized
            && now.saturating_sub(self.last_rx) >= self.timings.silence_timeout_ticks
        {
            warn!("peer silent for {} ticks", now - self.last_rx);
            self.last_rx = now;
            match self.role {
                LinkRole::Device => {
                    self.expire_all();
                    self.enter_resync();
                }
                LinkRole::Host => {
                    self.pending.clear();
                    self.snapshot_in_flight = None;
                    self.set_state(LinkState::Handshaking);
                }
            }
        }

        if self.state == LinkState::Synchronized
            && now.saturating_sub(self.last_tx) >= self.timings.heartbeat_interval_ticks
        {
            self.push_control(SyncMessage::Heartbeat);
        }

        if self.role == LinkRole::Host
            && self.state == LinkState::Synchronized
            && self.snapshot_in_flight.is_none()
            && now.saturating_sub(self.last_snapshot) >= self.timings.resync_interval_ticks
        {
            debug!("periodic resync due");
            self.last_snapshot = now;
            self.events.push(LinkEvent::SnapshotNeeded);
        }

        self.take_events()
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn can_send_reliable(&self, message: &SyncMessage) -> bool {
        if self.state == LinkState::Disconnected {
            return false;
        }
        match (self.role, message) {
            (LinkRole::Host, SyncMessage::FullSnapshot(_)) => true,
            (
                LinkRole::Host,
                SyncMessage::Delta { .. } | SyncMessage::SessionAdded(_) | SyncMessage::SessionRemoved(_),
            ) => self.state == LinkState::Synchronized || self.snapshot_in_flight.is_some(),
            (LinkRole::Device, SyncMessage::Intent { .. }) => self.state == LinkState::Synchronized,
            (LinkRole::Device, SyncMessage::Hello { .. }) => true,
            _ => false,
        }
    }

    fn set_state(&mut self, to: LinkState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("link {from} -> {to}");
        self.state = to;
        self.events.push(LinkEvent::StateChanged { from, to });
    }

    fn push_out(&mut self, envelope: Envelope) {
        self.last_tx = self.now;
        self.outbox.push_back(envelope);
    }

    /// Control messages reuse the last assigned id so they never open a gap.
    fn push_control(&mut self, message: SyncMessage) {
        let envelope = Envelope::new(self.ids.current(), message);
        self.push_out(envelope);
    }

    /// Device: reset inbound ordering and (re)send `Hello`.
    fn begin_handshake(&mut self) {
        self.inbound.reset();
        self.pending
            .retain(|p| !matches!(p.envelope.message, SyncMessage::Hello { .. }));
        self.set_state(LinkState::Handshaking);
        self.send_reliable(SyncMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
        });
    }

    fn enter_resync(&mut self) {
        self.set_state(LinkState::Resyncing);
        match self.role {
            LinkRole::Device => self.begin_handshake(),
            LinkRole::Host => self.events.push(LinkEvent::SnapshotNeeded),
        }
    }

    fn expire_all(&mut self) {
        for p in self.pending.drain(..) {
            warn!(
                "msg {} ({:?}) expired after {} retries",
                p.envelope.msg_id,
                p.envelope.message.message_type(),
                p.attempts
            );
            self.events.push(LinkEvent::Expired(p.envelope.msg_id));
        }
        self.snapshot_in_flight = None;
    }

    fn retransmit_due(&mut self, now: Tick) {
        let mut resend = Vec::new();
        let mut exhausted = false;
        for p in self.pending.iter_mut() {
            if now.saturating_sub(p.sent_at) < self.timings.ack_timeout_ticks {
                continue;
            }
            if p.attempts >= self.timings.max_retries {
                exhausted = true;
                break;
            }
            p.attempts += 1;
            p.sent_at = now;
            debug!("retransmitting msg {} (attempt {})", p.envelope.msg_id, p.attempts);
            resend.push(p.envelope.clone());
        }
        if exhausted {
            self.expire_all();
            self.enter_resync();
            return;
        }
        for envelope in resend {
            self.push_out(envelope);
        }
    }

    fn on_ack(&mut self, acked: u16) {
        let Some(pos) = self.pending.iter().position(|p| p.envelope.msg_id == acked) else {
            trace!("ack for unknown or already acknowledged msg {acked}");
            return;
        };
        self.pending.remove(pos);
        self.events.push(LinkEvent::Acked(acked));
        if self.role == LinkRole::Host && self.snapshot_in_flight == Some(acked) {
            self.snapshot_in_flight = None;
            self.set_state(LinkState::Synchronized);
        }
    }

    fn on_nack(&mut self, nacked: u16, reason: NackReason) {
        let Some(pos) = self.pending.iter().position(|p| p.envelope.msg_id == nacked) else {
            trace!("nack for unknown msg {nacked}");
            return;
        };
        self.pending.remove(pos);
        debug!("msg {nacked} rejected: {reason:?}");
        self.events.push(LinkEvent::Nacked {
            msg_id: nacked,
            reason,
        });
        if self.snapshot_in_flight == Some(nacked) {
            self.snapshot_in_flight = None;
            self.enter_resync();
        }
    }

    fn on_hello(&mut self, msg_id: u16, protocol_version: u8) {
        if protocol_version != PROTOCOL_VERSION {
            warn!("peer speaks protocol v{protocol_version}, we speak v{PROTOCOL_VERSION}");
        }
        if self.state == LinkState::Handshaking && self.last_hello == Some(msg_id) {
            // Retransmitted Hello: our Ack was lost.
            self.acknowledge(msg_id);
            return;
        }
        self.last_hello = Some(msg_id);
        self.inbound.reset();
        self.inbound.expected = Some(msg_id.wrapping_add(1));
        self.pending.clear();
        self.snapshot_in_flight = None;
        self.set_state(LinkState::Handshaking);
        self.acknowledge(msg_id);
        self.events.push(LinkEvent::SnapshotNeeded);
    }

    fn on_sequenced(&mut self, msg_id: u16, message: SyncMessage) {
        let window = self.timings.reorder_window;

        if self.role == LinkRole::Device && matches!(message, SyncMessage::FullSnapshot(_)) {
            if let Some(expected) = self.inbound.expected {
                if msg_id != expected && !seq_newer(msg_id, expected) {
                    self.replay(msg_id);
                    return;
                }
            }
            // A snapshot supersedes everything older than itself.
            self.inbound.buffered.retain(|e| seq_newer(e.msg_id, msg_id));
            self.inbound.expected = Some(msg_id.wrapping_add(1));
            self.accept(msg_id, message);
            self.release_buffered();
            return;
        }

        let Some(expected) = self.inbound.expected else {
            debug!("dropping msg {msg_id}: sequence not established yet");
            return;
        };

        if msg_id == expected {
            self.inbound.expected = Some(expected.wrapping_add(1));
            self.accept(msg_id, message);
            self.release_buffered();
        } else if seq_newer(msg_id, expected) {
            let ahead = seq_distance(expected, msg_id) as usize;
            if ahead > window || self.inbound.buffered.len() >= window {
                debug!("dropping msg {msg_id}: outside reorder window (expected {expected})");
            } else if !self.inbound.buffered.iter().any(|e| e.msg_id == msg_id) {
                debug!("buffering msg {msg_id} until {expected} arrives");
                self.inbound.buffered.push(Envelope::new(msg_id, message));
            }
        } else {
            self.replay(msg_id);
        }
    }

    fn release_buffered(&mut self) {
        while let Some(expected) = self.inbound.expected {
            let Some(envelope) = self.inbound.take_buffered(expected) else {
                break;
            };
            self.inbound.expected = Some(expected.wrapping_add(1));
            self.accept(envelope.msg_id, envelope.message);
        }
    }

    fn accept(&mut self, msg_id: u16, message: SyncMessage) {
        let needs_verdict =
            self.role == LinkRole::Host && matches!(message, SyncMessage::Intent { .. });
        if self.role == LinkRole::Device && matches!(message, SyncMessage::FullSnapshot(_)) {
            self.set_state(LinkState::Synchronized);
        }
        self.events.push(LinkEvent::Deliver { msg_id, message });
        if needs_verdict {
            self.inbound.record(msg_id, Reply::Awaiting);
        } else {
            self.acknowledge(msg_id);
        }
    }

    /// Answers a duplicate with the verdict recorded the first time.
    fn replay(&mut self, msg_id: u16) {
        match self.inbound.reply_for(msg_id) {
            Some(Reply::Ack) | None => {
                // Unknown duplicates are older than the reply memory or were
                // superseded by a snapshot; either way they are settled.
                trace!("duplicate msg {msg_id}, re-acknowledging");
                self.push_control(SyncMessage::Ack { msg_id });
            }
            Some(Reply::Nack(reason)) => {
                trace!("duplicate msg {msg_id}, replaying nack");
                self.push_control(SyncMessage::Nack { msg_id, reason });
            }
            Some(Reply::Awaiting) => trace!("duplicate msg {msg_id} still awaiting verdict"),
        }
    }
}
