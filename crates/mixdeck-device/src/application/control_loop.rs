//! The device's cooperative control loop.
//!
//! # One iteration (for beginners)
//!
//! The firmware has no threads.  [`DeviceApp::poll_once`] is called every
//! scheduler tick and visits every source in a fixed order, doing a bounded
//! amount of work in each so no source can starve the others:
//!
//! 1. **serial** – at most `max_serial_bytes` bytes are read, de-framed,
//!    decoded, and fed to the `LinkEngine`; delivered messages go to the
//!    reconciler.
//! 2. **inputs** – at most `max_input_events` events are taken from the touch
//!    panel, the encoder, and the button (round-robin).  Local edits are
//!    committed once, after all events, so Touch beats Encoder within the
//!    iteration.
//! 3. **timers** – link retransmission, heartbeat, and silence detection,
//!    then the reconciler's dirty-field debounce.  Outbound frames are
//!    written.
//! 4. **render** – the display is repainted only if the frame changed.
//!
//! No call in the loop blocks.  A serial error or the host closing the port
//! drops the link to `Disconnected`; the loop keeps running, and the encoder
//! and button keep working as plain media keys.

use mixdeck_core::{
    decode_message, encode_framed, FrameDecoder, LinkEngine, LinkEvent, LinkRole, LinkState,
    MediaKey, SessionId, SyncMessage, Tick,
};
use tracing::{debug, info, trace, warn};

use crate::application::input::{
    ButtonStream, EncoderStream, InputEvent, SerialPort, TouchPhase, TouchPoint, TouchStream,
};
use crate::application::media_keys::{HidTransport, MediaKeyBridge};
use crate::application::reconciler::{InputReconciler, ReconcilerConfig};
use crate::application::ui::{DrawSurface, Hit, Layout, LinkIndicator, Renderer};
use crate::config::DeviceConfig;

/// The hardware the loop drives.
pub struct Peripherals {
    pub serial: Box<dyn SerialPort>,
    pub touch: Box<dyn TouchStream>,
    pub encoder: Box<dyn EncoderStream>,
    pub button: Box<dyn ButtonStream>,
    pub display: Box<dyn DrawSurface>,
    pub hid: Box<dyn HidTransport>,
}

/// What one iteration did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub bytes_read: usize,
    pub inputs: usize,
    pub intents_sent: usize,
    pub redrawn: bool,
}

/// The device application: link, reconciler, bridge, and renderer.
pub struct DeviceApp {
    config: DeviceConfig,
    engine: LinkEngine,
    decoder: FrameDecoder,
    reconciler: InputReconciler,
    bridge: MediaKeyBridge,
    renderer: Renderer,
    serial: Box<dyn SerialPort>,
    touch: Box<dyn TouchStream>,
    encoder: Box<dyn EncoderStream>,
    button: Box<dyn ButtonStream>,
    display: Box<dyn DrawSurface>,
    read_buf: Vec<u8>,
    transport_up: bool,
    /// y of the last list scroll step while a finger drags the list.
    drag_anchor: Option<u16>,
}

impl DeviceApp {
    pub fn new(config: DeviceConfig, peripherals: Peripherals) -> Self {
        let Peripherals {
            serial,
            touch,
            encoder,
            button,
            display,
            hid,
        } = peripherals;
        Self {
            engine: LinkEngine::new(LinkRole::Device, config.sync),
            decoder: FrameDecoder::new(),
            reconciler: InputReconciler::new(ReconcilerConfig::from(&config)),
            bridge: MediaKeyBridge::new(hid),
            renderer: Renderer::new(Layout::new(&config.display)),
            read_buf: vec![0; config.max_serial_bytes.max(1)],
            config,
            serial,
            touch,
            encoder,
            button,
            display,
            transport_up: false,
            drag_anchor: None,
        }
    }

    pub fn engine(&self) -> &LinkEngine {
        &self.engine
    }

    pub fn link_state(&self) -> LinkState {
        self.engine.state()
    }

    pub fn reconciler(&self) -> &InputReconciler {
        &self.reconciler
    }

    /// Direct access for local edits that do not come from a peripheral.
    pub fn reconciler_mut(&mut self) -> &mut InputReconciler {
        &mut self.reconciler
    }

    pub fn indicator(&self) -> LinkIndicator {
        LinkIndicator::from_state(self.engine.state())
    }

    pub fn layout(&self) -> &Layout {
        self.renderer.layout()
    }

    /// Runs one loop iteration at scheduler tick `now`.
    pub fn poll_once(&mut self, now: Tick) -> PollReport {
        let mut report = PollReport::default();
        self.poll_serial(now, &mut report);
        self.poll_inputs(now, &mut report);
        self.poll_timers(now);
        self.flush_outbox();
        report.redrawn = self.render();
        report
    }

    // ── Serial ────────────────────────────────────────────────────────────────

    fn poll_serial(&mut self, now: Tick, report: &mut PollReport) {
        if !self.transport_up {
            if !self.serial.is_open() {
                return;
            }
            info!("host opened the serial port");
            self.transport_up = true;
            self.decoder.reset();
            let events = self.engine.on_transport_up(now);
            self.handle(events);
        } else if !self.serial.is_open() {
            self.lose_transport("host closed the port");
            return;
        }

        let budget = self.read_buf.len();
        while report.bytes_read < budget {
            let want = budget - report.bytes_read;
            match self.serial.read(&mut self.read_buf[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    self.decoder.feed(&self.read_buf[..n]);
                    report.bytes_read += n;
                }
                Err(e) => {
                    self.lose_transport(&e.to_string());
                    return;
                }
            }
        }

        while let Some(payload) = self.decoder.next_payload() {
            match decode_message(&payload) {
                Ok(envelope) => {
                    let events = self.engine.receive(envelope, now);
                    self.handle(events);
                }
                Err(e) => debug!("dropping undecodable payload: {e}"),
            }
        }
    }

    fn lose_transport(&mut self, reason: &str) {
        warn!("transport lost: {reason}");
        self.transport_up = false;
        self.decoder.reset();
        let events = self.engine.on_transport_lost();
        self.handle(events);
        self.reconciler.on_link_lost();
    }

    fn flush_outbox(&mut self) {
        let mut bytes = Vec::new();
        for envelope in self.engine.drain_outbox() {
            match encode_framed(&envelope) {
                Ok(frame) => bytes.extend_from_slice(&frame),
                Err(e) => warn!("cannot encode msg {}: {e}", envelope.msg_id),
            }
        }
        if bytes.is_empty() || !self.transport_up {
            return;
        }
        if let Err(e) = self.serial.write(&bytes) {
            self.lose_transport(&e.to_string());
        }
    }

    fn handle(&mut self, events: Vec<LinkEvent>) {
        for event in events {
            match event {
                LinkEvent::Deliver { message, .. } => self.reconciler.on_message(message),
                LinkEvent::Acked(msg_id) => self.reconciler.on_acked(msg_id),
                LinkEvent::Nacked { msg_id, reason } => {
                    debug!("intent {msg_id} rejected by host: {reason:?}");
                    self.reconciler.on_intent_failed(msg_id);
                }
                LinkEvent::Expired(msg_id) => self.reconciler.on_intent_failed(msg_id),
                LinkEvent::StateChanged {
                    to: LinkState::Resyncing,
                    ..
                } => self.reconciler.on_resync(),
                LinkEvent::StateChanged {
                    to: LinkState::Disconnected,
                    ..
                } => self.reconciler.on_link_lost(),
                LinkEvent::StateChanged { .. } | LinkEvent::SnapshotNeeded => {}
            }
        }
    }

    // ── Inputs ────────────────────────────────────────────────────────────────

    fn collect_inputs(&mut self) -> Vec<InputEvent> {
        let budget = self.config.max_input_events;
        let mut events = Vec::with_capacity(budget);
        while events.len() < budget {
            let before = events.len();
            if let Some(point) = self.touch.poll() {
                events.push(InputEvent::Touch(point));
            }
            if events.len() < budget {
                if let Some(detents) = self.encoder.poll() {
                    events.push(InputEvent::EncoderTick(detents));
                }
            }
            if events.len() < budget {
                if let Some(class) = self.button.poll() {
                    events.push(InputEvent::ButtonPress(class));
                }
            }
            if events.len() == before {
                break;
            }
        }
        events
    }

    fn poll_inputs(&mut self, now: Tick, report: &mut PollReport) {
        let events = self.collect_inputs();
        report.inputs = events.len();
        for event in events {
            trace!("input {event:?}");
            self.on_input(event);
        }

        for (id, change) in self.reconciler.commit(now) {
            match self.engine.send_reliable(SyncMessage::Intent { id, change }) {
                Some(msg_id) => {
                    self.reconciler.intent_sent(id, change.field(), msg_id);
                    report.intents_sent += 1;
                }
                None => debug!("intent for {id} not sent in state {}", self.engine.state()),
            }
        }
    }

    /// The session the encoder and slider drive, if the link allows it.
    fn driven_session(&self) -> Option<SessionId> {
        if self.engine.is_synchronized() {
            self.reconciler.selected()
        } else {
            None
        }
    }

    fn on_input(&mut self, event: InputEvent) {
        match event {
            InputEvent::Touch(point) => self.on_touch(point),
            InputEvent::EncoderTick(detents) => match self.driven_session() {
                Some(id) => self.reconciler.propose_encoder(id, detents),
                None => {
                    for key in self.bridge.on_encoder(detents) {
                        self.notify_host(key);
                    }
                }
            },
            InputEvent::ButtonPress(class) => {
                let key = self.bridge.on_button(class);
                self.notify_host(key);
            }
        }
    }

    fn on_touch(&mut self, point: TouchPoint) {
        match point.phase {
            TouchPhase::Move if self.drag_anchor.is_some() => {
                self.drag_list(point.y);
                return;
            }
            TouchPhase::Release => {
                self.drag_anchor = None;
                return;
            }
            _ => {}
        }

        let hit = self.renderer.layout().hit_test(point.x, point.y);
        match (hit, point.phase) {
            (Hit::MediaButton(key), TouchPhase::Press) => {
                self.bridge.emit(key);
                self.notify_host(key);
            }
            (Hit::Row(row), TouchPhase::Press) => {
                self.drag_anchor = Some(point.y);
                let index = self.renderer.list().first() + row;
                if self.reconciler.select_index(index) {
                    debug!("selected list row {index}");
                }
            }
            (Hit::Slider(volume), TouchPhase::Press | TouchPhase::Move) => {
                if let Some(id) = self.driven_session() {
                    self.reconciler.propose_slider(id, volume);
                }
            }
            (Hit::MuteToggle, TouchPhase::Press) => {
                if let Some(id) = self.driven_session() {
                    self.reconciler.propose_mute_toggle(id);
                }
            }
            _ => {}
        }
    }

    /// Scrolls the list one row per row height dragged.  Dragging up shows
    /// later rows.
    fn drag_list(&mut self, y: u16) {
        let Some(anchor) = self.drag_anchor else {
            return;
        };
        let step = i32::from(self.renderer.layout().row_height().max(1));
        let rows = (i32::from(anchor) - i32::from(y)) / step;
        if rows == 0 {
            return;
        }
        let len = self.reconciler.shadow().len();
        self.renderer.scroll_list(rows, len);
        let moved = i32::from(anchor) - rows * step;
        self.drag_anchor = u16::try_from(moved).ok();
        trace!("list dragged {rows} rows, first row {}", self.renderer.list().first());
    }

    /// Tells the host about a media key.  Informational only, never retried.
    fn notify_host(&mut self, key: MediaKey) {
        if self.engine.send_unreliable(SyncMessage::MediaKey(key)) {
            trace!("told host about {}", key.label());
        }
    }

    // ── Timers and render ─────────────────────────────────────────────────────

    fn poll_timers(&mut self, now: Tick) {
        let events = self.engine.tick(now);
        self.handle(events);
        self.reconciler.tick(now);
    }

    fn render(&mut self) -> bool {
        let indicator = LinkIndicator::from_state(self.engine.state());
        match self
            .renderer
            .draw(&self.reconciler, indicator, self.display.as_mut())
        {
            Ok(painted) => painted,
            Err(e) => {
                warn!("display: {e}");
                false
            }
        }
    }
}
