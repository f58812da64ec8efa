//! Screen layout, the render function, and redraw-on-change.
//!
//! # Screen layout (480 × 320)
//!
//! ```text
//! ┌────────────────────────────────────────────┬───────────┐
//! │ status bar: "MixDeck"        indicator      (24 px)    │
//! ├────────────────────────────────────────────┬───────────┤
//! │ Music                                  40% │   40%     │
//! │ Call                                   80% │   ┃█┃     │
//! │ ...  (session list, 360 px)                │   ┃█┃     │
//! │                                            │  [Mute]   │
//! ├───────────┬───────────┬───────────┬────────┴──────────┤
//! │   Prev    │   Play    │   Next    │   Mute   (48 px)  │
//! └───────────┴───────────┴───────────┴───────────────────┘
//! ```
//!
//! Rendering is a pure function from [`UiModel`] to a list of [`DrawOp`]s.
//! [`Renderer`] paints that list only when the shadow generation, the
//! selection, or the link indicator changed since the last frame, which keeps
//! SPI traffic to the display low.

use mixdeck_core::{LinkState, MediaKey, SessionId};

use crate::application::input::PeripheralError;
use crate::application::reconciler::InputReconciler;
use crate::config::DisplayGeometry;

// ── Drawing primitives ────────────────────────────────────────────────────────

/// An RGB565 color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub u16);

impl Color {
    pub const BACKGROUND: Color = Color(0x0000);
    pub const PANEL: Color = Color(0x18E3);
    pub const SELECTED: Color = Color(0x2A69);
    pub const TEXT: Color = Color(0xFFFF);
    pub const DIM_TEXT: Color = Color(0x8410);
    pub const LEVEL: Color = Color(0x07E0);
    pub const MUTED_LEVEL: Color = Color(0x52AA);
    pub const WARNING: Color = Color(0xF800);
    pub const PENDING: Color = Color(0xFD20);
}

/// Glyph width of the built-in 8×16 font.
pub const FONT_WIDTH: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

impl Rect {
    pub const fn new(x: u16, y: u16, w: u16, h: u16) -> Self {
        Self { x, y, w, h }
    }

    pub fn contains(&self, x: u16, y: u16) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }

    pub fn bottom(&self) -> u16 {
        self.y + self.h
    }
}

/// The display's drawing surface.
pub trait DrawSurface {
    fn fill_rect(&mut self, rect: Rect, color: Color) -> Result<(), PeripheralError>;

    /// Draws `text` with its top-left corner at `(x, y)`.
    fn blit_text(&mut self, x: u16, y: u16, text: &str, color: Color) -> Result<(), PeripheralError>;
}

/// One recorded draw call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOp {
    Fill { rect: Rect, color: Color },
    Text { x: u16, y: u16, text: String, color: Color },
}

/// Replays `ops` onto a surface.
pub fn paint(ops: &[DrawOp], surface: &mut dyn DrawSurface) -> Result<(), PeripheralError> {
    for op in ops {
        match op {
            DrawOp::Fill { rect, color } => surface.fill_rect(*rect, *color)?,
            DrawOp::Text { x, y, text, color } => surface.blit_text(*x, *y, text, *color)?,
        }
    }
    Ok(())
}

// ── Layout ────────────────────────────────────────────────────────────────────

const STATUS_HEIGHT: u16 = 24;
const STRIP_HEIGHT: u16 = 48;
const ROW_HEIGHT: u16 = 31;
const TOGGLE_HEIGHT: u16 = 36;
const TRACK_WIDTH: u16 = 24;

/// Media strip buttons, left to right.
pub const MEDIA_STRIP: [MediaKey; 4] = [
    MediaKey::PrevTrack,
    MediaKey::PlayPause,
    MediaKey::NextTrack,
    MediaKey::Mute,
];

/// What a touch landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hit {
    /// A visible list row (0 = top row on screen).
    Row(usize),
    /// The slider, already mapped to `0..=100`.
    Slider(u8),
    MuteToggle,
    MediaButton(MediaKey),
    Nothing,
}

/// Fixed-position regions of the screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub screen: Rect,
    pub status_bar: Rect,
    pub list: Rect,
    pub panel: Rect,
    pub track: Rect,
    pub mute_toggle: Rect,
    pub strip: [(MediaKey, Rect); 4],
}

impl Layout {
    pub fn new(geometry: &DisplayGeometry) -> Self {
        let content_top = STATUS_HEIGHT;
        let strip_top = geometry.height.saturating_sub(STRIP_HEIGHT);
        let content_height = strip_top.saturating_sub(content_top);

        let list = Rect::new(0, content_top, geometry.list_width, content_height);
        let panel = Rect::new(geometry.list_width, content_top, geometry.panel_width, content_height);

        let mute_toggle = Rect::new(
            panel.x + 10,
            strip_top.saturating_sub(8 + TOGGLE_HEIGHT),
            panel.w.saturating_sub(20),
            TOGGLE_HEIGHT,
        );
        let track_top = content_top + 28;
        let track = Rect::new(
            panel.x + (panel.w.saturating_sub(TRACK_WIDTH)) / 2,
            track_top,
            TRACK_WIDTH,
            mute_toggle.y.saturating_sub(10 + track_top),
        );

        let button_width = geometry.width / MEDIA_STRIP.len() as u16;
        let mut strip =
            MEDIA_STRIP.map(|key| (key, Rect::new(0, strip_top, button_width, STRIP_HEIGHT)));
        for (i, (_, rect)) in strip.iter_mut().enumerate() {
            rect.x = button_width * i as u16;
        }

        Self {
            screen: Rect::new(0, 0, geometry.width, geometry.height),
            status_bar: Rect::new(0, 0, geometry.width, STATUS_HEIGHT),
            list,
            panel,
            track,
            mute_toggle,
            strip,
        }
    }

    /// Number of list rows that fit on screen.
    pub fn visible_rows(&self) -> usize {
        usize::from(self.list.h / ROW_HEIGHT)
    }

    pub fn row_height(&self) -> u16 {
        ROW_HEIGHT
    }

    /// Screen rectangle of visible row `row`.
    pub fn row_rect(&self, row: usize) -> Rect {
        Rect::new(
            self.list.x,
            self.list.y + ROW_HEIGHT * row as u16,
            self.list.w,
            ROW_HEIGHT,
        )
    }

    /// Maps a y coordinate on the slider to a volume.  Top is 100.
    pub fn slider_volume(&self, y: u16) -> u8 {
        let top = self.track.y;
        let bottom = self.track.bottom();
        let height = u32::from(self.track.h.max(1));
        let y = y.clamp(top, bottom);
        let from_bottom = u32::from(bottom - y);
        ((from_bottom * 100 + height / 2) / height).min(100) as u8
    }

    /// Slider hit region: the track plus some slack around it.
    fn slider_region(&self) -> Rect {
        Rect::new(
            self.panel.x,
            self.track.y.saturating_sub(8),
            self.panel.w,
            self.track.h + 16,
        )
    }

    pub fn hit_test(&self, x: u16, y: u16) -> Hit {
        if let Some((key, _)) = self.strip.iter().find(|(_, r)| r.contains(x, y)) {
            return Hit::MediaButton(*key);
        }
        if self.mute_toggle.contains(x, y) {
            return Hit::MuteToggle;
        }
        if self.slider_region().contains(x, y) {
            return Hit::Slider(self.slider_volume(y));
        }
        if self.list.contains(x, y) {
            let row = usize::from((y - self.list.y) / ROW_HEIGHT);
            if row < self.visible_rows() {
                return Hit::Row(row);
            }
        }
        Hit::Nothing
    }
}

// ── List window ───────────────────────────────────────────────────────────────

/// Which slice of the session list is on screen.
///
/// The window moves on its own when the list is dragged.  It only jumps to
/// the selection when the selection changes, so a selected row may be
/// scrolled out of view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListView {
    first: usize,
    followed: Option<SessionId>,
}

impl ListView {
    /// List index of the top visible row.
    pub fn first(&self) -> usize {
        self.first
    }

    /// Moves the window by `rows` (positive scrolls towards the end).
    pub fn scroll_by(&mut self, rows: i32, len: usize, visible: usize) {
        let max = len.saturating_sub(visible);
        let target = if rows >= 0 {
            self.first.saturating_add(rows.unsigned_abs() as usize)
        } else {
            self.first.saturating_sub(rows.unsigned_abs() as usize)
        };
        self.first = target.min(max);
    }

    /// Brings a newly selected row into view and keeps the window inside a
    /// list that may have shrunk.
    pub fn follow(&mut self, reconciler: &InputReconciler, visible: usize) {
        let len = reconciler.shadow().len();
        let selected = reconciler.selected();
        if selected != self.followed {
            self.followed = selected;
            if let Some(index) = selected.and_then(|id| reconciler.shadow().position(id)) {
                if index < self.first {
                    self.first = index;
                } else if visible > 0 && index >= self.first + visible {
                    self.first = index + 1 - visible;
                }
            }
        }
        self.first = self.first.min(len.saturating_sub(visible));
    }
}

// ── Model ─────────────────────────────────────────────────────────────────────

/// Link status as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkIndicator {
    /// Transport lost: "host disconnected".
    Disconnected,
    /// Handshaking or resyncing.
    Connecting,
    Online,
}

impl LinkIndicator {
    pub fn from_state(state: LinkState) -> Self {
        match state {
            LinkState::Disconnected => LinkIndicator::Disconnected,
            LinkState::Handshaking | LinkState::Resyncing => LinkIndicator::Connecting,
            LinkState::Synchronized => LinkIndicator::Online,
        }
    }

    fn label(self) -> Option<(&'static str, Color)> {
        match self {
            LinkIndicator::Disconnected => Some(("Host disconnected", Color::WARNING)),
            LinkIndicator::Connecting => Some(("Connecting", Color::PENDING)),
            LinkIndicator::Online => None,
        }
    }
}

/// Screen mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// No session list yet: indicator and media buttons only.
    Connecting,
    Mixer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowModel {
    pub id: SessionId,
    pub name: String,
    pub volume: u8,
    pub muted: bool,
}

/// Everything the render function needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiModel {
    pub screen: Screen,
    pub indicator: LinkIndicator,
    pub rows: Vec<RowModel>,
    /// Index into `rows`.
    pub selected: Option<usize>,
    pub scroll: usize,
}

impl UiModel {
    pub fn build(reconciler: &InputReconciler, indicator: LinkIndicator, list: &ListView) -> Self {
        let shadow = reconciler.shadow();
        let rows: Vec<RowModel> = shadow
            .iter()
            .map(|e| RowModel {
                id: e.session.id,
                name: e.session.name.clone(),
                volume: e.session.volume,
                muted: e.session.muted,
            })
            .collect();
        let selected = reconciler.selected().and_then(|id| shadow.position(id));
        let screen = if indicator == LinkIndicator::Online || !rows.is_empty() {
            Screen::Mixer
        } else {
            Screen::Connecting
        };
        Self {
            screen,
            indicator,
            scroll: list.first(),
            rows,
            selected,
        }
    }
}

// ── Render ────────────────────────────────────────────────────────────────────

fn text(x: u16, y: u16, text: impl Into<String>, color: Color) -> DrawOp {
    DrawOp::Text {
        x,
        y,
        text: text.into(),
        color,
    }
}

fn fill(rect: Rect, color: Color) -> DrawOp {
    DrawOp::Fill { rect, color }
}

/// x that centers `label` in `rect`.
fn centered(rect: Rect, label: &str) -> u16 {
    let width = FONT_WIDTH.saturating_mul(label.chars().count() as u16);
    rect.x + rect.w.saturating_sub(width) / 2
}

/// Renders a full frame.
pub fn render(model: &UiModel, layout: &Layout) -> Vec<DrawOp> {
    let mut ops = vec![fill(layout.screen, Color::BACKGROUND)];

    ops.push(fill(layout.status_bar, Color::PANEL));
    ops.push(text(8, 4, "MixDeck", Color::TEXT));
    if let Some((label, color)) = model.indicator.label() {
        let width = FONT_WIDTH * label.len() as u16;
        ops.push(text(layout.status_bar.w.saturating_sub(width + 8), 4, label, color));
    }

    match model.screen {
        Screen::Connecting => {
            let message = match model.indicator {
                LinkIndicator::Disconnected => "Waiting for host",
                _ => "Connecting to host",
            };
            let y = layout.list.y + layout.list.h / 2 - 8;
            ops.push(text(centered(layout.screen, message), y, message, Color::DIM_TEXT));
        }
        Screen::Mixer => {
            render_list(model, layout, &mut ops);
            render_panel(model, layout, &mut ops);
        }
    }

    for (key, rect) in &layout.strip {
        ops.push(fill(*rect, Color::PANEL));
        let label = key.label();
        ops.push(text(centered(*rect, label), rect.y + 16, label, Color::TEXT));
    }
    ops
}

fn render_list(model: &UiModel, layout: &Layout, ops: &mut Vec<DrawOp>) {
    let visible = model.rows.iter().enumerate().skip(model.scroll).take(layout.visible_rows());
    for (row, (index, session)) in visible.enumerate() {
        let rect = layout.row_rect(row);
        if model.selected == Some(index) {
            ops.push(fill(rect, Color::SELECTED));
        }
        ops.push(text(rect.x + 8, rect.y + 8, session.name.as_str(), Color::TEXT));
        let value = if session.muted {
            "MUTE".to_string()
        } else {
            format!("{}%", session.volume)
        };
        ops.push(text(rect.x + rect.w - 48, rect.y + 8, value, Color::DIM_TEXT));
    }
    if model.rows.is_empty() {
        ops.push(text(8, layout.list.y + 8, "No audio sessions", Color::DIM_TEXT));
    }
}

fn render_panel(model: &UiModel, layout: &Layout, ops: &mut Vec<DrawOp>) {
    let Some(session) = model.selected.and_then(|i| model.rows.get(i)) else {
        let hint = "Select";
        ops.push(text(centered(layout.panel, hint), layout.panel.y + 8, hint, Color::DIM_TEXT));
        return;
    };

    let value = format!("{}%", session.volume);
    ops.push(text(centered(layout.panel, &value), layout.panel.y + 6, value, Color::TEXT));

    let track = layout.track;
    ops.push(fill(track, Color::PANEL));
    let level_height = (u32::from(track.h) * u32::from(session.volume) / 100) as u16;
    let level = Rect::new(track.x, track.bottom() - level_height, track.w, level_height);
    let level_color = if session.muted {
        Color::MUTED_LEVEL
    } else {
        Color::LEVEL
    };
    ops.push(fill(level, level_color));

    let toggle = layout.mute_toggle;
    let (label, color) = if session.muted {
        ("Muted", Color::WARNING)
    } else {
        ("Mute", Color::PANEL)
    };
    ops.push(fill(toggle, color));
    ops.push(text(centered(toggle, label), toggle.y + 10, label, Color::TEXT));
}

// ── Redraw-on-change ──────────────────────────────────────────────────────────

/// What a frame depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameKey {
    pub generation: u64,
    pub selected: Option<SessionId>,
    pub indicator: LinkIndicator,
    pub first_row: usize,
}

impl FrameKey {
    pub fn of(reconciler: &InputReconciler, indicator: LinkIndicator, list: &ListView) -> Self {
        Self {
            generation: reconciler.shadow().generation(),
            selected: reconciler.selected(),
            indicator,
            first_row: list.first(),
        }
    }
}

/// Paints frames onto the display, skipping unchanged ones.
#[derive(Debug)]
pub struct Renderer {
    layout: Layout,
    list: ListView,
    last: Option<FrameKey>,
}

impl Renderer {
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            list: ListView::default(),
            last: None,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The list window as last drawn.
    pub fn list(&self) -> &ListView {
        &self.list
    }

    /// Scrolls the list by `rows`; the next [`draw`](Self::draw) shows it.
    pub fn scroll_list(&mut self, rows: i32, len: usize) {
        self.list.scroll_by(rows, len, self.layout.visible_rows());
    }

    /// Forces the next [`draw`](Self::draw) to repaint.
    pub fn invalidate(&mut self) {
        self.last = None;
    }

    /// Repaints if anything the frame depends on changed.  Returns whether a
    /// frame was painted.
    ///
    /// A failed paint leaves the frame marked stale so it is retried.
    pub fn draw(
        &mut self,
        reconciler: &InputReconciler,
        indicator: LinkIndicator,
        surface: &mut dyn DrawSurface,
    ) -> Result<bool, PeripheralError> {
        self.list.follow(reconciler, self.layout.visible_rows());
        let key = FrameKey::of(reconciler, indicator, &self.list);
        if self.last == Some(key) {
            return Ok(false);
        }
        let model = UiModel::build(reconciler, indicator, &self.list);
        self.last = None;
        paint(&render(&model, &self.layout), surface)?;
        self.last = Some(key);
        Ok(true)
    }
}
