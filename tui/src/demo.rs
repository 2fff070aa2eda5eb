//! Demo Scene - Shared Counter Board
//!
//! A small application used by both binaries: a row of counters shared by
//! every display in the process, plus a clock showing how long the display
//! has been up.
//!
//! ```text
//! ╭ termplex ─────────────────────────────── up 00:01:07 ╮
//! │ ╭────────────────╮ ╭────────────────╮                 │
//! │ │ red            │ │ blue           │                 │
//! │ │            3   │ │           -1   │                 │
//! │ ╰────────────────╯ ╰────────────────╯                 │
//! │ alice: red +1                                         │
//! ╰ Tab focus  +/- change  0 reset  q quit ───────────────╯
//! ```
//!
//! Every display builds its own windows; the numbers live in one
//! [`SharedModel`], so a change made in one session repaints all of them.

use std::time::Instant;

use termplex_core::signal::{PRIORITY_HIGH, PRIORITY_NORMAL};
use termplex_core::{
    Canvas, DrawContext, KeyCode, MuxError, ObjectId, ObjectRegistry, Propagation, Rect, Scene,
    SharedModel, Size, StyleRole,
};

/// Kind name of the uptime clock
pub const CLOCK_KIND: &str = "clock";

/// Counter labels used when none are configured
pub const DEFAULT_LABELS: &[&str] = &["red", "green", "blue"];

const COUNTER_WIDTH: u16 = 18;
const COUNTER_HEIGHT: u16 = 4;
const CLOCK_WIDTH: u16 = 14;
const HELP: &str = " Tab focus  +/- change  0 reset  q quit ";

/// One counter on the board
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Counter {
    /// Label drawn in the counter's box
    pub label: String,
    /// Current value
    pub value: i64,
}

/// State shared by every display
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Board {
    /// Counters in display order
    pub counters: Vec<Counter>,
    /// Who changed what last, for the status line
    pub last_change: Option<String>,
}

impl Board {
    /// A board with one zeroed counter per label
    #[must_use]
    pub fn with_labels(labels: &[&str]) -> Self {
        Self {
            counters: labels
                .iter()
                .map(|label| Counter {
                    label: (*label).to_string(),
                    value: 0,
                })
                .collect(),
            last_change: None,
        }
    }

    /// Add `delta` to a counter, recording `user` as the editor
    pub fn adjust(&mut self, index: usize, delta: i64, user: &str) {
        if let Some(counter) = self.counters.get_mut(index) {
            counter.value = counter.value.saturating_add(delta);
            self.last_change = Some(format!("{user}: {} {delta:+}", counter.label));
        }
    }

    /// Zero a counter
    pub fn reset(&mut self, index: usize, user: &str) {
        if let Some(counter) = self.counters.get_mut(index) {
            counter.value = 0;
            self.last_change = Some(format!("{user}: {} reset", counter.label));
        }
    }

    /// Sum of every counter
    #[must_use]
    pub fn total(&self) -> i64 {
        self.counters.iter().map(|c| c.value).sum()
    }
}

/// Register the demo's object kinds
pub fn register_kinds(objects: &ObjectRegistry) {
    objects.register_kind(CLOCK_KIND, |scene, parent| {
        let cols = scene.size().cols;
        let bounds = Rect::new(cols.saturating_sub(CLOCK_WIDTH + 2), 0, CLOCK_WIDTH, 1);
        let clock = scene.add_named_window(parent, CLOCK_KIND, bounds)?;
        let started = Instant::now();
        scene.set_draw_handler(clock, move |canvas, ctx| {
            let secs = started.elapsed().as_secs();
            let text = format!(
                " up {:02}:{:02}:{:02} ",
                secs / 3600,
                (secs / 60) % 60,
                secs % 60
            );
            canvas.clear_all();
            canvas.put_str(0, 0, &text, ctx.theme.style(StyleRole::Muted));
        })?;
        Ok(clock)
    });
}

/// Build the board into `scene`
///
/// # Errors
///
/// Fails if a window cannot be created, or if [`register_kinds`] was not
/// called on the application's registry.
pub fn build(scene: &mut Scene, board: &SharedModel<Board>) -> Result<(), MuxError> {
    let root = scene.root();
    let user = scene.session().identity.user.clone();

    let frame_board = board.clone();
    scene.set_draw_handler(root, move |canvas, ctx| draw_frame(canvas, ctx, &frame_board))?;

    let clock = scene.construct(CLOCK_KIND, root)?;

    let count = board.read(|b| b.counters.len());
    let mut counters = Vec::with_capacity(count);
    for index in 0..count {
        let id = scene.add_window(root, Rect::new(0, 0, COUNTER_WIDTH, COUNTER_HEIGHT))?;
        let view = board.clone();
        scene.set_draw_handler(id, move |canvas, ctx| draw_counter(canvas, ctx, &view, index))?;

        let model = board.clone();
        let editor = user.clone();
        scene.connect_key(id, PRIORITY_NORMAL, move |_, key| {
            match key.code {
                KeyCode::Char('+') | KeyCode::Up => model.update(|b| b.adjust(index, 1, &editor)),
                KeyCode::Char('-') | KeyCode::Down => {
                    model.update(|b| b.adjust(index, -1, &editor))
                }
                KeyCode::Char('0') => model.update(|b| b.reset(index, &editor)),
                _ => return Propagation::Continue,
            };
            Propagation::Stop
        });
        counters.push(id);
    }
    layout(scene, &counters, clock)?;

    let placed = counters.clone();
    scene.connect_resize(root, PRIORITY_NORMAL, move |scene, _| {
        if let Err(e) = layout(scene, &placed, clock) {
            tracing::warn!(error = %e, "Relayout failed");
        }
        Propagation::Continue
    });

    scene.connect_key(root, PRIORITY_HIGH, |scene, key| match key.code {
        KeyCode::Tab | KeyCode::Right => {
            scene.focus_next();
            Propagation::Stop
        }
        KeyCode::BackTab | KeyCode::Left => {
            scene.focus_prev();
            Propagation::Stop
        }
        _ => Propagation::Continue,
    });
    scene.connect_key(root, PRIORITY_NORMAL, |scene, key| {
        if key.code == KeyCode::Char('q') {
            scene.request_close();
            return Propagation::Stop;
        }
        Propagation::Continue
    });

    if let Some(first) = counters.first() {
        scene.focus(*first)?;
    }
    scene.redraw_on(board.subscribe());
    Ok(())
}

/// Place counters left to right, wrapping; the clock goes top right
fn layout(scene: &mut Scene, counters: &[ObjectId], clock: ObjectId) -> Result<(), MuxError> {
    let Size { cols, .. } = scene.size();
    let per_row = ((cols.saturating_sub(4)) / (COUNTER_WIDTH + 1)).max(1);
    let tree = scene.tree_mut();
    for (index, id) in counters.iter().enumerate() {
        let index = u16::try_from(index).unwrap_or(u16::MAX);
        let x = 2 + (index % per_row) * (COUNTER_WIDTH + 1);
        let y = 1 + (index / per_row) * COUNTER_HEIGHT;
        tree.set_bounds(*id, Rect::new(x, y, COUNTER_WIDTH, COUNTER_HEIGHT))?;
    }
    tree.set_bounds(
        clock,
        Rect::new(cols.saturating_sub(CLOCK_WIDTH + 2), 0, CLOCK_WIDTH, 1),
    )
}

fn draw_frame(canvas: &mut Canvas, ctx: &DrawContext<'_>, board: &SharedModel<Board>) {
    let theme = ctx.theme;
    let bounds = canvas.bounds();
    canvas.clear_all();
    canvas.draw_border(bounds, &theme.border, theme.style(StyleRole::Muted));
    canvas.put_str(0, 2, " termplex ", theme.style(StyleRole::Accent));

    let bottom = bounds.height.saturating_sub(1);
    canvas.put_str(bottom, 2, HELP, theme.style(StyleRole::Muted));

    let (status, total) = board.read(|b| (b.last_change.clone(), b.total()));
    let status = status.unwrap_or_else(|| "no changes yet".to_string());
    let line = format!("total {total}  |  {status}");
    canvas.put_str(bottom.saturating_sub(1), 2, &line, theme.style(StyleRole::Text));
}

fn draw_counter(
    canvas: &mut Canvas,
    ctx: &DrawContext<'_>,
    board: &SharedModel<Board>,
    index: usize,
) {
    let theme = ctx.theme;
    let border = if ctx.focused {
        theme.style(StyleRole::Focused)
    } else {
        theme.style(StyleRole::Muted)
    };
    let Some(counter) = board.read(|b| b.counters.get(index).cloned()) else {
        return;
    };

    canvas.clear_all();
    canvas.draw_border(canvas.bounds(), &theme.border, border);
    canvas.put_str(1, 2, &counter.label, theme.style(StyleRole::Text));
    let value = format!("{:>12}", counter.value);
    let style = if counter.value < 0 {
        theme.style(StyleRole::Error)
    } else {
        theme.style(StyleRole::Accent)
    };
    canvas.put_str(2, 2, &value, style);
}
