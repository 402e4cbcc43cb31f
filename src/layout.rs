//! # Display Layout
//!
//! Turns a selection of arrivals into the two text lines shown on the panel.
//! Layout works in character cells of the panel font, so the same [`Frame`]
//! can be drawn on the LED matrix or printed to a terminal.
//!
//! ## Modes
//! - **Direction**: one line per platform direction,
//!   `MN  (A) 3m, (C) 5m` / `BK  (A) 2m`. Trains that do not fit are dropped
//!   from the end of the line.
//! - **Rotating**: the closest train stays on line 1 (`1. (C) Euclid Av   5m`),
//!   line 2 rotates through the following trains numbered from 2.
//!
//! An empty selection always produces the same placeholder frame, whichever
//! mode is active.

use crate::{arrivals::DirectionalSelection, config::Config, ArrivalRecord, Direction};
use embedded_graphics::pixelcolor::Rgb888;

/// Horizontal advance of one character cell in pixels.
pub const CELL_WIDTH: u32 = 6;

/// How a span is colored when drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorHint {
    /// Plain white text
    Text,
    /// Route bullet: route-colored background with the route letter on top
    Route,
}

/// A run of text sharing one color hint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub hint: ColorHint,
}

impl Span {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            hint: ColorHint::Text,
        }
    }

    pub fn route(route_id: impl Into<String>) -> Self {
        Self {
            text: route_id.into(),
            hint: ColorHint::Route,
        }
    }

    /// Width in character cells. Route bullets take one cell of padding on
    /// each side of the route letters.
    pub fn cells(&self) -> usize {
        let chars = self.text.chars().count();
        match self.hint {
            ColorHint::Text => chars,
            ColorHint::Route => chars + 2,
        }
    }
}

/// One display line: left-aligned spans plus optional right-justified text.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormattedLine {
    pub spans: Vec<Span>,
    pub right: Option<String>,
}

impl FormattedLine {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            spans: vec![Span::text(text)],
            right: None,
        }
    }

    /// Cells used by the left-aligned part.
    pub fn left_cells(&self) -> usize {
        self.spans.iter().map(Span::cells).sum()
    }

    /// Text with route bullets written as `(X)`.
    pub fn plain_text(&self) -> String {
        self.spans
            .iter()
            .map(|span| match span.hint {
                ColorHint::Text => span.text.clone(),
                ColorHint::Route => format!("({})", span.text),
            })
            .collect()
    }
}

/// Everything shown on the panel at one moment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub lines: Vec<FormattedLine>,
}

impl Frame {
    /// The placeholder shown when there is nothing to display.
    pub fn no_trains(text: &str) -> Self {
        Self {
            lines: vec![FormattedLine::plain(text)],
        }
    }
}

/// Labels and sizes that shape the frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutOptions {
    /// Character cells per line
    pub width_cells: usize,
    pub north_label: String,
    pub south_label: String,
    pub no_trains_text: String,
}

impl LayoutOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            width_cells: (config.panel_width() / CELL_WIDTH) as usize,
            north_label: config.display.north_label.clone(),
            south_label: config.display.south_label.clone(),
            no_trains_text: config.display.no_trains_text.clone(),
        }
    }

    fn label(&self, direction: Direction) -> &str {
        match direction {
            Direction::North => &self.north_label,
            Direction::South => &self.south_label,
        }
    }
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Shorten `text` to at most `max_cells` characters, ending in `...` when cut.
///
/// ```
/// use subway_clock_lib::layout::truncate;
///
/// assert_eq!(truncate("Euclid Av", 20), "Euclid Av");
/// assert_eq!(truncate("Far Rockaway-Mott Av", 12), "Far Rocka...");
/// assert_eq!(truncate("Inwood", 2), "...");
/// ```
pub fn truncate(text: &str, max_cells: usize) -> String {
    const ELLIPSIS: &str = "...";
    if text.chars().count() <= max_cells {
        return text.to_string();
    }
    if max_cells <= ELLIPSIS.len() {
        return ELLIPSIS.to_string();
    }
    let kept: String = text.chars().take(max_cells - ELLIPSIS.len()).collect();
    format!("{}{ELLIPSIS}", kept.trim_end())
}

fn format_minutes(minutes: i64) -> String {
    format!("{minutes}m")
}

/// Line for one train in rotating mode: `N. (R) headsign` with the minutes
/// right-justified.
pub fn arrival_line(
    position: usize,
    record: &ArrivalRecord,
    options: &LayoutOptions,
) -> FormattedLine {
    let prefix = Span::text(format!("{position}. "));
    let bullet = Span::route(record.route_id.clone());
    let right = format_minutes(record.minutes_away);

    // One blank cell between the bullet and the headsign, one before the time
    let used = prefix.cells() + bullet.cells() + 1 + right.len() + 1;
    let headsign = truncate(&record.headsign, options.width_cells.saturating_sub(used));

    FormattedLine {
        spans: vec![prefix, bullet, Span::text(format!(" {headsign}"))],
        right: Some(right),
    }
}

/// Rotating mode: closest train fixed on line 1, line 2 shows the following
/// train at `index` (wrapping), numbered from 2.
pub fn rotating_frame(selection: &[ArrivalRecord], index: usize, options: &LayoutOptions) -> Frame {
    let Some((closest, following)) = selection.split_first() else {
        return Frame::no_trains(&options.no_trains_text);
    };

    let mut lines = vec![arrival_line(1, closest, options)];
    if !following.is_empty() {
        let slot = index % following.len();
        lines.push(arrival_line(slot + 2, &following[slot], options));
    }
    Frame { lines }
}

/// One direction line: label followed by as many `(R) Nm` entries as fit.
pub fn direction_line(
    label: &str,
    records: &[ArrivalRecord],
    options: &LayoutOptions,
) -> FormattedLine {
    let mut spans = vec![Span::text(format!("{label}  "))];
    if records.is_empty() {
        spans.push(Span::text(truncate(
            &options.no_trains_text,
            options.width_cells.saturating_sub(spans[0].cells()),
        )));
        return FormattedLine { spans, right: None };
    }

    let mut used = spans[0].cells();
    for (i, record) in records.iter().enumerate() {
        let separator = if i == 0 { "" } else { ", " };
        let bullet = Span::route(record.route_id.clone());
        let time = Span::text(format!(" {}", format_minutes(record.minutes_away)));
        let needed = separator.len() + bullet.cells() + time.cells();
        if used + needed > options.width_cells {
            break;
        }
        if !separator.is_empty() {
            spans.push(Span::text(separator));
        }
        spans.push(bullet);
        spans.push(time);
        used += needed;
    }
    FormattedLine { spans, right: None }
}

/// Direction mode: north line then south line.
pub fn direction_frame(selection: &DirectionalSelection, options: &LayoutOptions) -> Frame {
    if selection.is_empty() {
        return Frame::no_trains(&options.no_trains_text);
    }
    let lines = [Direction::North, Direction::South]
        .into_iter()
        .map(|direction| {
            direction_line(options.label(direction), selection.lane(direction), options)
        })
        .collect();
    Frame { lines }
}

/// Parse a `#RRGGBB` color.
///
/// ```
/// use embedded_graphics::pixelcolor::Rgb888;
/// use subway_clock_lib::layout::parse_hex_color;
///
/// assert_eq!(parse_hex_color("#003986"), Some(Rgb888::new(0x00, 0x39, 0x86)));
/// assert_eq!(parse_hex_color("blue"), None);
/// ```
pub fn parse_hex_color(hex: &str) -> Option<Rgb888> {
    let digits = hex.trim().strip_prefix('#')?;
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    Some(Rgb888::new(channel(0)?, channel(2)?, channel(4)?))
}
