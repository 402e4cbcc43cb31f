//! # Arrival Board Rendering
//!
//! This module draws a [`Frame`] either onto an RGB pixel target (the LED
//! matrix, through [`crate::framebuffer::FrameBuffer`]) or as plain text for
//! the `--stdout` development mode. Both paths share the character-cell
//! layout computed in [`crate::layout`], so what the terminal shows lines up
//! with what the panel shows.

use crate::layout::{ColorHint, FormattedLine, Frame, CELL_WIDTH};
use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Circle, PrimitiveStyle, Rectangle, RoundedRectangle},
    text::{Baseline, Text},
};

/// Colors used when drawing on the panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Palette {
    pub text: Rgb888,
    pub route: Rgb888,
    pub background: Rgb888,
}

impl Palette {
    pub fn new(route: Rgb888) -> Self {
        Self {
            text: Rgb888::WHITE,
            route,
            background: Rgb888::BLACK,
        }
    }
}

/// Render a frame onto an RGB draw target.
///
/// The target height is split evenly between two text rows (16 px each on a
/// 32-row panel). Route spans become a filled bullet in the route color with
/// the route letters in white; right-aligned text is flush with the right edge.
pub fn draw_matrix<D>(frame: &Frame, target: &mut D, palette: &Palette) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb888>,
{
    target.clear(palette.background)?;

    let area = target.bounding_box();
    let row_height = (area.size.height / 2).max(FONT_6X10.character_size.height) as i32;
    let text_style = MonoTextStyle::new(&FONT_6X10, palette.text);
    // Center the glyphs vertically inside their row
    let text_offset = (row_height - FONT_6X10.character_size.height as i32) / 2;

    for (row, line) in frame.lines.iter().take(2).enumerate() {
        let top = area.top_left.y + row as i32 * row_height;
        let mut x = area.top_left.x;

        for span in &line.spans {
            let width = span.cells() as i32 * CELL_WIDTH as i32;
            if span.hint == ColorHint::Route {
                draw_bullet(target, Point::new(x, top), width, row_height, palette)?;
                // Letters sit one cell in from the bullet edge
                Text::with_baseline(
                    &span.text,
                    Point::new(x + CELL_WIDTH as i32, top + text_offset),
                    text_style,
                    Baseline::Top,
                )
                .draw(target)?;
            } else {
                let origin = Point::new(x, top + text_offset);
                Text::with_baseline(&span.text, origin, text_style, Baseline::Top).draw(target)?;
            }
            x += width;
        }

        if let Some(right) = &line.right {
            let width = right.chars().count() as i32 * CELL_WIDTH as i32;
            let right_x = area.top_left.x + area.size.width as i32 - width;
            let origin = Point::new(right_x, top + text_offset);
            Text::with_baseline(right, origin, text_style, Baseline::Top).draw(target)?;
        }
    }
    Ok(())
}

fn draw_bullet<D>(
    target: &mut D,
    origin: Point,
    width: i32,
    row_height: i32,
    palette: &Palette,
) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb888>,
{
    let diameter = (FONT_6X10.character_size.height + 1).min(row_height as u32);
    let top = origin.y + (row_height - diameter as i32) / 2;
    let style = PrimitiveStyle::with_fill(palette.route);

    if width <= 3 * CELL_WIDTH as i32 {
        // Single letter: a round bullet centered in its cells
        let left = origin.x + (width - diameter as i32) / 2;
        Circle::new(Point::new(left, top), diameter)
            .into_styled(style)
            .draw(target)
    } else {
        // Multi-letter routes ("GS", "FX") get a pill
        let radius = diameter / 2;
        RoundedRectangle::with_equal_corners(
            Rectangle::new(Point::new(origin.x, top), Size::new(width as u32, diameter)),
            Size::new(radius, radius),
        )
        .into_styled(style)
        .draw(target)
    }
}

fn ascii_line(line: &FormattedLine, width_cells: usize) -> String {
    let mut text = line.plain_text();
    if let Some(right) = &line.right {
        let used = text.chars().count() + right.chars().count();
        let gap = width_cells.saturating_sub(used).max(1);
        text.push_str(&" ".repeat(gap));
        text.push_str(right);
    }
    text
}

/// Render a frame as terminal text inside a box as wide as the panel.
pub fn draw_ascii(frame: &Frame, width_cells: usize) -> String {
    let border = format!("+{}+", "-".repeat(width_cells));
    let mut out = vec![border.clone()];
    for row in 0..2 {
        let text = frame
            .lines
            .get(row)
            .map(|line| ascii_line(line, width_cells))
            .unwrap_or_default();
        out.push(format!("|{text:<width_cells$}|"));
    }
    out.push(border);
    out.join("\n")
}
