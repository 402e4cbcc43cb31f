//! # Display Sinks
//!
//! A [`DisplaySink`] owns whatever is needed to put a [`Frame`] in front of
//! people: the terminal in development mode, or the RGB LED matrix on the
//! Raspberry Pi (`hardware` feature). Sinks are constructed once at startup,
//! injected into the display cycler, and shut down explicitly on exit so the
//! panel is never left lit with stale times.

use crate::layout::Frame;
use crate::renderer::draw_ascii;
use std::io::{self, Write};
use thiserror::Error;
use tracing::debug;

/// Errors raised by display sinks.
#[derive(Error, Debug)]
pub enum DisplayError {
    /// The panel driver refused the configuration or could not start
    #[error("display init failed: {0}")]
    Init(String),

    /// Writing to the terminal failed
    #[error("display write failed: {0}")]
    Io(#[from] io::Error),
}

/// Render target for arrival frames.
pub trait DisplaySink {
    /// Replace whatever is shown with `frame`.
    fn render(&mut self, frame: &Frame) -> Result<(), DisplayError>;

    /// Turn every pixel off.
    fn blank(&mut self) -> Result<(), DisplayError>;

    /// Release the display. The panel is left blank.
    fn shutdown(&mut self) -> Result<(), DisplayError> {
        self.blank()
    }
}

/// Development sink: prints each frame as a boxed ASCII board.
pub struct TerminalSink<W: Write = io::Stdout> {
    out: W,
    width_cells: usize,
    last: Option<Frame>,
}

impl TerminalSink {
    pub fn stdout(width_cells: usize) -> Self {
        Self::new(io::stdout(), width_cells)
    }
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W, width_cells: usize) -> Self {
        Self {
            out,
            width_cells,
            last: None,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> DisplaySink for TerminalSink<W> {
    fn render(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        // Repeated frames add nothing in a scrolling terminal
        if self.last.as_ref() == Some(frame) {
            debug!("frame unchanged, not reprinting");
            return Ok(());
        }
        writeln!(self.out, "{}\n", draw_ascii(frame, self.width_cells))?;
        self.out.flush()?;
        self.last = Some(frame.clone());
        Ok(())
    }

    fn blank(&mut self) -> Result<(), DisplayError> {
        if self.last.take().is_some() {
            writeln!(self.out, "(display off)\n")?;
            self.out.flush()?;
        }
        Ok(())
    }
}

#[cfg(feature = "hardware")]
pub use matrix::MatrixSink;

#[cfg(feature = "hardware")]
mod matrix {
    use super::{DisplayError, DisplaySink};
    use crate::config::DisplayConfig;
    use crate::framebuffer::FrameBuffer;
    use crate::layout::Frame;
    use crate::renderer::{draw_matrix, Palette};
    use embedded_graphics::pixelcolor::{Rgb888, RgbColor};
    use rpi_led_matrix::{LedCanvas, LedColor, LedMatrix, LedMatrixOptions, LedRuntimeOptions};
    use tracing::{info, warn};

    /// RGB LED matrix driven through the hzeller rpi-rgb-led-matrix library.
    ///
    /// Frames are composed in a [`FrameBuffer`] and copied to an offscreen
    /// canvas, which is swapped in on the next vsync.
    pub struct MatrixSink {
        matrix: LedMatrix,
        canvas: Option<LedCanvas>,
        buffer: FrameBuffer,
        palette: Palette,
    }

    impl MatrixSink {
        pub fn new(display: &DisplayConfig, palette: Palette) -> Result<Self, DisplayError> {
            let mut options = LedMatrixOptions::new();
            options.set_rows(display.rows);
            options.set_cols(display.cols);
            options.set_chain_length(display.chain_length);
            options.set_parallel(1);
            options.set_hardware_mapping(&display.hardware_mapping);
            options
                .set_pwm_bits(display.pwm_bits)
                .map_err(|e| DisplayError::Init(e.to_string()))?;
            options.set_pwm_lsb_nanoseconds(display.pwm_lsb_nanoseconds);
            options.set_refresh_rate(display.show_refresh_rate);

            let mut runtime = LedRuntimeOptions::new();
            runtime.set_gpio_slowdown(display.gpio_slowdown);

            let matrix = LedMatrix::new(Some(options), Some(runtime))
                .map_err(|e| DisplayError::Init(e.to_string()))?;
            let canvas = matrix.offscreen_canvas();
            let width = display.cols * display.chain_length;
            info!(width, height = display.rows, "LED matrix initialized");

            Ok(Self {
                matrix,
                canvas: Some(canvas),
                buffer: FrameBuffer::new(width, display.rows),
                palette,
            })
        }

        fn present(&mut self) {
            let Some(mut canvas) = self.canvas.take() else {
                return;
            };
            canvas.clear();
            for (x, y, color) in self.buffer.pixels() {
                if color != Rgb888::BLACK {
                    let led = LedColor {
                        red: color.r(),
                        green: color.g(),
                        blue: color.b(),
                    };
                    canvas.set(x as i32, y as i32, &led);
                }
            }
            self.canvas = Some(self.matrix.swap(canvas));
        }
    }

    impl DisplaySink for MatrixSink {
        fn render(&mut self, frame: &Frame) -> Result<(), DisplayError> {
            draw_matrix(frame, &mut self.buffer, &self.palette)
                .unwrap_or_else(|never| match never {});
            self.present();
            Ok(())
        }

        fn blank(&mut self) -> Result<(), DisplayError> {
            self.buffer.fill(Rgb888::BLACK);
            self.present();
            Ok(())
        }
    }

    impl Drop for MatrixSink {
        fn drop(&mut self) {
            if let Err(e) = self.blank() {
                warn!("failed to blank LED matrix on drop: {e}");
            }
        }
    }
}
