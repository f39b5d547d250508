//! Single-line terminal progress bar.

use std::io::{self, Stderr, Write};

use crossterm::cursor::MoveToColumn;
use crossterm::execute;
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType};

const DEFAULT_WIDTH: u16 = 80;
const LABEL_WIDTH: usize = 7;

/// Text bar redrawn in place on the current line.
pub struct ProgressBar<W: Write = Stderr> {
    out: W,
    width: u16,
    last_percent: Option<u32>,
    open: bool,
}

impl ProgressBar<Stderr> {
    /// Bar on stderr sized to the terminal, capped at `max_width` columns.
    pub fn stderr(max_width: Option<u16>) -> Self {
        let columns = terminal::size().map(|(c, _)| c).unwrap_or(DEFAULT_WIDTH);
        let width = max_width.map_or(columns, |max| columns.min(max));
        Self::with_writer(io::stderr(), width)
    }
}

impl<W: Write> ProgressBar<W> {
    pub fn with_writer(out: W, width: u16) -> Self {
        Self {
            out,
            width,
            last_percent: None,
            open: true,
        }
    }

    /// Redraw at `fraction`. Unchanged whole percentages are not redrawn.
    pub fn render(&mut self, fraction: f64) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        let fraction = clamp(fraction);
        let percent = (fraction * 100.0).floor() as u32;
        if self.last_percent == Some(percent) {
            return Ok(());
        }
        self.last_percent = Some(percent);
        let line = render_line(fraction, self.width);
        execute!(
            self.out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(line)
        )
    }

    /// Draw 100% and end the line.
    pub fn finish(&mut self) -> io::Result<()> {
        self.render(1.0)?;
        self.close()
    }

    /// End the line, leaving the last drawn state visible.
    pub fn close(&mut self) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        writeln!(self.out)?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn clamp(fraction: f64) -> f64 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

/// Bar text for `fraction` fitted into `width` columns, e.g. `[####----] 50%`.
pub fn render_line(fraction: f64, width: u16) -> String {
    let fraction = clamp(fraction);
    let percent = (fraction * 100.0).floor() as u32;
    let label = format!(" {percent:>3}%");
    let slots = (width as usize).saturating_sub(LABEL_WIDTH).max(1);
    let filled = ((fraction * slots as f64).floor() as usize).min(slots);
    format!("[{}{}]{label}", "#".repeat(filled), "-".repeat(slots - filled))
}
