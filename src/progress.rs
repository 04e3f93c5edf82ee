//! Per-table load progress bars, with log lines routed above them

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

static BARS: OnceLock<MultiProgress> = OnceLock::new();

fn bars() -> &'static MultiProgress {
    BARS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

fn load_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:>22.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

/// A byte-position bar for one source file
pub fn add_load_bar(table: &str, total_bytes: u64) -> ProgressBar {
    let bar = bars().add(ProgressBar::new(total_bytes));
    bar.set_style(load_style());
    bar.set_prefix(table.to_string());
    bar
}

pub fn finish_load_bar(bar: &ProgressBar, table: &str, rows: i64) {
    bar.finish_with_message(format!("{} rows into {}", rows, table));
}

/// Routes tracing output through the shared progress display
#[derive(Default, Clone)]
pub struct LogWriterFactory;

pub struct LogWriter {
    pending: Vec<u8>,
}

fn emit(line: &[u8]) {
    let text = String::from_utf8_lossy(line);
    let _ = bars().println(text.trim_end_matches('\r'));
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);

        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            emit(&line[..line.len() - 1]);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            emit(&self.pending);
            self.pending.clear();
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            pending: Vec::new(),
        }
    }
}
