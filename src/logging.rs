//! `tracing` output for the browser.
//!
//! A wasm32 module has no stderr, so events are formatted by
//! `tracing_subscriber::fmt` and each one is handed to the console method
//! matching its level.

use std::io;
use tracing::{Level, Metadata, Subscriber};
use tracing_subscriber::fmt::MakeWriter;

type Sink = fn(Level, &str);

/// Install a global subscriber that logs to the console at `max_level`
/// and below. Returns false if a subscriber was already set.
pub fn install(max_level: Level) -> bool {
    tracing::subscriber::set_global_default(subscriber(max_level, ConsoleMakeWriter::default())).is_ok()
}

pub fn subscriber(max_level: Level, writer: ConsoleMakeWriter) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_max_level(max_level)
        // SystemTime panics on wasm32-unknown-unknown
        .without_time()
        .with_target(true)
        .finish()
}

/// Hands out one `ConsoleWriter` per event
#[derive(Clone, Copy)]
pub struct ConsoleMakeWriter {
    sink: Sink,
}

impl Default for ConsoleMakeWriter {
    fn default() -> Self {
        Self { sink: console_sink }
    }
}

impl ConsoleMakeWriter {
    pub fn with_sink(sink: Sink) -> Self {
        Self { sink }
    }
}

impl<'a> MakeWriter<'a> for ConsoleMakeWriter {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleWriter::new(Level::INFO, self.sink)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        ConsoleWriter::new(*meta.level(), self.sink)
    }
}

/// Buffers one formatted event and emits it as a single line on drop
pub struct ConsoleWriter {
    level: Level,
    buffer: Vec<u8>,
    sink: Sink,
}

impl ConsoleWriter {
    fn new(level: Level, sink: Sink) -> Self {
        Self {
            level,
            buffer: Vec::with_capacity(128),
            sink,
        }
    }
}

impl io::Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ConsoleWriter {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.buffer);
        (self.sink)(self.level, text.trim_end_matches('\n'));
    }
}

#[cfg(target_arch = "wasm32")]
fn console_sink(level: Level, line: &str) {
    let value = wasm_bindgen::JsValue::from_str(line);
    if level == Level::ERROR {
        web_sys::console::error_1(&value);
    } else if level == Level::WARN {
        web_sys::console::warn_1(&value);
    } else if level == Level::INFO {
        web_sys::console::info_1(&value);
    } else {
        web_sys::console::debug_1(&value);
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn console_sink(_level: Level, line: &str) {
    eprintln!("{line}");
}
