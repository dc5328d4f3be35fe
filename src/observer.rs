//! Progress reporting hooks for a shake run.

use std::io::Write;

/// Something that happened to one message during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShakeEvent<'a> {
    /// A tap's policy selected a message for routing.
    Selected { tap: &'a str, tag: &'a str },
    /// A sink accepted the message.
    Stored { sink: &'a str, tag: &'a str },
    /// The source copy was deleted from its tap.
    Deleted { tap: &'a str },
}

/// Receives per-message progress events from the engine.
pub trait ShakeObserver: Send + Sync {
    fn on_event(&self, event: &ShakeEvent<'_>);

    /// Called once at the end of the run.
    fn finish(&self) {}
}

/// Routes events into the log stream. The default observer.
pub struct TracingObserver;

impl ShakeObserver for TracingObserver {
    fn on_event(&self, event: &ShakeEvent<'_>) {
        match event {
            ShakeEvent::Selected { tap, tag } => {
                tracing::debug!(%tap, %tag, "message selected");
            }
            ShakeEvent::Stored { sink, tag } => {
                tracing::debug!(%sink, %tag, "message stored");
            }
            ShakeEvent::Deleted { tap } => {
                tracing::debug!(%tap, "message deleted");
            }
        }
    }
}

/// Prints one glyph per event to stdout: `O` selected, `S` stored,
/// `D` deleted. Compact enough to watch a large mailbox drain.
pub struct ConsoleObserver;

impl ConsoleObserver {
    fn glyph(&self, glyph: char) {
        print!("{glyph}");
        let _ = std::io::stdout().flush();
    }
}

impl ShakeObserver for ConsoleObserver {
    fn on_event(&self, event: &ShakeEvent<'_>) {
        match event {
            ShakeEvent::Selected { .. } => self.glyph('O'),
            ShakeEvent::Stored { .. } => self.glyph('S'),
            ShakeEvent::Deleted { .. } => self.glyph('D'),
        }
    }

    fn finish(&self) {
        println!();
    }
}
