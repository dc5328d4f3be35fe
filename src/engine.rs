//! The shaking engine: drains taps into sinks.

use std::fmt;
use std::sync::Arc;

use crate::auth::UserPass;
use crate::config::{CredentialConfig, ShakeConfig, SinkConfig, TapConfig};
use crate::error::{EngineError, Result};
use crate::observer::{ShakeEvent, ShakeObserver, TracingObserver};
use crate::secret::SecretResolver;
use crate::sink::{FolderSink, ImapSink, Sink, SmtpSink};
use crate::tap::{FixedTag, FolderTap, MessageHandle, Pop3Tap, Tap};

/// Counters for one completed run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShakeSummary {
    /// Messages selected by some tap's policy.
    pub selected: u64,
    /// Selected messages accepted by at least one sink.
    pub stored: u64,
    /// Source copies deleted after a successful store.
    pub deleted: u64,
    /// Per-message failures that were reported and skipped.
    pub failed: u64,
}

impl fmt::Display for ShakeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} selected, {} stored, {} deleted, {} failed",
            self.selected, self.stored, self.deleted, self.failed
        )
    }
}

/// One-shot mover of messages from taps to sinks.
///
/// Every selected message is offered to every sink; if at least one
/// accepts it and the originating tap is in move mode, the source copy
/// is deleted. Deletions are issued after the tap's enumeration has
/// been fully drained, so a tap's handles never race its own stream.
pub struct MailShaker {
    name: String,
    taps: Vec<Box<dyn Tap>>,
    sinks: Vec<Box<dyn Sink>>,
    observer: Arc<dyn ShakeObserver>,
}

impl MailShaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            taps: Vec::new(),
            sinks: Vec::new(),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Assemble an engine from a parsed configuration.
    pub fn from_config(config: ShakeConfig) -> Self {
        let mut shaker = Self::new(config.shake_name);
        for tap in config.taps {
            shaker.add_tap(build_tap(tap));
        }
        for sink in config.sinks {
            shaker.add_sink(build_sink(sink));
        }
        shaker
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_tap(&mut self, tap: Box<dyn Tap>) -> &mut Self {
        self.taps.push(tap);
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn Sink>) -> &mut Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ShakeObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run once: start everything, drain every tap, close everything.
    ///
    /// A component that fails to start aborts the run before any
    /// message moves, after closing whatever had already started.
    /// Per-message failures are counted and skipped.
    pub fn shake(&mut self) -> Result<ShakeSummary> {
        if self.taps.is_empty() {
            return Err(EngineError::NoTaps.into());
        }
        if self.sinks.is_empty() {
            return Err(EngineError::NoSinks.into());
        }
        tracing::info!(run = %self.name, taps = self.taps.len(), sinks = self.sinks.len(), "starting");

        self.start_all()?;
        let summary = self.drain_all();
        self.close_all();
        self.observer.finish();
        tracing::info!(run = %self.name, %summary, "finished");
        Ok(summary)
    }

    /// Start taps then sinks; on failure close everything started so
    /// far and bail.
    fn start_all(&mut self) -> Result<()> {
        for started in 0..self.taps.len() {
            if let Err(e) = self.taps[started].start() {
                tracing::error!(tap = %self.taps[started].name(), error = %e, "tap failed to start");
                close_started(&mut self.taps, started, &mut self.sinks, 0);
                return Err(e.into());
            }
        }
        let tap_count = self.taps.len();
        for started in 0..self.sinks.len() {
            if let Err(e) = self.sinks[started].start() {
                tracing::error!(sink = %self.sinks[started].name(), error = %e, "sink failed to start");
                close_started(&mut self.taps, tap_count, &mut self.sinks, started);
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn drain_all(&mut self) -> ShakeSummary {
        let mut summary = ShakeSummary::default();
        let observer = Arc::clone(&self.observer);
        let sinks = &mut self.sinks;

        for tap in &mut self.taps {
            let do_move = tap.do_move();
            let tap_name = tap.name().to_string();
            let mut pending_deletes: Vec<MessageHandle> = Vec::new();

            for item in tap.selected_messages() {
                let (tag, handle, msg) = match item {
                    Ok(item) => item,
                    Err(e) => {
                        tracing::warn!(tap = %tap_name, error = %e, "skipping message");
                        summary.failed += 1;
                        continue;
                    }
                };
                summary.selected += 1;
                observer.on_event(&ShakeEvent::Selected {
                    tap: &tap_name,
                    tag: &tag,
                });

                let mut stored_somewhere = false;
                for sink in sinks.iter_mut() {
                    match sink.store(&tag, &msg) {
                        Ok(true) => {
                            stored_somewhere = true;
                            observer.on_event(&ShakeEvent::Stored {
                                sink: sink.name(),
                                tag: &tag,
                            });
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(sink = %sink.name(), error = %e, "store failed");
                        }
                    }
                }
                if stored_somewhere {
                    summary.stored += 1;
                    if do_move {
                        pending_deletes.push(handle);
                    }
                }
            }

            // The enumeration is fully drained before any delete, so
            // handles stay valid for session-scoped taps.
            for handle in pending_deletes {
                match tap.delete(&handle) {
                    Ok(()) => {
                        summary.deleted += 1;
                        observer.on_event(&ShakeEvent::Deleted { tap: &tap_name });
                    }
                    Err(e) => {
                        tracing::warn!(tap = %tap_name, %handle, error = %e, "delete failed");
                        summary.failed += 1;
                    }
                }
            }
        }
        summary
    }

    /// Close every component, logging rather than propagating failures.
    fn close_all(&mut self) {
        let tap_count = self.taps.len();
        let sink_count = self.sinks.len();
        close_started(&mut self.taps, tap_count, &mut self.sinks, sink_count);
    }
}

fn credential(config: CredentialConfig) -> UserPass {
    let resolver = SecretResolver::new(config.secret).with_cache(config.cache_secret);
    UserPass::with_resolver(config.user, resolver)
}

fn build_tap(config: TapConfig) -> Box<dyn Tap> {
    match config {
        TapConfig::Folder {
            name,
            path,
            recursive,
            try_latin1,
            move_on_success,
            tag,
        } => {
            let mut tap = FolderTap::new(path)
                .with_recursive(recursive)
                .with_try_latin1(try_latin1)
                .with_move(move_on_success)
                .with_policy(Arc::new(FixedTag(tag)));
            if let Some(name) = name {
                tap = tap.with_name(name);
            }
            Box::new(tap)
        }
        TapConfig::Pop3 {
            name,
            url,
            credential: cred,
            move_on_success,
            tag,
        } => {
            let mut tap = Pop3Tap::new(url, credential(cred))
                .with_move(move_on_success)
                .with_policy(Arc::new(FixedTag(tag)));
            if let Some(name) = name {
                tap = tap.with_name(name);
            }
            Box::new(tap)
        }
    }
}

fn build_sink(config: SinkConfig) -> Box<dyn Sink> {
    match config {
        SinkConfig::Folder {
            path,
            extension,
            report_stored,
        } => Box::new(
            FolderSink::new(path)
                .with_extension(extension)
                .with_report_stored(report_stored),
        ),
        SinkConfig::Imap {
            url,
            credential: cred,
            auto_create_folders,
            deduplicate,
            dupes_reported_as_stored,
            folder_map,
        } => Box::new(
            ImapSink::new(url, credential(cred))
                .with_auto_create_folders(auto_create_folders)
                .with_deduplicate(deduplicate)
                .with_dupes_reported_as_stored(dupes_reported_as_stored)
                .with_folder_map(folder_map),
        ),
        SinkConfig::Smtp {
            host,
            port,
            credential: cred,
            from,
            to,
        } => {
            let resolver = SecretResolver::new(cred.secret).with_cache(cred.cache_secret);
            Box::new(SmtpSink::new(host, cred.user, resolver, from, to).with_port(port))
        }
    }
}

/// Close the first `tap_count` taps and `sink_count` sinks.
fn close_started(
    taps: &mut [Box<dyn Tap>],
    tap_count: usize,
    sinks: &mut [Box<dyn Sink>],
    sink_count: usize,
) {
    for tap in taps.iter_mut().take(tap_count) {
        if let Err(e) = tap.close() {
            tracing::warn!(tap = %tap.name(), error = %e, "close failed");
        }
    }
    for sink in sinks.iter_mut().take(sink_count) {
        if let Err(e) = sink.close() {
            tracing::warn!(sink = %sink.name(), error = %e, "close failed");
        }
    }
}
