//! Line-delimited JSON lifecycle event feed.
//!
//! Each non-blank input line is one [`LifecycleEvent`]. Lines that fail
//! to parse, including events naming a blank entity id, are logged and
//! skipped; they never reach the engine.
//!
//! The feed runs on its own OS thread with blocking reads, so a pending
//! read on stdin never holds up runtime shutdown.

use std::io::BufRead;

use fatigue_types::LifecycleEvent;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Counters for one feed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    /// Events forwarded to the engine.
    pub accepted: u64,
    /// Lines that could not be parsed.
    pub rejected: u64,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<Result<LifecycleEvent, serde_json::Error>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_str(trimmed))
}

/// Forward every event read from `reader` until end of input or until the
/// engine side hangs up, and report what was read.
///
/// Blocks the calling thread; must not run on the async runtime.
pub fn forward_events<R: BufRead>(reader: R, tx: &mpsc::Sender<LifecycleEvent>) -> FeedSummary {
    let mut summary = FeedSummary::default();

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read lifecycle input, stopping feed");
                break;
            }
        };
        match parse_line(&line) {
            None => {}
            Some(Ok(event)) => {
                debug!(?event, "Parsed lifecycle event");
                if tx.blocking_send(event).is_err() {
                    info!("Engine stopped, closing lifecycle feed");
                    break;
                }
                summary.accepted = summary.accepted.saturating_add(1);
            }
            Some(Err(e)) => {
                warn!(error = %e, line = %line, "Rejected lifecycle event");
                summary.rejected = summary.rejected.saturating_add(1);
            }
        }
    }
    summary
}
