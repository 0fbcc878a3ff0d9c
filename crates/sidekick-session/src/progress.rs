//! Reference-counted progress spinner
//!
//! Every [`ProgressIndicator::start`] takes a reference; the spinner task is
//! spawned on the 0→1 transition and torn down on 1→0, so nested call sites
//! (a retrieval wrapping a tag extraction, say) share one spinner. The task is
//! stopped through a [`CancellationToken`] and clears its line before exiting.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crossterm::{
    cursor::MoveToColumn,
    queue,
    style::{Print, Stylize},
    terminal::{Clear, ClearType},
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spinner animation frames
const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Redraw cadence
pub const FRAME_INTERVAL: Duration = Duration::from_millis(80);

/// Where the spinner is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawTarget {
    Stdout,
    /// Bookkeeping only; nothing is drawn
    Hidden,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Running {
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::debug!("spinner task ended abnormally: {}", e);
        }
    }
}

#[derive(Default)]
struct Counter {
    refs: usize,
    generation: u64,
    running: Option<Running>,
    spawned: usize,
}

/// Shared progress indicator; clones refer to the same counter
#[derive(Clone)]
pub struct ProgressIndicator {
    inner: Arc<Mutex<Counter>>,
    target: DrawTarget,
    interval: Duration,
}

impl ProgressIndicator {
    pub fn new(target: DrawTarget) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Counter::default())),
            target,
            interval: FRAME_INTERVAL,
        }
    }

    pub fn hidden() -> Self {
        Self::new(DrawTarget::Hidden)
    }

    /// Take a reference, spawning the spinner if none was running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, label: impl Into<String>) -> ProgressGuard {
        let mut counter = self.inner.lock();
        counter.refs += 1;
        if counter.refs == 1 {
            let cancel = CancellationToken::new();
            let task = tokio::spawn(spin(
                self.target,
                label.into(),
                cancel.clone(),
                self.interval,
            ));
            counter.running = Some(Running { cancel, task });
            counter.spawned += 1;
        }

        ProgressGuard {
            indicator: self.clone(),
            generation: counter.generation,
            released: false,
        }
    }

    /// Number of outstanding references
    pub fn active_refs(&self) -> usize {
        self.inner.lock().refs
    }

    /// Whether the spinner task is currently alive
    pub fn is_running(&self) -> bool {
        self.inner.lock().running.is_some()
    }

    /// Force the counter to zero and wait for the spinner to clear its line.
    ///
    /// Guards taken before the shutdown become inert.
    pub async fn shutdown(&self) {
        let running = {
            let mut counter = self.inner.lock();
            counter.refs = 0;
            counter.generation += 1;
            counter.running.take()
        };
        if let Some(running) = running {
            running.stop().await;
        }
    }

    fn release(&self, generation: u64) -> Option<Running> {
        let mut counter = self.inner.lock();
        if counter.generation != generation || counter.refs == 0 {
            return None;
        }
        counter.refs -= 1;
        if counter.refs == 0 {
            counter.running.take()
        } else {
            None
        }
    }

    #[cfg(test)]
    fn spawn_count(&self) -> usize {
        self.inner.lock().spawned
    }
}

/// One reference to the progress indicator
pub struct ProgressGuard {
    indicator: ProgressIndicator,
    generation: u64,
    released: bool,
}

impl ProgressGuard {
    /// Release this reference. On the last reference, waits until the spinner
    /// has cleared its line. Repeated calls are no-ops.
    pub async fn stop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(running) = self.indicator.release(self.generation) {
            running.stop().await;
        }
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(running) = self.indicator.release(self.generation) {
            // Cannot await here; the task clears its line on its own.
            running.cancel.cancel();
        }
    }
}

async fn spin(target: DrawTarget, label: String, cancel: CancellationToken, interval: Duration) {
    if target == DrawTarget::Hidden {
        cancel.cancelled().await;
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    let mut frame = 0usize;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                draw(SPINNER_FRAMES[frame % SPINNER_FRAMES.len()], &label);
                frame = frame.wrapping_add(1);
            }
        }
    }

    clear();
}

fn draw(glyph: &str, label: &str) {
    let mut out = std::io::stdout();
    let line = format!("{} {}", glyph, label);
    let _ = queue!(
        out,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(line.dark_grey())
    );
    let _ = out.flush();
}

fn clear() {
    let mut out = std::io::stdout();
    let _ = queue!(out, MoveToColumn(0), Clear(ClearType::CurrentLine));
    let _ = out.flush();
}
