//! Dirty/clean lifecycle between edits and the display surface.
//!
//! Edits only record the latest text and bump the generation; nothing is
//! rendered until the owner asks for a pass. Several edits between passes
//! therefore collapse into one pass over the newest text.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use tracing::{debug, warn};

use crate::pipeline::{CancelToken, Cancelled, RenderMode, RenderOutput, RenderPipeline};

/// Receives every completed, current render list.
pub trait DisplaySurface {
    fn publish(&mut self, output: RenderOutput);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Clean,
    Dirty,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EditorState {
    pub raw_text: String,
    pub dirty: bool,
    /// Bumped on every edit and mode change.
    pub generation: u64,
}

struct PendingPass {
    generation: u64,
    worker: JoinHandle<Result<RenderOutput, Cancelled>>,
}

pub struct RenderScheduler<S: DisplaySurface> {
    pipeline: RenderPipeline,
    surface: S,
    state: EditorState,
    mode: RenderMode,
    latest: Arc<AtomicU64>,
    pending: Option<PendingPass>,
    passes: u64,
}

impl<S: DisplaySurface> RenderScheduler<S> {
    /// Starts dirty so the initial document is rendered before first display.
    pub fn new(pipeline: RenderPipeline, surface: S, text: impl Into<String>) -> Self {
        Self {
            pipeline,
            surface,
            state: EditorState {
                raw_text: text.into(),
                dirty: true,
                generation: 1,
            },
            mode: RenderMode::default(),
            latest: Arc::new(AtomicU64::new(1)),
            pending: None,
            passes: 0,
        }
    }

    pub fn notify_edit(&mut self, text: impl Into<String>) {
        self.state.raw_text = text.into();
        self.invalidate();
    }

    pub fn set_mode(&mut self, mode: RenderMode) {
        if mode != self.mode {
            self.mode = mode;
            self.invalidate();
        }
    }

    fn invalidate(&mut self) {
        self.state.generation += 1;
        self.state.dirty = true;
        self.latest.store(self.state.generation, Ordering::Release);
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn is_dirty(&self) -> bool {
        self.state.dirty
    }

    pub fn state(&self) -> SchedulerState {
        if self.state.dirty {
            SchedulerState::Dirty
        } else {
            SchedulerState::Clean
        }
    }

    pub fn editor_state(&self) -> &EditorState {
        &self.state
    }

    pub fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Number of passes that reached the surface.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn token(&self) -> CancelToken {
        CancelToken::new(Arc::clone(&self.latest), self.state.generation)
    }

    /// Renders the current text on the calling thread if dirty. Returns
    /// whether a render list was published.
    pub fn render_now(&mut self) -> bool {
        if !self.state.dirty {
            return false;
        }
        match self
            .pipeline
            .run(&self.state.raw_text, self.mode, &self.token())
        {
            Ok(output) => {
                self.publish(output);
                true
            }
            Err(cancelled) => {
                debug!(%cancelled, "inline pass discarded");
                false
            }
        }
    }

    /// Starts a background pass for the current text if dirty and no
    /// current pass is in flight. A pass for an older generation is
    /// detached first; it can no longer publish. Returns whether a pass
    /// was started.
    pub fn spawn_pending(&mut self) -> bool {
        if !self.state.dirty {
            return false;
        }
        if let Some(pending) = &self.pending {
            if pending.generation == self.state.generation {
                return false;
            }
            debug!(
                generation = pending.generation,
                current = self.state.generation,
                "detaching stale render pass"
            );
            self.pending = None;
        }
        let pipeline = self.pipeline.clone();
        let text = self.state.raw_text.clone();
        let mode = self.mode;
        let token = self.token();
        let generation = self.state.generation;
        let spawned = thread::Builder::new()
            .name("render-pass".to_string())
            .spawn(move || pipeline.run(&text, mode, &token));
        match spawned {
            Ok(worker) => {
                debug!(generation, "render pass started");
                self.pending = Some(PendingPass { generation, worker });
                true
            }
            Err(err) => {
                warn!(%err, "could not start render worker, rendering inline");
                self.render_now()
            }
        }
    }

    /// Collects a finished background pass. Its result is published only
    /// if no edit arrived since it started; stale results are dropped and
    /// the state stays dirty. Returns whether a render list was published.
    pub fn poll_completed(&mut self) -> bool {
        let finished = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.worker.is_finished());
        if !finished {
            return false;
        }
        let Some(pending) = self.pending.take() else {
            return false;
        };

        match pending.worker.join() {
            Ok(Ok(output)) if pending.generation == self.state.generation => {
                self.publish(output);
                true
            }
            Ok(Ok(_)) => {
                debug!(
                    generation = pending.generation,
                    current = self.state.generation,
                    "stale render pass discarded"
                );
                false
            }
            Ok(Err(cancelled)) => {
                debug!(%cancelled, "background pass discarded");
                false
            }
            Err(_) => {
                warn!(generation = pending.generation, "render worker panicked");
                false
            }
        }
    }

    fn publish(&mut self, output: RenderOutput) {
        self.state.dirty = false;
        self.passes += 1;
        self.surface.publish(output);
    }
}
