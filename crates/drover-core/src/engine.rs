//! The retry scheduler
//!
//! One instruction is in flight at a time. Each tick reloads the queue
//! from the durable store, so a process killed by a navigation resumes
//! exactly where it left off: completion is persisted *before* any
//! navigation side effect fires, which is what makes every step
//! exactly-once across process boundaries.
//!
//! A step's attempt produces one of five outcomes:
//!
//! - `Done`: mark complete, persist, settle, move on (annotation
//!   steps skip the settle and fall straight through)
//! - `Retry`: bump the attempt counter, persist, short delay, re-run
//! - `Halted`: the handler already persisted its own state and fired a
//!   navigation that may kill the process; just settle
//! - `Block`: hold the run until an operator signals resume
//! - `Fail`: discard the queue and end the run with an error
//!
//! Budget enforcement happens *before* dispatch: an instruction that
//! has already burned its full allowance fails the run rather than
//! attempting again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::adapter::{Handle, PageAdapter};
use crate::error::{Result, RunError};
use crate::script::{parse_script, InstructionKind, Queue, Target};
use crate::store::Store;

/// Runtime knobs for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum attempts per instruction before the run fails
    pub default_tries: u32,
    /// Pause after a completed step
    pub settle_delay: Duration,
    /// Pause before re-attempting a not-yet-ready step
    pub retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_tries: 15,
            settle_delay: Duration::from_millis(650),
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// What one attempt at one instruction produced.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    /// The step completed; the loop marks it done and persists.
    Done,
    /// Not ready yet; the loop bumps the attempt counter and persists.
    Retry,
    /// The handler persisted its own state and fired a side effect that
    /// may kill the process; the loop only settles.
    Halted,
    /// Hold until an operator signals resume, then complete the step.
    Block { message: String },
    /// Fatal; the queue is discarded and the run errors out.
    Fail(RunError),
}

/// Observable run state, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EngineStatus {
    #[default]
    Idle,
    Running {
        step: String,
    },
    Blocked {
        message: String,
    },
    Completed,
    Failed {
        error: String,
    },
}

/// The instruction executor.
///
/// Holds no queue state of its own: every tick reads the store, so an
/// `Engine` can be dropped and rebuilt around the same store at any
/// point without losing ground.
pub struct Engine {
    store: Arc<dyn Store>,
    adapter: Arc<dyn PageAdapter>,
    config: EngineConfig,
    status_tx: watch::Sender<EngineStatus>,
    resume_signal: Notify,
}

impl Engine {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, adapter: Arc<dyn PageAdapter>, config: EngineConfig) -> Self {
        let (status_tx, _) = watch::channel(EngineStatus::Idle);
        Self {
            store,
            adapter,
            config,
            status_tx,
            resume_signal: Notify::new(),
        }
    }

    /// Effective runtime configuration.
    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Watch run-state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    /// Current run state.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        self.status_tx.borrow().clone()
    }

    /// Parse a script and persist it as the new queue.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be persisted.
    pub async fn submit(&self, script: &str) -> Result<()> {
        let queue = parse_script(script);
        self.store.save_queue(&queue).await
    }

    /// Soft-stop: mark every instruction done. The next tick observes
    /// nothing pending and ends the run cleanly.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be persisted.
    pub async fn pause(&self) -> Result<()> {
        let mut queue = self.store.load_queue().await?;
        queue.mark_all_done();
        self.store.save_queue(&queue).await?;
        info!("run paused; all steps marked done");
        // A blocked intervention also holds on the resume signal.
        self.resume_signal.notify_one();
        Ok(())
    }

    /// Reset every instruction for a fresh run of the same queue.
    ///
    /// # Errors
    /// Returns an error if the queue cannot be persisted.
    pub async fn restart(&self) -> Result<()> {
        let mut queue = self.store.load_queue().await?;
        queue.reset_all();
        self.store.save_queue(&queue).await
    }

    /// Operator signal that a blocked intervention may proceed. The
    /// permit is stored, so signalling before the engine blocks still
    /// releases it.
    pub fn resume(&self) {
        self.resume_signal.notify_one();
    }

    /// Drive the persisted queue to completion.
    ///
    /// Returns `Ok(())` when every step is done (or the queue was
    /// paused). On a fatal step the queue is discarded and the error
    /// returned, so a stale queue never haunts the next session.
    ///
    /// # Errors
    /// Returns storage errors, and [`RunError`] wrapped in
    /// [`crate::Error::Run`] for fatal steps.
    pub async fn run(&self) -> Result<()> {
        loop {
            let mut queue = self.store.load_queue().await?;
            let Some(idx) = queue.next_pending() else {
                self.store.clear_queue().await?;
                self.status_tx.send_replace(EngineStatus::Completed);
                info!("run complete");
                return Ok(());
            };

            let instruction = queue.items[idx].clone();
            if instruction.attempts >= self.config.default_tries {
                let location = location_label(&queue, idx);
                warn!(
                    step = %instruction.raw,
                    attempts = instruction.attempts,
                    "attempt budget exhausted"
                );
                return self
                    .fail(RunError::BudgetExhausted {
                        raw: instruction.raw,
                        location,
                    })
                    .await;
            }

            self.status_tx.send_replace(EngineStatus::Running {
                step: instruction.raw.clone(),
            });
            debug!(step = %instruction.raw, attempt = instruction.attempts + 1, "executing step");

            match self.dispatch(&mut queue, idx).await? {
                Outcome::Done => {
                    queue.items[idx].done = true;
                    self.store.save_queue(&queue).await?;
                    // Annotations complete on the same tick; only steps
                    // that touched the page get a settle pause.
                    if !matches!(
                        instruction.kind,
                        InstructionKind::Name { .. } | InstructionKind::Comment
                    ) {
                        tokio::time::sleep(self.config.settle_delay).await;
                    }
                }
                Outcome::Halted => {
                    // The handler persisted queue state itself before
                    // firing the navigation.
                    tokio::time::sleep(self.config.settle_delay).await;
                }
                Outcome::Retry => {
                    queue.items[idx].attempts += 1;
                    self.store.save_queue(&queue).await?;
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Outcome::Block { message } => {
                    warn!(step = %instruction.raw, %message, "intervention required");
                    self.status_tx
                        .send_replace(EngineStatus::Blocked { message });
                    self.resume_signal.notified().await;
                    info!(step = %instruction.raw, "intervention resolved");
                    // pause() may have rewritten the queue while we
                    // were blocked; reload before completing the step.
                    let mut queue = self.store.load_queue().await?;
                    if let Some(item) = queue.items.get_mut(idx) {
                        item.done = true;
                    }
                    self.store.save_queue(&queue).await?;
                    tokio::time::sleep(self.config.settle_delay).await;
                }
                Outcome::Fail(error) => {
                    return self.fail(error).await;
                }
            }
        }
    }

    async fn fail(&self, error: RunError) -> Result<()> {
        self.store.clear_queue().await?;
        self.status_tx.send_replace(EngineStatus::Failed {
            error: error.to_string(),
        });
        Err(error.into())
    }

    /// Execute one attempt of the instruction at `idx`.
    ///
    /// Handlers that navigate persist the queue themselves first and
    /// return `Halted`; everything else leaves persistence to the loop.
    async fn dispatch(&self, queue: &mut Queue, idx: usize) -> Result<Outcome> {
        let instruction = queue.items[idx].clone();
        let outcome = match &instruction.kind {
            InstructionKind::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Outcome::Done
            }

            InstructionKind::Click { target } => match self.usable(target) {
                Some(handle) => {
                    self.adapter.click(handle);
                    Outcome::Done
                }
                None => Outcome::Retry,
            },

            InstructionKind::Type { text, target } | InstructionKind::Choose { text, target } => {
                let handle = match target {
                    Some(target) => self.usable(target),
                    None => self.adapter.focused(),
                };
                match handle {
                    Some(handle) if !self.adapter.is_disabled(handle) => {
                        if self.adapter.set_value(handle, text) {
                            Outcome::Done
                        } else {
                            // Target rejected the value (e.g. a select
                            // without that option yet).
                            Outcome::Retry
                        }
                    }
                    _ => Outcome::Retry,
                }
            }

            InstructionKind::Find { target } => match self.visible(target) {
                Some(_) => Outcome::Done,
                None => Outcome::Retry,
            },

            InstructionKind::DontFind { target } => match self.visible(target) {
                Some(_) => Outcome::Retry,
                None => Outcome::Done,
            },

            InstructionKind::Reload => {
                self.complete_and_save(queue, idx).await?;
                self.adapter.reload();
                Outcome::Halted
            }

            InstructionKind::Visit { href } => {
                self.complete_and_save(queue, idx).await?;
                self.adapter.navigate(href);
                Outcome::Halted
            }

            InstructionKind::Goto { href } => {
                if self.adapter.current_path() == *href {
                    Outcome::Done
                } else {
                    // Persist the burned attempt before navigating; the
                    // navigation may kill the process.
                    queue.items[idx].attempts += 1;
                    self.store.save_queue(queue).await?;
                    self.adapter.navigate(href);
                    Outcome::Halted
                }
            }

            InstructionKind::ClearStorage => self.clear_and_reload(queue, idx, true, false).await?,
            InstructionKind::ClearCookies => {
                self.clear_and_reload(queue, idx, false, true).await?
            }
            InstructionKind::ClearAll => self.clear_and_reload(queue, idx, true, true).await?,

            InstructionKind::Resize { width, height } => {
                self.adapter.resize(*width, *height);
                Outcome::Done
            }

            InstructionKind::Name { .. } | InstructionKind::Comment => Outcome::Done,

            InstructionKind::Test => match self.adapter.fetch_script() {
                Ok(text) => {
                    *queue = parse_script(&text);
                    self.store.save_queue(queue).await?;
                    info!(steps = queue.items.len(), "fetched remote script");
                    Outcome::Halted
                }
                Err(crate::Error::Run(error)) => Outcome::Fail(error),
                Err(other) => return Err(other),
            },

            InstructionKind::Intervention { message } => Outcome::Block {
                message: message.clone(),
            },

            InstructionKind::Unknown => Outcome::Fail(RunError::UnknownCommand {
                raw: instruction.raw.clone(),
            }),
        };
        Ok(outcome)
    }

    /// Query a target and keep only a visible, enabled hit.
    fn usable(&self, target: &Target) -> Option<Handle> {
        let handle = self.visible(target)?;
        if self.adapter.is_disabled(handle) {
            return None;
        }
        Some(handle)
    }

    /// Query a target and keep only a visible hit.
    fn visible(&self, target: &Target) -> Option<Handle> {
        let handle = self
            .adapter
            .query(&target.selector, target.content.as_deref())?;
        if self.adapter.is_visible(handle) {
            Some(handle)
        } else {
            None
        }
    }

    async fn complete_and_save(&self, queue: &mut Queue, idx: usize) -> Result<()> {
        queue.items[idx].done = true;
        self.store.save_queue(queue).await
    }

    /// Shared body of the `clear` family: snapshot the draft, mark the
    /// step done, wipe, restore the draft around the storage wipe, then
    /// reload.
    async fn clear_and_reload(
        &self,
        queue: &mut Queue,
        idx: usize,
        storage: bool,
        cookies: bool,
    ) -> Result<Outcome> {
        let draft = self.store.load_draft().await?;
        queue.items[idx].done = true;
        if storage {
            self.adapter.clear_storage();
        }
        if cookies {
            self.adapter.clear_cookies();
        }
        self.store.save_queue(queue).await?;
        if storage {
            // Raw write: the queue above is still active, so the
            // guarded save would drop the restore on the floor.
            self.store.write_draft(&draft).await?;
        }
        self.adapter.reload();
        Ok(Outcome::Halted)
    }
}

/// Derive a location label for a failure at `idx`: the nearest
/// preceding `name` step, plus the 1-based distance from it.
fn location_label(queue: &Queue, idx: usize) -> Option<String> {
    queue.items[..idx]
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, item)| match &item.kind {
            InstructionKind::Name { label } => Some(format!("{label} line {}", idx - i)),
            _ => None,
        })
}
