//! Session actor.
//!
//! One task owns a [`RecordingSession`] and applies every mutation: UI
//! commands, sensor readings and the elapsed-time tick. Whoever starts the
//! session holds the [`SessionHandle`]; screens that only display progress
//! get a [`SessionObserver`].

use crate::metrics::zones::AthleteThresholds;
use crate::recording::session::RecordingSession;
use crate::recording::types::{
    ActivityPayload, RecordingConfig, RecordingError, SessionSnapshot, SessionState,
};
use crate::recording::validation::{Preflight, ValidationIssue};
use crate::sensors::types::DeviceReading;
use crate::trainer::controller::TargetSink;
use crate::workouts::{Plan, StepChange};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

type Reply<T> = oneshot::Sender<Result<T, RecordingError>>;

enum Command {
    Start {
        plan: Option<Plan>,
        preflight: Preflight,
        acknowledge_advisories: bool,
        reply: Reply<Vec<ValidationIssue>>,
    },
    Pause(Reply<()>),
    Resume(Reply<()>),
    AdvanceStep(Reply<StepChange>),
    Finalize(Reply<ActivityPayload>),
    Submit(Reply<()>),
    Discard(Reply<()>),
}

/// Read-only view of a running session.
#[derive(Debug, Clone)]
pub struct SessionObserver {
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionObserver {
    /// Latest snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.snapshots.borrow().state
    }

    /// Wait for the next snapshot. Fails once the session task has ended.
    pub async fn changed(&mut self) -> Result<SessionSnapshot, RecordingError> {
        self.snapshots
            .changed()
            .await
            .map_err(|_| RecordingError::SessionClosed)?;
        Ok(self.snapshots.borrow_and_update().clone())
    }
}

/// Owning handle to a session actor.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    observer: SessionObserver,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawn an idle session fed by `readings`.
    ///
    /// Plan targets are forwarded to `target_sink` whenever the step changes.
    pub fn spawn(
        readings: broadcast::Receiver<DeviceReading>,
        config: RecordingConfig,
        thresholds: AthleteThresholds,
        target_sink: Option<Arc<dyn TargetSink>>,
    ) -> Self {
        let session = RecordingSession::new(config, thresholds);
        let (snapshots_tx, snapshots_rx) = watch::channel(session.snapshot());
        let (commands_tx, commands_rx) = mpsc::channel(16);

        let actor = SessionActor {
            session,
            target_sink,
            snapshots: snapshots_tx,
        };
        let task = tokio::spawn(actor.run(commands_rx, readings));

        Self {
            commands: commands_tx,
            observer: SessionObserver {
                snapshots: snapshots_rx,
            },
            task,
        }
    }

    /// A read-only observer for UI consumers.
    pub fn observer(&self) -> SessionObserver {
        self.observer.clone()
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(Reply<R>) -> Command,
    ) -> Result<R, RecordingError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| RecordingError::SessionClosed)?;
        response.await.map_err(|_| RecordingError::SessionClosed)?
    }

    /// Validate and start recording.
    pub async fn start(
        &self,
        plan: Option<Plan>,
        preflight: Preflight,
        acknowledge_advisories: bool,
    ) -> Result<Vec<ValidationIssue>, RecordingError> {
        self.request(|reply| Command::Start {
            plan,
            preflight,
            acknowledge_advisories,
            reply,
        })
        .await
    }

    pub async fn pause(&self) -> Result<(), RecordingError> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<(), RecordingError> {
        self.request(Command::Resume).await
    }

    /// Move to the next plan step.
    pub async fn advance_step(&self) -> Result<StepChange, RecordingError> {
        self.request(Command::AdvanceStep).await
    }

    /// Compute the summary and compressed streams.
    pub async fn finalize(&self) -> Result<ActivityPayload, RecordingError> {
        self.request(Command::Finalize).await
    }

    pub async fn submit(&self) -> Result<(), RecordingError> {
        self.request(Command::Submit).await
    }

    /// Discard the session; the actor stops afterwards.
    pub async fn discard(&self) -> Result<(), RecordingError> {
        self.request(Command::Discard).await
    }

    /// Stop the actor and wait for it to exit.
    pub async fn close(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            tracing::warn!("Session task ended abnormally: {}", e);
        }
    }
}

struct SessionActor {
    session: RecordingSession,
    target_sink: Option<Arc<dyn TargetSink>>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut readings: broadcast::Receiver<DeviceReading>,
    ) {
        let mut ticker = tokio::time::interval(self.session.config().tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut readings_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                reading = readings.recv(), if readings_open => match reading {
                    Ok(reading) => {
                        self.session.record(&reading);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "Session lagged behind sensors, skipped {} readings",
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Reading stream closed");
                        readings_open = false;
                    }
                },
                _ = ticker.tick() => {
                    let changes = self.session.tick(now());
                    if !changes.is_empty() {
                        self.forward_plan_target().await;
                    }
                }
            }

            self.snapshots.send_replace(self.session.snapshot());
            if self.session.state().is_terminal() {
                break;
            }
        }

        tracing::debug!(session = %self.session.session_id(), "Session task exited");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start {
                plan,
                preflight,
                acknowledge_advisories,
                reply,
            } => {
                let result = self
                    .session
                    .start(plan, &preflight, acknowledge_advisories, now());
                if result.is_ok() && self.session.plan().is_some() {
                    self.forward_plan_target().await;
                }
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                let _ = reply.send(self.session.pause(now()));
            }
            Command::Resume(reply) => {
                let _ = reply.send(self.session.resume(now()));
            }
            Command::AdvanceStep(reply) => {
                let result = self.session.advance_step();
                if result.is_ok() {
                    self.forward_plan_target().await;
                }
                let _ = reply.send(result);
            }
            Command::Finalize(reply) => {
                let _ = reply.send(self.session.finalize(now()));
            }
            Command::Submit(reply) => {
                let _ = reply.send(self.session.submit());
            }
            Command::Discard(reply) => {
                let _ = reply.send(self.session.discard());
            }
        }
    }

    /// Send the current step's trainer target to the sink.
    async fn forward_plan_target(&self) {
        let Some(sink) = self.target_sink.as_ref() else {
            return;
        };
        let target = self
            .session
            .current_step()
            .and_then(|step| step.control_value(self.session.thresholds()));

        if let Err(e) = sink.plan_target_changed(target).await {
            tracing::warn!("Failed to apply plan target: {}", e);
        }
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}
