//! Hold-to-repeat adjustments.
//!
//! A held gesture issues one adjustment at once, then repeats with an
//! interval that shrinks linearly from `initial_interval` to `min_interval`
//! over `ramp`. The task checks its armed flag before every repeat, so a
//! release stops further writes without cutting off one already in flight.

use crate::sensors::transport::Transport;
use crate::trainer::controller::TrainerController;
use crate::trainer::types::{Adjustment, ControlError, ControlValue, HoldRepeatConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Interval before the next repeat after holding for `held`.
pub fn repeat_interval(config: &HoldRepeatConfig, held: Duration) -> Duration {
    if config.ramp.is_zero() || held >= config.ramp {
        return config.min_interval;
    }
    let initial = config.initial_interval.as_nanos();
    let min = config.min_interval.as_nanos().min(initial);
    let shrink = (initial - min) * held.as_nanos() / config.ramp.as_nanos();
    Duration::from_nanos((initial - shrink) as u64)
}

/// A running hold gesture.
pub struct HoldRepeater {
    armed: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl HoldRepeater {
    pub(crate) fn start<T: Transport>(
        controller: TrainerController<T>,
        adjustment: Adjustment,
        config: HoldRepeatConfig,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<Result<ControlValue, ControlError>>,
    ) {
        let armed = Arc::new(AtomicBool::new(true));
        let wake = Arc::new(Notify::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn({
            let armed = armed.clone();
            let wake = wake.clone();
            async move {
                let started = Instant::now();
                let mut repeats = 0u32;
                while armed.load(Ordering::SeqCst) {
                    let result = controller.adjust(adjustment).await;
                    if let Err(e) = &result {
                        tracing::warn!("Held adjustment failed: {}", e);
                    }
                    if tx.send(result).is_err() {
                        break;
                    }
                    repeats += 1;

                    let interval = repeat_interval(&config, started.elapsed());
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = wake.notified() => {}
                    }
                }
                tracing::debug!("Hold released after {} adjustments", repeats);
            }
        });

        (
            Self {
                armed,
                wake,
                task: Some(task),
            },
            rx,
        )
    }

    /// Stop scheduling repeats.
    pub fn release(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.wake.notify_one();
        }
    }

    /// Whether further repeats may be scheduled.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Release and wait for the repeating task to exit.
    pub async fn finish(mut self) {
        self.release();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for HoldRepeater {
    fn drop(&mut self) {
        self.armed.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }
}
