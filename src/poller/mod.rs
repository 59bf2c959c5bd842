//! Scheduling poller: waits for a freshly created instance to start.
//!
//! The poller sleeps for its interval, fetches the instance, and acts on the
//! reported state:
//!
//! - `Scheduling` keeps waiting.
//! - `Pulling` keeps waiting and reports template pull progress.
//! - `Started` resolves the node and returns the populated instance.
//! - Anything else is an error naming the state.
//!
//! There is no built-in deadline. The cancellation token is the only bound,
//! so an instance stuck in `Pulling` waits until the runner cancels the job.

mod observer;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::controller::{ControllerError, Transport};
use crate::instance::{Instance, InstanceRepository, InstanceState};

pub use observer::{ProgressObserver, TracingObserver};

/// Interval between polls when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Polls an instance until it is usable.
#[derive(Clone, Debug)]
pub struct SchedulingPoller<O = TracingObserver> {
    interval: Duration,
    observer: O,
}

impl Default for SchedulingPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl SchedulingPoller {
    /// Creates a poller reporting through [`TracingObserver`].
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            observer: TracingObserver,
        }
    }
}

impl<O: ProgressObserver> SchedulingPoller<O> {
    /// Replaces the progress observer.
    #[must_use]
    pub fn with_observer<P: ProgressObserver>(self, observer: P) -> SchedulingPoller<P> {
        SchedulingPoller {
            interval: self.interval,
            observer,
        }
    }

    /// Blocks until `instance_id` reaches `Started` and returns it with its
    /// node resolved.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Cancelled`] as soon as `cancel` fires,
    /// [`ControllerError::UnexpectedState`] when the instance leaves the
    /// scheduling path, and propagates lookup errors.
    pub async fn wait_until_started<T: Transport>(
        &self,
        repository: &InstanceRepository<T>,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Instance, ControllerError> {
        self.observer.waiting(instance_id);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ControllerError::Cancelled),
                () = tokio::time::sleep(self.interval) => {}
            }

            let mut instance = repository
                .get_instance(instance_id, cancel)
                .await
                .map_err(|err| err.context(format!("failed to get instance {instance_id} status")))?;
            self.observer.state_observed(instance_id, instance.state);

            match instance.state {
                InstanceState::Scheduling => {}
                InstanceState::Pulling => {
                    if let Some(fraction) = instance.progress.filter(|fraction| *fraction > 0.0) {
                        self.observer.pull_progress(instance_id, as_percent(fraction));
                    }
                }
                InstanceState::Started => {
                    let node = repository
                        .get_node(&instance.node_id, cancel)
                        .await
                        .map_err(|err| err.context(format!("failed to get node {}", instance.node_id)))?;
                    instance.node = Some(node);
                    self.observer.ready(&instance);
                    return Ok(instance);
                }
                state @ (InstanceState::Terminating
                | InstanceState::Terminated
                | InstanceState::Error
                | InstanceState::Pushing) => {
                    return Err(ControllerError::UnexpectedState {
                        instance_id: instance_id.to_owned(),
                        state,
                    });
                }
            }
        }
    }
}

#[expect(
    clippy::float_arithmetic,
    reason = "the controller reports pull progress as a fraction"
)]
fn as_percent(fraction: f64) -> f64 {
    (fraction * 100.0).clamp(0.0, 100.0)
}
