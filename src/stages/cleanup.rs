//! `cleanup` stage: releases the job's VM.

use tracing::info;

use super::{Lifecycle, StageError};
use crate::controller::Transport;
use crate::poller::ProgressObserver;
use crate::remote_shell::RemoteShell;

/// What `cleanup` did with the job's VM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CleanupOutcome {
    /// The VM was left running because the job failed and keep-alive is on.
    Kept,
    /// The VM with this instance id was terminated.
    Terminated(String),
}

impl<T: Transport, S: RemoteShell, O: ProgressObserver> Lifecycle<T, S, O> {
    /// Terminates the job's VM unless it is kept for debugging.
    ///
    /// # Errors
    ///
    /// Propagates lookup and termination errors.
    pub async fn cleanup(&self) -> Result<CleanupOutcome, StageError> {
        let status = self.job.status();
        if self.config.keeps_instance(status) {
            info!(
                status = status.unwrap_or_default(),
                "keeping VM alive for debugging"
            );
            return Ok(CleanupOutcome::Kept);
        }

        let external_id = self.job.external_id()?;
        let instance = self
            .repository
            .get_instance_by_external_id(external_id, &self.cancel)
            .await?;
        info!(instance_id = %instance.id, external_id, "terminating instance");
        self.repository
            .terminate_instance_with_retry(&instance.id, &self.cancel)
            .await?;
        info!(instance_id = %instance.id, "instance terminated");
        Ok(CleanupOutcome::Terminated(instance.id))
    }
}
