//! `run` stage: executes a job script on the leased VM.

use camino::Utf8Path;
use tracing::info;

use super::{Lifecycle, StageError};
use crate::controller::Transport;
use crate::fs;
use crate::instance::SSH_GUEST_PORT;
use crate::poller::ProgressObserver;
use crate::remote_shell::RemoteShell;

impl<T: Transport, S: RemoteShell, O: ProgressObserver> Lifecycle<T, S, O> {
    /// Streams `script` to the job's VM over SSH.
    ///
    /// `stage` is the runner's name for the script and is only logged.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::BuildFailed`] when the script exits non-zero,
    /// [`StageError::MissingSshPort`] when the VM has no SSH forwarding, and
    /// propagates lookup, file and remote-shell errors.
    pub async fn run(&self, script: &Utf8Path, stage: &str) -> Result<(), StageError> {
        let file = fs::open(script)
            .map_err(|err| StageError::Script {
                path: script.to_string(),
                message: err.to_string(),
            })?
            .into_std();
        let external_id = self.job.external_id()?;

        let instance = self
            .repository
            .get_instance_by_external_id(external_id, &self.cancel)
            .await?;
        let port = instance
            .vm_info
            .as_ref()
            .and_then(|vm| vm.forwarded_tcp_port(SSH_GUEST_PORT))
            .ok_or_else(|| StageError::MissingSshPort {
                instance_id: instance.id.clone(),
                guest_port: SSH_GUEST_PORT,
            })?;
        let node = self
            .repository
            .get_node(&instance.node_id, &self.cancel)
            .await?;

        let target = self.config.shell_target(&node.ip, port);
        info!(
            stage,
            instance_id = %instance.id,
            host = %target.host,
            port,
            "running job script"
        );
        let code = self.shell.execute(&target, file, &self.cancel).await?;
        if code != 0 {
            return Err(StageError::BuildFailed { code });
        }
        Ok(())
    }
}
