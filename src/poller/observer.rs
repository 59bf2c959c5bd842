//! Progress reporting for the scheduling poller.

use tracing::{debug, info};

use crate::instance::{Instance, InstanceState, SSH_GUEST_PORT};

/// Receives poller progress.
pub trait ProgressObserver: Send + Sync {
    /// Called once before polling starts.
    fn waiting(&self, instance_id: &str);

    /// Called after every successful poll.
    fn state_observed(&self, instance_id: &str, state: InstanceState);

    /// Called while the template is pulled, with progress in percent.
    fn pull_progress(&self, instance_id: &str, percent: f64);

    /// Called once the instance has started and its node is known.
    fn ready(&self, instance: &Instance);
}

/// Forwards progress to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn waiting(&self, instance_id: &str) {
        info!(instance_id, "waiting for instance to be scheduled");
    }

    fn state_observed(&self, instance_id: &str, state: InstanceState) {
        info!(instance_id, %state, "instance state");
    }

    fn pull_progress(&self, instance_id: &str, percent: f64) {
        info!(instance_id, "pulling progress: {percent:.0}%");
    }

    fn ready(&self, instance: &Instance) {
        let vm_name = instance.vm_info.as_ref().map_or("", |vm| vm.name.as_str());
        let ssh_port = instance
            .vm_info
            .as_ref()
            .and_then(|vm| vm.forwarded_tcp_port(SSH_GUEST_PORT));
        let node = instance.node.as_ref();
        info!(
            instance_id = %instance.id,
            vm_name,
            node_name = node.map_or("", |n| n.name.as_str()),
            node_ip = node.map_or("", |n| n.ip.as_str()),
            "instance started"
        );
        debug!(instance_id = %instance.id, ?ssh_port, "ssh forwarding");
    }
}
