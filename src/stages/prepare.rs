//! `prepare` stage: leases a VM for the job.

use tracing::{info, warn};

use super::{Lifecycle, StageError};
use crate::config::TemplateRef;
use crate::controller::Transport;
use crate::instance::{CreateInstanceRequest, Instance, StartupCondition, StartupScript};
use crate::poller::ProgressObserver;
use crate::remote_shell::RemoteShell;

/// Script run inside the VM at boot; gives the network time to settle.
pub const STARTUP_SCRIPT: &str = "sleep 5";

/// Seconds the controller waits for [`STARTUP_SCRIPT`].
pub const STARTUP_SCRIPT_TIMEOUT_SECS: u32 = 300;

impl<T: Transport, S: RemoteShell, O: ProgressObserver> Lifecycle<T, S, O> {
    /// Creates an instance tagged with the job's external id and waits for
    /// it to start.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Config`] when no template or job identity is
    /// configured, and propagates controller and polling errors.
    pub async fn prepare(&self) -> Result<Instance, StageError> {
        let external_id = self.job.external_id()?;
        let template_id = self.resolve_template().await?;
        let request = self.create_request(template_id, external_id);

        info!(
            template_id = %request.template_id,
            tag = %request.tag,
            external_id,
            "creating instance"
        );
        let instance_id = self
            .repository
            .create_instance(&request, &self.cancel)
            .await?;
        info!(instance_id = %instance_id, "instance created");

        let instance = self
            .poller
            .wait_until_started(&self.repository, &instance_id, &self.cancel)
            .await?;
        let node = instance.node.as_ref();
        info!(
            instance_id = %instance.id,
            vm_name = instance.vm_info.as_ref().map_or("", |vm| vm.name.as_str()),
            node = node.map_or("", |node| node.name.as_str()),
            node_ip = node.map_or("", |node| node.ip.as_str()),
            "VM is ready"
        );
        Ok(instance)
    }

    async fn resolve_template(&self) -> Result<String, StageError> {
        match self.config.template()? {
            TemplateRef::Id(id) => Ok(id),
            TemplateRef::Name(name) => {
                warn!(
                    template_name = %name,
                    "template names are not unique; the first match is used, set a template id to be explicit"
                );
                let id = self
                    .repository
                    .get_template_id_by_name(&name, &self.cancel)
                    .await?;
                info!(template_name = %name, template_id = %id, "resolved template");
                Ok(id)
            }
        }
    }

    fn create_request(&self, template_id: String, external_id: &str) -> CreateInstanceRequest {
        let owned = |value: Option<&String>| value.cloned().unwrap_or_default();
        CreateInstanceRequest {
            template_id,
            external_id: external_id.to_owned(),
            tag: owned(self.config.template_tag.as_ref()),
            node_id: owned(self.config.node_id.as_ref()),
            priority: self.config.priority,
            node_group_id: owned(self.config.node_group_id.as_ref()),
            startup_script: Some(StartupScript {
                script: STARTUP_SCRIPT.to_owned(),
                monitoring: true,
                timeout_secs: STARTUP_SCRIPT_TIMEOUT_SECS,
                condition: StartupCondition::WaitForNetwork,
            }),
            vcpu: self.config.vm_vcpu,
            vram_mb: self.config.vm_vram_mb,
        }
    }
}
