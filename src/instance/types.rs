//! Controller data model: instances, nodes, templates and request payloads.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Guest port the SSH daemon listens on inside every VM.
pub const SSH_GUEST_PORT: u16 = 22;

/// Lifecycle state reported by the controller.
///
/// The set is closed: an unknown state fails decoding rather than falling
/// into a catch-all.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum InstanceState {
    /// Waiting for a node to pick the instance up.
    Scheduling,
    /// The node is downloading the template.
    Pulling,
    /// The VM is running.
    Started,
    /// Shutdown requested.
    Terminating,
    /// The VM is gone.
    Terminated,
    /// The controller gave up on the instance.
    Error,
    /// The VM is being pushed back to the registry.
    Pushing,
}

impl InstanceState {
    /// Returns `true` for states an in-flight job can still use.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::Scheduling | Self::Pulling | Self::Started)
    }

    /// Returns the wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduling => "Scheduling",
            Self::Pulling => "Pulling",
            Self::Started => "Started",
            Self::Terminating => "Terminating",
            Self::Terminated => "Terminated",
            Self::Error => "Error",
            Self::Pushing => "Pushing",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A NAT rule exposing a guest port on the node.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PortForwardingRule {
    /// Port inside the VM.
    pub guest_port: u16,
    /// Port on the node.
    pub host_port: u16,
    /// Transport protocol, usually `tcp`.
    #[serde(default)]
    pub protocol: String,
}

/// Details of the running VM.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct VmInfo {
    /// VM name on the node.
    #[serde(default)]
    pub name: String,
    /// Port forwarding rules set up by the node.
    #[serde(default)]
    pub port_forwarding: Vec<PortForwardingRule>,
}

impl VmInfo {
    /// Returns the node port forwarded to `guest_port` over TCP.
    #[must_use]
    pub fn forwarded_tcp_port(&self, guest_port: u16) -> Option<u16> {
        self.port_forwarding
            .iter()
            .find(|rule| rule.guest_port == guest_port && rule.protocol.eq_ignore_ascii_case("tcp"))
            .map(|rule| rule.host_port)
    }
}

/// Physical host running instances.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Node {
    /// Node identifier.
    #[serde(default, rename = "node_id")]
    pub id: String,
    /// Optional display name.
    #[serde(default, rename = "node_name")]
    pub name: String,
    /// Address used to reach forwarded ports.
    #[serde(rename = "ip_address")]
    pub ip: String,
}

/// A leased VM.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Instance {
    /// Current lifecycle state.
    #[serde(rename = "instance_state")]
    pub state: InstanceState,
    /// Controller assigned identifier.
    #[serde(default, rename = "instance_id")]
    pub id: String,
    /// Caller supplied correlation key.
    #[serde(default)]
    pub external_id: String,
    /// Present once the VM is running.
    #[serde(default, rename = "vminfo", skip_serializing_if = "Option::is_none")]
    pub vm_info: Option<VmInfo>,
    /// Node hosting the instance; empty before scheduling.
    #[serde(default)]
    pub node_id: String,
    /// Filled in locally once the poller resolves `node_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,
    /// Template pull progress in `0.0..=1.0`; only meaningful while pulling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

/// Entry of the instance listing endpoint.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub(crate) struct InstanceWrapper {
    #[serde(default, rename = "instance_id")]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) external_id: String,
    #[serde(default, rename = "vm")]
    pub(crate) instance: Option<Instance>,
}

/// Named VM image in the registry.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Template {
    /// Template identifier accepted by the create call.
    pub id: String,
    /// Human readable name; not guaranteed unique.
    #[serde(default)]
    pub name: String,
    /// Image size in bytes.
    #[serde(default)]
    pub size: i64,
    /// CPU architecture.
    #[serde(default)]
    pub arch: String,
}

/// When a startup script runs relative to guest networking.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartupCondition {
    /// Wait until the guest network is up.
    #[default]
    WaitForNetwork,
    /// Run immediately after boot.
    NoWait,
}

/// Script executed inside the VM after boot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StartupScript {
    /// Script source; encoded as base64 on the wire.
    pub script: String,
    /// Whether the controller monitors the script's outcome.
    pub monitoring: bool,
    /// Seconds the controller waits for the script.
    pub timeout_secs: u32,
    /// When the script runs.
    pub condition: StartupCondition,
}

/// Parameters of an instance creation request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateInstanceRequest {
    /// Template to boot.
    pub template_id: String,
    /// Correlation key stored on the instance.
    pub external_id: String,
    /// Template tag; latest when empty.
    pub tag: String,
    /// Pins the instance to one node.
    pub node_id: String,
    /// Scheduling priority in `1..=10000`; `0` leaves it to the controller.
    pub priority: i32,
    /// Restricts scheduling to a node group.
    pub node_group_id: String,
    /// Optional post-boot script.
    pub startup_script: Option<StartupScript>,
    /// vCPU override.
    pub vcpu: Option<u32>,
    /// RAM override in MiB.
    pub vram_mb: Option<u32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateInstancePayload<'a> {
    vmid: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    external_id: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    tag: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    node_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<i32>,
    #[serde(skip_serializing_if = "str::is_empty")]
    group_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    startup_script: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    script_monitoring: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    script_timeout: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    startup_script_condition: Option<StartupCondition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vcpu: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vram: Option<u32>,
}

impl<'a> From<&'a CreateInstanceRequest> for CreateInstancePayload<'a> {
    fn from(request: &'a CreateInstanceRequest) -> Self {
        let script = request.startup_script.as_ref();
        Self {
            vmid: &request.template_id,
            external_id: &request.external_id,
            tag: &request.tag,
            node_id: &request.node_id,
            priority: (request.priority != 0).then_some(request.priority),
            group_id: &request.node_group_id,
            startup_script: script.map(|startup| STANDARD.encode(&startup.script)),
            script_monitoring: script.map(|startup| startup.monitoring),
            script_timeout: script.map(|startup| startup.timeout_secs),
            startup_script_condition: script.map(|startup| startup.condition),
            vcpu: request.vcpu,
            vram: request.vram_mb,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TerminateInstancePayload<'a> {
    pub(crate) id: &'a str,
}
