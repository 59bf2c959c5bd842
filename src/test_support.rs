//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::io::Read;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::config::ExecutorConfig;
use crate::controller::{ControllerError, Transport, TransportFuture};
use crate::remote_shell::{RemoteShell, RemoteShellError, ShellFuture, ShellTarget};

/// Records a single call made through [`ScriptedTransport`].
#[derive(Clone, Debug, PartialEq)]
pub struct TransportCall {
    /// HTTP method name.
    pub method: &'static str,
    /// Request path.
    pub path: String,
    /// Query parameters in call order.
    pub query: Vec<(String, String)>,
    /// JSON payload for `POST` and `DELETE`.
    pub payload: Option<Value>,
}

/// Scripted controller that replays queued responses in FIFO order.
///
/// Cancelled calls fail with [`ControllerError::Cancelled`] without
/// consuming a response.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<Result<Vec<u8>, ControllerError>>>>,
    calls: Arc<Mutex<Vec<TransportCall>>>,
}

impl ScriptedTransport {
    /// Creates a transport with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful envelope wrapping `body`.
    pub fn push_body(&self, body: Value) {
        self.push_raw(
            json!({"status": "OK", "message": "", "body": body})
                .to_string()
                .into_bytes(),
        );
    }

    /// Queues raw response bytes.
    pub fn push_raw(&self, bytes: Vec<u8>) {
        self.lock_responses().push_back(Ok(bytes));
    }

    /// Queues a transport error.
    pub fn push_error(&self, err: ControllerError) {
        self.lock_responses().push_back(Err(err));
    }

    /// Queues a client-side timeout.
    pub fn push_timeout(&self) {
        self.push_error(ControllerError::Timeout {
            method: String::from("GET"),
            url: String::from("http://controller.test"),
            message: String::from("operation timed out"),
        });
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of queued responses not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock_responses().len()
    }

    fn lock_responses(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<Vec<u8>, ControllerError>>> {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn respond(
        &self,
        call: TransportCall,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ControllerError> {
        if cancel.is_cancelled() {
            return Err(ControllerError::Cancelled);
        }
        let method = call.method;
        let path = call.path.clone();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        self.lock_responses().pop_front().unwrap_or_else(|| {
            Err(ControllerError::Request {
                method: method.to_owned(),
                url: path,
                message: String::from("no scripted response available"),
            })
        })
    }
}

impl Transport for ScriptedTransport {
    fn get<'a>(
        &'a self,
        path: &'a str,
        query: &'a [(&'a str, &'a str)],
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, Vec<u8>> {
        let call = TransportCall {
            method: "GET",
            path: path.to_owned(),
            query: query
                .iter()
                .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
                .collect(),
            payload: None,
        };
        Box::pin(std::future::ready(self.respond(call, cancel)))
    }

    fn post<'a>(
        &'a self,
        path: &'a str,
        payload: &'a Value,
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, Vec<u8>> {
        let call = TransportCall {
            method: "POST",
            path: path.to_owned(),
            query: Vec::new(),
            payload: Some(payload.clone()),
        };
        Box::pin(std::future::ready(self.respond(call, cancel)))
    }

    fn delete<'a>(
        &'a self,
        path: &'a str,
        payload: &'a Value,
        cancel: &'a CancellationToken,
    ) -> TransportFuture<'a, Vec<u8>> {
        let call = TransportCall {
            method: "DELETE",
            path: path.to_owned(),
            query: Vec::new(),
            payload: Some(payload.clone()),
        };
        Box::pin(std::future::ready(self.respond(call, cancel)))
    }
}

/// Records a single script execution made through [`ScriptedShell`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShellInvocation {
    /// Host and credentials the script was sent to.
    pub target: ShellTarget,
    /// Script contents read from the handed-over file.
    pub script: String,
}

/// Remote shell double returning queued exit codes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedShell {
    exit_codes: Arc<Mutex<VecDeque<i32>>>,
    invocations: Arc<Mutex<Vec<ShellInvocation>>>,
}

impl ScriptedShell {
    /// Creates a shell with no queued exit codes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the exit status of the next execution.
    pub fn push_exit_code(&self, code: i32) {
        self.exit_codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(code);
    }

    /// Returns a snapshot of all executions recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<ShellInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(
        &self,
        target: &ShellTarget,
        mut script: std::fs::File,
        cancel: &CancellationToken,
    ) -> Result<i32, RemoteShellError> {
        if cancel.is_cancelled() {
            return Err(RemoteShellError::Cancelled);
        }
        let mut contents = String::new();
        script
            .read_to_string(&mut contents)
            .map_err(|err| RemoteShellError::Io {
                context: String::from("read script"),
                message: err.to_string(),
            })?;
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ShellInvocation {
                target: target.clone(),
                script: contents,
            });
        self.exit_codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| RemoteShellError::Spawn {
                program: String::from("scripted-shell"),
                message: String::from("no scripted exit code available"),
            })
    }
}

impl RemoteShell for ScriptedShell {
    fn execute<'a>(
        &'a self,
        target: &'a ShellTarget,
        script: std::fs::File,
        cancel: &'a CancellationToken,
    ) -> ShellFuture<'a> {
        Box::pin(std::future::ready(self.record(target, script, cancel)))
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    ///
    /// Every key in `set` and `remove` is restored when the guard drops.
    pub async fn apply(set: &[(&str, &str)], remove: &[&str]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                set.iter()
                    .map(|(key, _)| *key)
                    .chain(remove.iter().copied())
                    .all(|key| seen.insert(key))
            },
            "duplicate environment variable keys passed to EnvGuard::apply"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(set.len() + remove.len());
        for (key, value) in set {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
        }
        for key in remove {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
        }

        Self {
            previous,
            _guard: guard,
        }
    }

    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        Self::apply(pairs, &[]).await
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Builds an instance JSON object as the controller returns it.
#[must_use]
pub fn instance_json(id: &str, external_id: &str, state: &str) -> Value {
    json!({
        "instance_id": id,
        "external_id": external_id,
        "instance_state": state,
    })
}

/// Builds a started instance with SSH forwarded to `ssh_host_port`.
#[must_use]
pub fn started_instance_json(id: &str, external_id: &str, node_id: &str, ssh_host_port: u16) -> Value {
    json!({
        "instance_id": id,
        "external_id": external_id,
        "instance_state": "Started",
        "node_id": node_id,
        "vminfo": {
            "name": format!("vm-{id}"),
            "port_forwarding": [
                {"guest_port": 22, "host_port": ssh_host_port, "protocol": "tcp"}
            ]
        }
    })
}

/// Wraps instance objects the way the listing endpoint does.
#[must_use]
pub fn listing_json(instances: &[Value]) -> Value {
    Value::Array(
        instances
            .iter()
            .map(|instance| {
                json!({
                    "instance_id": instance.get("instance_id").cloned().unwrap_or(Value::Null),
                    "external_id": instance.get("external_id").cloned().unwrap_or(Value::Null),
                    "vm": instance,
                })
            })
            .collect(),
    )
}

/// Builds a node listing with a single node.
#[must_use]
pub fn node_json(id: &str, ip: &str) -> Value {
    json!([{"node_id": id, "node_name": format!("node-{id}"), "ip_address": ip}])
}

/// Builds an executor configuration with defaults and `controller_url`.
#[must_use]
pub fn executor_config(controller_url: &str) -> ExecutorConfig {
    ExecutorConfig {
        controller_url: controller_url.to_owned(),
        template_id: None,
        template_name: None,
        template_tag: None,
        node_id: None,
        node_group_id: None,
        priority: 0,
        ca_cert_path: None,
        skip_tls_verify: None,
        client_cert_path: None,
        client_cert_key_path: None,
        ssh_user_name: String::from("anka"),
        ssh_password: String::from("admin"),
        custom_http_headers: None,
        keep_alive_on_error: None,
        builds_dir: None,
        cache_dir: None,
        vm_vcpu: None,
        vm_vram_mb: None,
        request_timeout_secs: 10,
        max_idle_conns_per_host: 20,
        poll_interval_secs: 3,
        debug: None,
    }
}
