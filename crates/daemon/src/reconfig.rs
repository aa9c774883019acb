//! NIC reassignment
//!
//! Moves a VM's first ethernet card onto a standard network and waits for the
//! endpoint task to finish.

use crate::vsphere::{MoRef, ReconfigureBackend, TaskState};
use portgroup_common::{Error, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Concrete `VirtualEthernetCard` subtypes
const ETHERNET_CARD_TYPES: &[&str] = &[
    "VirtualEthernetCard",
    "VirtualE1000",
    "VirtualE1000e",
    "VirtualPCNet32",
    "VirtualVmxnet",
    "VirtualVmxnet2",
    "VirtualVmxnet3",
    "VirtualVmxnet3Vrdma",
    "VirtualSriovEthernetCard",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Success,
    Error,
}

/// Terminal status of a reassignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub outcome: TaskOutcome,
    pub message: String,
    /// Endpoint task id, when a task was submitted
    pub task: Option<String>,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.outcome == TaskOutcome::Success
    }
}

pub fn is_ethernet_card(device: &Value) -> bool {
    device
        .get("_typeName")
        .and_then(Value::as_str)
        .is_some_and(|t| ETHERNET_CARD_TYPES.contains(&t))
}

/// Copy of `device` with its backing pointed at `network`
pub fn rebacked_device(device: &Value, portgroup: &str, network: &MoRef) -> Value {
    let mut device = device.clone();
    let connected = device
        .pointer("/connectable/connected")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if let Some(obj) = device.as_object_mut() {
        obj.insert(
            "backing".into(),
            json!({
                "_typeName": "VirtualEthernetCardNetworkBackingInfo",
                "deviceName": portgroup,
                "network": network,
            }),
        );
        obj.insert(
            "connectable".into(),
            json!({
                "_typeName": "VirtualDeviceConnectInfo",
                "startConnected": true,
                "allowGuestControl": true,
                "connected": connected,
            }),
        );
        obj.insert("wakeOnLanEnabled".into(), Value::Bool(true));
    }
    device
}

pub fn edit_spec(device: Value) -> Value {
    json!({
        "_typeName": "VirtualMachineConfigSpec",
        "deviceChange": [{
            "_typeName": "VirtualDeviceConfigSpec",
            "operation": "edit",
            "device": device,
        }],
    })
}

#[derive(Debug, Clone)]
pub struct ReconfigExecutor {
    poll_interval: Duration,
    timeout: Duration,
}

impl ReconfigExecutor {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// Point the first ethernet card of VM `uuid` at `portgroup`.
    ///
    /// A VM without ethernet cards gets no change and reports success.
    pub async fn reassign_nic<B>(&self, backend: &B, uuid: &str, portgroup: &str) -> Result<TaskResult>
    where
        B: ReconfigureBackend + ?Sized,
    {
        let vm = backend
            .find_vm_by_uuid(uuid)
            .await?
            .ok_or_else(|| Error::not_found("vm", uuid))?;
        let network = backend
            .find_network(portgroup)
            .await?
            .ok_or_else(|| Error::not_found("portgroup", portgroup))?;

        let devices = backend.vm_devices(&vm).await?;
        let Some(nic) = devices.iter().find(|d| is_ethernet_card(d)) else {
            warn!(vm = %vm.value, uuid, "VM has no network adapter, nothing to reassign");
            return Ok(TaskResult {
                outcome: TaskOutcome::Success,
                message: "OK".into(),
                task: None,
            });
        };

        let spec = edit_spec(rebacked_device(nic, portgroup, &network));
        let task = backend.reconfigure_vm(&vm, &spec).await?;
        info!(vm = %vm.value, portgroup, task = %task.value, "Submitted NIC reassignment");

        let result = self.wait_for_task(backend, &task).await?;
        if result.is_success() {
            info!(vm = %vm.value, portgroup, "NIC reassignment completed");
        } else {
            warn!(vm = %vm.value, portgroup, "NIC reassignment failed: {}", result.message);
        }
        Ok(result)
    }

    async fn wait_for_task<B>(&self, backend: &B, task: &MoRef) -> Result<TaskResult>
    where
        B: ReconfigureBackend + ?Sized,
    {
        tokio::time::timeout(self.timeout, self.poll_task(backend, task))
            .await
            .map_err(|_| Error::Timeout {
                seconds: self.timeout.as_secs(),
            })?
    }

    async fn poll_task<B>(&self, backend: &B, task: &MoRef) -> Result<TaskResult>
    where
        B: ReconfigureBackend + ?Sized,
    {
        loop {
            let info = backend.task_info(task).await?;
            debug!(task = %task.value, state = ?info.state, "Task poll");
            match info.state {
                TaskState::Success => {
                    return Ok(TaskResult {
                        outcome: TaskOutcome::Success,
                        message: "OK".into(),
                        task: Some(task.value.clone()),
                    })
                }
                TaskState::Error => {
                    return Ok(TaskResult {
                        outcome: TaskOutcome::Error,
                        message: info.error.unwrap_or_else(|| "task failed".into()),
                        task: Some(task.value.clone()),
                    })
                }
                TaskState::Queued | TaskState::Running => {
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}
