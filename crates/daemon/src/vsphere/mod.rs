//! vSphere endpoint access
//!
//! The endpoint is consumed through three seams:
//! - [`PropertyFetcher`]: the host, network and VM property collections
//! - [`ReconfigureBackend`]: the calls a NIC reassignment needs
//! - [`Connector`]: opens a [`VimSession`] from stored credentials
//!
//! [`client::VimClient`] implements all of them over the VI/JSON API.

pub mod client;
pub mod properties;

use async_trait::async_trait;
use portgroup_common::{Credentials, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use client::{VimClient, VimConnector};

/// Managed-object reference as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoRef {
    #[serde(rename = "_typeName", default = "moref_type_name")]
    pub type_name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

fn moref_type_name() -> String {
    "ManagedObjectReference".to_string()
}

impl MoRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            type_name: moref_type_name(),
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Port group as read from a host's network config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPortGroup {
    pub name: String,
    pub vlan_id: i32,
    pub vswitch: String,
}

/// One `HostSystem` property bag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostRecord {
    pub mor: String,
    pub name: String,
    pub portgroups: Vec<RawPortGroup>,
    pub vm_ids: Vec<String>,
    pub os_type: Option<String>,
    pub overall_status: Option<String>,
    pub model: Option<String>,
    pub vendor: Option<String>,
}

/// One `Network` property bag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRecord {
    pub mor: String,
    /// Managed object type: `Network`, `DistributedVirtualPortgroup`, ...
    pub kind: String,
    pub name: String,
}

/// One `VirtualMachine` property bag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmRecord {
    pub mor: String,
    pub uuid: String,
    pub name: String,
    pub guest_full_name: String,
    pub guest_state: String,
    pub ip_address: Option<String>,
    /// MOR ids of the attached networks, in NIC order
    pub network_mors: Vec<String>,
    /// Guest-reported MACs, in NIC order; `None` where the guest gave none
    pub guest_macs: Vec<Option<String>>,
}

/// Task states reported by the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Error)
    }
}

/// Snapshot of an endpoint task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub state: TaskState,
    pub error: Option<String>,
}

/// Reads the three inventory collections
#[async_trait]
pub trait PropertyFetcher: Send + Sync {
    async fn fetch_hosts(&self) -> Result<Vec<HostRecord>>;
    async fn fetch_networks(&self) -> Result<Vec<NetworkRecord>>;
    async fn fetch_vms(&self) -> Result<Vec<VmRecord>>;
}

/// Endpoint calls used by the reconfiguration executor
#[async_trait]
pub trait ReconfigureBackend: Send + Sync {
    async fn find_vm_by_uuid(&self, uuid: &str) -> Result<Option<MoRef>>;

    /// Virtual hardware devices of a VM, untouched so they can be edited
    async fn vm_devices(&self, vm: &MoRef) -> Result<Vec<serde_json::Value>>;

    /// Standard network with exactly this name
    async fn find_network(&self, name: &str) -> Result<Option<MoRef>>;

    /// Submit a reconfiguration; returns the task
    async fn reconfigure_vm(&self, vm: &MoRef, spec: &serde_json::Value) -> Result<MoRef>;

    async fn task_info(&self, task: &MoRef) -> Result<TaskInfo>;
}

/// A logged-in endpoint session
#[async_trait]
pub trait VimSession: PropertyFetcher + ReconfigureBackend {
    /// Cheap liveness check
    async fn probe(&self) -> Result<()>;

    /// Best-effort logout
    async fn close(&self) {}
}

/// Opens endpoint sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn VimSession>>;
}
