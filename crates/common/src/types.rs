//! Inventory and account types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholder used wherever the endpoint could not supply a value
pub const NOT_AVAILABLE: &str = "N/A";

/// A named network segment on a host's virtual switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortGroup {
    pub name: String,
    pub vlan_id: i32,
    /// Key of the owning vswitch
    pub vswitch: String,
}

/// Bare reference to a VM by managed-object id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRef {
    pub id: String,
}

/// Per-host entry of the inventory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub nets: Vec<PortGroup>,
    pub vms: Vec<VmRef>,
}

impl HostEntry {
    pub fn contains_vm(&self, vm_id: &str) -> bool {
        self.vms.iter().any(|vm| vm.id == vm_id)
    }
}

/// Host name -> entry, ordered by name
pub type HostMap = BTreeMap<String, HostEntry>;

/// Network assignment of one VM NIC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmNic {
    pub port_group: String,
    pub mac_address: String,
    pub ip_address: String,
}

/// A running VM as published by the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    /// Managed-object id
    pub vm_id: String,
    /// BIOS uuid, used to address reconfiguration
    pub uuid: String,
    pub vm_name: String,
    pub vm_guest: String,
    /// NIC ordinal ("0", "1", ...) -> assignment
    pub vm_network: BTreeMap<String, VmNic>,
    /// Name of the host running this VM, if any host lists it
    pub host: Option<String>,
}

/// vCenter account used to open endpoint sessions
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub vcenter: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        vcenter: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            vcenter: vcenter.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("vcenter", &self.vcenter)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Account details safe to hand back to a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub vcenter: String,
    pub username: String,
    /// Always empty; kept so existing clients find the field
    pub password: String,
    pub password_set: bool,
    pub message: String,
}

impl AccountInfo {
    pub fn from_credentials(creds: Option<&Credentials>) -> Self {
        match creds {
            Some(c) => Self {
                vcenter: c.vcenter.clone(),
                username: c.username.clone(),
                password: String::new(),
                password_set: !c.password.is_empty(),
                message: "loaded current account info".to_string(),
            },
            None => Self {
                vcenter: String::new(),
                username: String::new(),
                password: String::new(),
                password_set: false,
                message: "no existing account info".to_string(),
            },
        }
    }
}
