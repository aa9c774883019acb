//! Inventory reconciliation
//!
//! Joins the independently fetched host, network and VM collections into
//! one view: each host with its port groups and VM ids, and each running VM
//! with its NICs resolved to port-group names and a back-reference to its
//! host. Nothing here is cached; every call rebuilds from fresh fetches.

use crate::vsphere::{HostRecord, NetworkRecord, PropertyFetcher, VmRecord};
use portgroup_common::{
    HostEntry, HostMap, PortGroup, Result, VirtualMachine, VmNic, VmRef, NOT_AVAILABLE,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Guest state a VM must report to be published
pub const GUEST_RUNNING: &str = "running";

/// Hosts and running VMs from one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Inventory {
    pub hosts: HostMap,
    pub vms: Vec<VirtualMachine>,
}

/// Fetch all three collections and join them.
///
/// The fetches run concurrently; the first failure aborts the build and no
/// partial inventory is returned.
pub async fn build_inventory<F>(fetcher: &F) -> Result<Inventory>
where
    F: PropertyFetcher + ?Sized,
{
    let (hosts, networks, vms) = tokio::try_join!(
        fetcher.fetch_hosts(),
        fetcher.fetch_networks(),
        fetcher.fetch_vms(),
    )?;

    Ok(reconcile(hosts, &networks, vms))
}

/// Fetch hosts only, without the VM join.
pub async fn fetch_host_map<F>(fetcher: &F) -> Result<HostMap>
where
    F: PropertyFetcher + ?Sized,
{
    let hosts = fetcher.fetch_hosts().await?;
    Ok(build_host_map(hosts))
}

/// Join already fetched collections.
pub fn reconcile(
    hosts: Vec<HostRecord>,
    networks: &[NetworkRecord],
    vms: Vec<VmRecord>,
) -> Inventory {
    let hosts = build_host_map(hosts);
    let index = build_network_index(networks);
    let mut vms = build_vm_list(vms, &index);

    for vm in &mut vms {
        vm.host = lookup_host(&hosts, &vm.vm_id);
        if vm.host.is_none() {
            debug!(vm_id = %vm.vm_id, vm = %vm.vm_name, "No host lists this VM");
        }
    }

    debug!(hosts = hosts.len(), vms = vms.len(), "Inventory reconciled");
    Inventory { hosts, vms }
}

/// Host name -> port groups and VM ids. A repeated name replaces the
/// earlier entry.
pub fn build_host_map(hosts: Vec<HostRecord>) -> HostMap {
    let mut map = HostMap::new();

    for host in hosts {
        let entry = HostEntry {
            nets: host
                .portgroups
                .into_iter()
                .map(|pg| PortGroup {
                    name: pg.name,
                    vlan_id: pg.vlan_id,
                    vswitch: pg.vswitch,
                })
                .collect(),
            vms: host.vm_ids.into_iter().map(|id| VmRef { id }).collect(),
        };

        if map.insert(host.name.clone(), entry).is_some() {
            warn!(host = %host.name, mor = %host.mor, "Duplicate host name, keeping the later entry");
        }
    }

    map
}

/// Network MOR id -> network name
pub fn build_network_index(networks: &[NetworkRecord]) -> HashMap<String, String> {
    networks
        .iter()
        .map(|net| (net.mor.clone(), net.name.clone()))
        .collect()
}

/// Running VMs with NICs paired to guest MACs by position.
pub fn build_vm_list(vms: Vec<VmRecord>, networks: &HashMap<String, String>) -> Vec<VirtualMachine> {
    let total = vms.len();
    let mut out = Vec::with_capacity(total);

    for vm in vms {
        if vm.guest_state != GUEST_RUNNING {
            continue;
        }

        if vm.guest_macs.len() != vm.network_mors.len() {
            warn!(
                vm_id = %vm.mor,
                networks = vm.network_mors.len(),
                guest_nics = vm.guest_macs.len(),
                "NIC count differs from guest-reported NICs"
            );
        }

        let ip_address = vm.ip_address.unwrap_or_else(|| NOT_AVAILABLE.to_string());

        let mut vm_network = BTreeMap::new();
        for (idx, mor) in vm.network_mors.iter().enumerate() {
            let port_group = match networks.get(mor) {
                Some(name) => name.clone(),
                None => {
                    warn!(vm_id = %vm.mor, network = %mor, "Unknown network reference");
                    NOT_AVAILABLE.to_string()
                }
            };
            let mac_address = vm
                .guest_macs
                .get(idx)
                .cloned()
                .flatten()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());

            vm_network.insert(
                idx.to_string(),
                VmNic {
                    port_group,
                    mac_address,
                    ip_address: ip_address.clone(),
                },
            );
        }

        out.push(VirtualMachine {
            vm_id: vm.mor,
            uuid: vm.uuid,
            vm_name: vm.name,
            vm_guest: vm.guest_full_name,
            vm_network,
            host: None,
        });
    }

    if out.len() < total {
        debug!(skipped = total - out.len(), "Skipped VMs that are not running");
    }

    out
}

/// Name of the first host whose VM list holds `vm_id`.
pub fn lookup_host(hosts: &HostMap, vm_id: &str) -> Option<String> {
    hosts
        .iter()
        .find(|(_, entry)| entry.contains_vm(vm_id))
        .map(|(name, _)| name.clone())
}
