//! Property collection over container views
//!
//! Each collection is read with one container view on the root folder and
//! `RetrievePropertiesEx`, following continuation tokens. Property values may
//! come boxed as `{"_typeName": .., "_value": ..}`; [`unbox`] strips that.

use super::{HostRecord, MoRef, NetworkRecord, PropertyFetcher, RawPortGroup, VimClient, VmRecord};
use async_trait::async_trait;
use portgroup_common::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

pub const HOST_PROPERTIES: &[&str] = &[
    "name",
    "config.network.vswitch",
    "config.network.portgroup",
    "vm",
    "config.product.osType",
    "summary.overallStatus",
    "hardware.systemInfo.model",
    "hardware.systemInfo.vendor",
];

pub const NETWORK_PROPERTIES: &[&str] = &["name", "summary.name"];

pub const VM_PROPERTIES: &[&str] = &[
    "name",
    "config.uuid",
    "guest.net",
    "guest.ipAddress",
    "guest.guestState",
    "config.guestFullName",
    "network",
];

/// One object returned by the property collector
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectContent {
    pub obj: MoRef,
    #[serde(default)]
    pub prop_set: Vec<DynamicProperty>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DynamicProperty {
    pub name: String,
    #[serde(default)]
    pub val: Value,
}

#[derive(Debug, Deserialize)]
struct RetrieveResult {
    #[serde(default)]
    objects: Vec<ObjectContent>,
    #[serde(default)]
    token: Option<String>,
}

/// Strip the VI/JSON boxing of `any`-typed values
pub fn unbox(val: &Value) -> &Value {
    val.get("_value").unwrap_or(val)
}

fn str_field(val: &Value, key: &str) -> Option<String> {
    unbox(val).get(key).and_then(Value::as_str).map(str::to_string)
}

impl ObjectContent {
    fn prop(&self, name: &str) -> Option<&Value> {
        self.prop_set
            .iter()
            .find(|p| p.name == name)
            .map(|p| unbox(&p.val))
    }

    fn string(&self, name: &str) -> Option<String> {
        self.prop(name).and_then(Value::as_str).map(str::to_string)
    }

    fn array(&self, name: &str) -> &[Value] {
        self.prop(name)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

pub fn host_record(obj: &ObjectContent) -> HostRecord {
    let portgroups = obj
        .array("config.network.portgroup")
        .iter()
        .map(|pg| {
            let spec = pg.get("spec").map(unbox).unwrap_or(&Value::Null);
            RawPortGroup {
                name: str_field(spec, "name").unwrap_or_default(),
                vlan_id: spec.get("vlanId").and_then(Value::as_i64).unwrap_or(0) as i32,
                vswitch: str_field(pg, "vswitch").unwrap_or_default(),
            }
        })
        .collect();

    let vm_ids = obj
        .array("vm")
        .iter()
        .filter_map(|vm| str_field(vm, "value"))
        .collect();

    HostRecord {
        mor: obj.obj.value.clone(),
        name: obj.string("name").unwrap_or_default(),
        portgroups,
        vm_ids,
        os_type: obj.string("config.product.osType"),
        overall_status: obj.string("summary.overallStatus"),
        model: obj.string("hardware.systemInfo.model"),
        vendor: obj.string("hardware.systemInfo.vendor"),
    }
}

pub fn network_record(obj: &ObjectContent) -> NetworkRecord {
    NetworkRecord {
        mor: obj.obj.value.clone(),
        kind: obj.obj.kind.clone(),
        name: obj
            .string("name")
            .or_else(|| obj.string("summary.name"))
            .unwrap_or_default(),
    }
}

pub fn vm_record(obj: &ObjectContent) -> VmRecord {
    VmRecord {
        mor: obj.obj.value.clone(),
        uuid: obj.string("config.uuid").unwrap_or_default(),
        name: obj.string("name").unwrap_or_default(),
        guest_full_name: obj.string("config.guestFullName").unwrap_or_default(),
        guest_state: obj.string("guest.guestState").unwrap_or_default(),
        ip_address: obj.string("guest.ipAddress").filter(|ip| !ip.is_empty()),
        network_mors: obj
            .array("network")
            .iter()
            .filter_map(|net| str_field(net, "value"))
            .collect(),
        guest_macs: obj
            .array("guest.net")
            .iter()
            .map(|nic| str_field(nic, "macAddress"))
            .collect(),
    }
}

impl VimClient {
    /// Read `paths` of every `kind` object below the root folder.
    pub async fn collect(&self, kind: &str, paths: &[&str]) -> Result<Vec<ObjectContent>> {
        let content = self.content();
        let view: MoRef = self
            .post(
                &format!("ViewManager/{}/CreateContainerView", content.view_manager.value),
                &json!({
                    "container": content.root_folder,
                    "type": [kind],
                    "recursive": true,
                }),
            )
            .await?;

        let result = self.retrieve_all(&view, kind, paths).await;

        if let Err(e) = self
            .post_empty(&format!("ContainerView/{}/DestroyView", view.value))
            .await
        {
            warn!(view = %view.value, "Failed to destroy container view: {}", e);
        }

        let objects = result?;
        debug!(kind, count = objects.len(), "Collected properties");
        Ok(objects)
    }

    async fn retrieve_all(
        &self,
        view: &MoRef,
        kind: &str,
        paths: &[&str],
    ) -> Result<Vec<ObjectContent>> {
        let collector = &self.content().property_collector.value;
        let spec = json!({
            "specSet": [{
                "_typeName": "PropertyFilterSpec",
                "propSet": [{
                    "_typeName": "PropertySpec",
                    "type": kind,
                    "pathSet": paths,
                }],
                "objectSet": [{
                    "_typeName": "ObjectSpec",
                    "obj": view,
                    "skip": true,
                    "selectSet": [{
                        "_typeName": "TraversalSpec",
                        "name": "traverseEntities",
                        "type": "ContainerView",
                        "path": "view",
                        "skip": false,
                    }],
                }],
            }],
            "options": { "_typeName": "RetrieveOptions" },
        });

        let mut objects = Vec::new();
        let mut page: Option<RetrieveResult> = self
            .post(&format!("PropertyCollector/{collector}/RetrievePropertiesEx"), &spec)
            .await?;

        while let Some(result) = page.take() {
            objects.extend(result.objects);
            if let Some(token) = result.token {
                page = self
                    .post(
                        &format!("PropertyCollector/{collector}/ContinueRetrievePropertiesEx"),
                        &json!({ "token": token }),
                    )
                    .await?;
            }
        }

        Ok(objects)
    }
}

#[async_trait]
impl PropertyFetcher for VimClient {
    async fn fetch_hosts(&self) -> Result<Vec<HostRecord>> {
        let objects = self.collect("HostSystem", HOST_PROPERTIES).await?;
        Ok(objects.iter().map(host_record).collect())
    }

    async fn fetch_networks(&self) -> Result<Vec<NetworkRecord>> {
        let objects = self.collect("Network", NETWORK_PROPERTIES).await?;
        Ok(objects.iter().map(network_record).collect())
    }

    async fn fetch_vms(&self) -> Result<Vec<VmRecord>> {
        let objects = self.collect("VirtualMachine", VM_PROPERTIES).await?;
        Ok(objects.iter().map(vm_record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(value: Value) -> ObjectContent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_unbox() {
        let boxed = json!({"_typeName": "string", "_value": "running"});
        assert_eq!(unbox(&boxed), &json!("running"));
        let plain = json!("running");
        assert_eq!(unbox(&plain), &plain);
    }

    #[test]
    fn test_host_record_boxed_values() {
        let obj = object(json!({
            "obj": {"_typeName": "ManagedObjectReference", "type": "HostSystem", "value": "host-10"},
            "propSet": [
                {"name": "name", "val": {"_typeName": "string", "_value": "esx01.lab"}},
                {"name": "config.network.portgroup", "val": {
                    "_typeName": "ArrayOfHostPortGroup",
                    "_value": [{
                        "_typeName": "HostPortGroup",
                        "key": "key-vim.host.PortGroup-VM Network",
                        "vswitch": "key-vim.host.VirtualSwitch-vSwitch0",
                        "spec": {"_typeName": "HostPortGroupSpec", "name": "VM Network", "vlanId": 10, "vswitchName": "vSwitch0"}
                    }]
                }},
                {"name": "vm", "val": {
                    "_typeName": "ArrayOfManagedObjectReference",
                    "_value": [
                        {"_typeName": "ManagedObjectReference", "type": "VirtualMachine", "value": "vm-1"},
                        {"_typeName": "ManagedObjectReference", "type": "VirtualMachine", "value": "vm-2"}
                    ]
                }},
                {"name": "summary.overallStatus", "val": {"_typeName": "ManagedEntityStatus", "_value": "green"}}
            ]
        }));

        let host = host_record(&obj);
        assert_eq!(host.mor, "host-10");
        assert_eq!(host.name, "esx01.lab");
        assert_eq!(
            host.portgroups,
            vec![RawPortGroup {
                name: "VM Network".into(),
                vlan_id: 10,
                vswitch: "key-vim.host.VirtualSwitch-vSwitch0".into(),
            }]
        );
        assert_eq!(host.vm_ids, vec!["vm-1", "vm-2"]);
        assert_eq!(host.overall_status.as_deref(), Some("green"));
        assert!(host.model.is_none());
    }

    #[test]
    fn test_vm_record_plain_values_and_missing_props() {
        let obj = object(json!({
            "obj": {"type": "VirtualMachine", "value": "vm-7"},
            "propSet": [
                {"name": "name", "val": "db01"},
                {"name": "config.uuid", "val": "4211-7f"},
                {"name": "guest.guestState", "val": "running"},
                {"name": "network", "val": [{"type": "Network", "value": "network-100"}]},
                {"name": "guest.net", "val": [
                    {"_typeName": "GuestNicInfo", "macAddress": "00:50:56:01:02:03"},
                    {"_typeName": "GuestNicInfo"}
                ]}
            ]
        }));

        let vm = vm_record(&obj);
        assert_eq!(vm.mor, "vm-7");
        assert_eq!(vm.uuid, "4211-7f");
        assert_eq!(vm.guest_state, "running");
        assert_eq!(vm.guest_full_name, "");
        assert!(vm.ip_address.is_none());
        assert_eq!(vm.network_mors, vec!["network-100"]);
        assert_eq!(
            vm.guest_macs,
            vec![Some("00:50:56:01:02:03".to_string()), None]
        );
    }

    #[test]
    fn test_network_record_falls_back_to_summary_name() {
        let obj = object(json!({
            "obj": {"type": "DistributedVirtualPortgroup", "value": "dvportgroup-21"},
            "propSet": [{"name": "summary.name", "val": "dv-uplinks"}]
        }));
        let net = network_record(&obj);
        assert_eq!(net.kind, "DistributedVirtualPortgroup");
        assert_eq!(net.name, "dv-uplinks");
    }

    #[test]
    fn test_retrieve_result_tolerates_missing_fields() {
        let page: RetrieveResult = serde_json::from_value(json!({"_typeName": "RetrieveResult"})).unwrap();
        assert!(page.objects.is_empty());
        assert!(page.token.is_none());
    }
}
