//! VI/JSON HTTP client with session-based authentication.
//!
//! Talks to vCenter / ESXi via `https://{host}:{port}/sdk/vim25/{release}/...`.
//! A [`VimClient`] is one logged-in session; [`VimConnector`] creates them.

use super::{Connector, MoRef, ReconfigureBackend, TaskInfo, TaskState, VimSession};
use crate::config::VcenterConfig;
use async_trait::async_trait;
use portgroup_common::{Credentials, Error, Result};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SESSION_HEADER: &str = "vmware-api-session-id";

/// Managed objects the client needs from the service content
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceContent {
    pub root_folder: MoRef,
    pub property_collector: MoRef,
    pub view_manager: MoRef,
    pub search_index: MoRef,
    pub session_manager: MoRef,
}

/// One authenticated VI/JSON session.
pub struct VimClient {
    client: Client,
    base_url: String,
    session_id: String,
    content: ServiceContent,
    vcenter: String,
}

impl VimClient {
    /// Fetch the service content and log in.
    ///
    /// Every failure here is reported as [`Error::Connectivity`].
    pub async fn login(config: &VcenterConfig, creds: &Credentials) -> Result<Self> {
        Self::login_inner(config, creds).await.map_err(|e| match e {
            Error::Connectivity(_) => e,
            other => Error::Connectivity(format!("{}: {}", creds.vcenter, other)),
        })
    }

    async fn login_inner(config: &VcenterConfig, creds: &Credentials) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Connectivity(format!("Failed to build HTTP client: {e}")))?;

        let base_url = format!(
            "https://{}:{}/sdk/vim25/{}",
            creds.vcenter, config.port, config.api_release
        );

        let resp = client
            .get(format!("{base_url}/ServiceInstance/ServiceInstance/content"))
            .send()
            .await
            .map_err(transport)?;
        let content: ServiceContent = parse_response(check_status(resp).await?).await?;

        let resp = client
            .post(format!(
                "{}/SessionManager/{}/Login",
                base_url, content.session_manager.value
            ))
            .json(&json!({
                "userName": creds.username,
                "password": creds.password,
            }))
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Connectivity(format!(
                "Login to {} rejected ({}): {}",
                creds.vcenter,
                status.as_u16(),
                truncate(&body)
            )));
        }

        let session_id = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Connectivity(format!("Login to {} returned no session id", creds.vcenter))
            })?;

        info!(vcenter = %creds.vcenter, username = %creds.username, "Logged in to vCenter");

        Ok(Self {
            client,
            base_url,
            session_id,
            content,
            vcenter: creds.vcenter.clone(),
        })
    }

    pub fn content(&self) -> &ServiceContent {
        &self.content
    }

    // ── HTTP helpers ────────────────────────────────────────────────

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// GET a JSON response.
    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .client
            .get(self.url(path))
            .header(SESSION_HEADER, &self.session_id)
            .send()
            .await
            .map_err(transport)?;
        parse_response(check_status(resp).await?).await
    }

    /// POST a JSON body, parse the JSON response. An empty body parses as `null`.
    pub(crate) async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .client
            .post(self.url(path))
            .header(SESSION_HEADER, &self.session_id)
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        parse_response(check_status(resp).await?).await
    }

    /// POST without a body, discarding the response.
    pub(crate) async fn post_empty(&self, path: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.url(path))
            .header(SESSION_HEADER, &self.session_id)
            .send()
            .await
            .map_err(transport)?;
        check_status(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl ReconfigureBackend for VimClient {
    async fn find_vm_by_uuid(&self, uuid: &str) -> Result<Option<MoRef>> {
        let path = format!("SearchIndex/{}/FindByUuid", self.content.search_index.value);
        self.post(&path, &json!({ "uuid": uuid, "vmSearch": true }))
            .await
    }

    async fn vm_devices(&self, vm: &MoRef) -> Result<Vec<Value>> {
        let config: Value = self.get(&format!("VirtualMachine/{}/config", vm.value)).await?;
        let devices = config
            .pointer("/hardware/device")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(devices)
    }

    async fn find_network(&self, name: &str) -> Result<Option<MoRef>> {
        use super::PropertyFetcher;

        let network = self
            .fetch_networks()
            .await?
            .into_iter()
            .find(|n| n.kind == "Network" && n.name == name)
            .map(|n| MoRef::new(n.kind, n.mor));
        Ok(network)
    }

    async fn reconfigure_vm(&self, vm: &MoRef, spec: &Value) -> Result<MoRef> {
        let path = format!("VirtualMachine/{}/ReconfigVM_Task", vm.value);
        self.post(&path, &json!({ "spec": spec })).await
    }

    async fn task_info(&self, task: &MoRef) -> Result<TaskInfo> {
        #[derive(Deserialize)]
        struct RawTaskInfo {
            state: TaskState,
            #[serde(default)]
            error: Option<Value>,
        }

        let info: RawTaskInfo = self.get(&format!("Task/{}/info", task.value)).await?;
        Ok(TaskInfo {
            state: info.state,
            error: info.error.map(|fault| fault_message(&fault)),
        })
    }
}

#[async_trait]
impl VimSession for VimClient {
    async fn probe(&self) -> Result<()> {
        let path = format!(
            "SessionManager/{}/currentSession",
            self.content.session_manager.value
        );
        let session: Option<Value> = self.get(&path).await?;
        match session {
            Some(_) => Ok(()),
            None => Err(Error::Connectivity(format!(
                "Session on {} is no longer authenticated",
                self.vcenter
            ))),
        }
    }

    async fn close(&self) {
        let path = format!("SessionManager/{}/Logout", self.content.session_manager.value);
        match self.post_empty(&path).await {
            Ok(()) => debug!(vcenter = %self.vcenter, "Logged out of vCenter"),
            Err(e) => debug!(vcenter = %self.vcenter, "Logout failed: {}", e),
        }
    }
}

/// Opens [`VimClient`] sessions with the configured transport settings.
pub struct VimConnector {
    config: VcenterConfig,
}

impl VimConnector {
    pub fn new(config: VcenterConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for VimConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn VimSession>> {
        let client = VimClient::login(&self.config, credentials).await?;
        Ok(Arc::new(client))
    }
}

// ── Internal helpers ────────────────────────────────────────────────

fn transport(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Connectivity(format!("HTTP timeout: {e}"))
    } else if e.is_connect() {
        Error::Connectivity(format!("Connection failed: {e}"))
    } else {
        Error::Connectivity(format!("HTTP error: {e}"))
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED => Err(Error::Connectivity(format!(
            "Session expired or invalid: {}",
            truncate(&body)
        ))),
        _ => {
            warn!(status = status.as_u16(), "vCenter request failed");
            Err(Error::Api {
                status: status.as_u16(),
                message: fault_message_from_body(&body),
            })
        }
    }
}

async fn parse_response<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let text = resp
        .text()
        .await
        .map_err(|e| Error::Protocol(format!("Failed to read response body: {e}")))?;

    let text = if text.trim().is_empty() { "null" } else { text.as_str() };

    serde_json::from_str(text)
        .map_err(|e| Error::Protocol(format!("JSON parse error: {e}; body: {}", truncate(text))))
}

/// Human-readable text of a VI/JSON fault object.
pub(crate) fn fault_message(fault: &Value) -> String {
    if let Some(msg) = fault.get("localizedMessage").and_then(Value::as_str) {
        return msg.to_string();
    }
    let fault = fault.get("fault").unwrap_or(fault);
    let messages: Vec<&str> = fault
        .get("faultMessage")
        .and_then(Value::as_array)
        .map(|msgs| {
            msgs.iter()
                .filter_map(|m| m.get("message").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if !messages.is_empty() {
        return messages.join("; ");
    }
    fault
        .get("_typeName")
        .and_then(Value::as_str)
        .unwrap_or("unknown fault")
        .to_string()
}

fn fault_message_from_body(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(fault) => fault_message(&fault),
        Err(_) => truncate(body).to_string(),
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(500) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
