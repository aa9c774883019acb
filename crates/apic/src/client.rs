//! Signed APIC REST client

use crate::config::ApicConfig;
use crate::signer::CertSigner;
use portgroup_common::{Error, Result};
use reqwest::{header, Client};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Objects of one class, as returned by a class query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassQuery {
    #[serde(deserialize_with = "count_from_string_or_number", default)]
    pub total_count: u64,
    #[serde(default)]
    pub imdata: Vec<Value>,
}

fn count_from_string_or_number<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("invalid totalCount {n}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid totalCount {s:?}"))),
        Value::Null => Ok(0),
        other => Err(D::Error::custom(format!("invalid totalCount {other}"))),
    }
}

pub struct ApicClient {
    http: Client,
    base_url: String,
    signer: CertSigner,
}

impl ApicClient {
    pub fn new(config: &ApicConfig, signer: CertSigner) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Connectivity(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.apic_url.trim_end_matches('/').to_string(),
            signer,
        })
    }

    /// All objects of `class`, e.g. `fvTenant`.
    pub async fn lookup_by_class(&self, class: &str) -> Result<ClassQuery> {
        if class.is_empty() || !class.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidRequest(format!("invalid class name {class:?}")));
        }

        let path = format!("/api/class/{class}.json");
        let body = self.get_signed(&path).await?;
        let result: ClassQuery = serde_json::from_value(body)
            .map_err(|e| Error::Protocol(format!("Unexpected class query reply: {e}")))?;

        debug!(class, count = result.total_count, "APIC class lookup");
        Ok(result)
    }

    async fn get_signed(&self, path: &str) -> Result<Value> {
        let cookie = self.signer.cookie("GET", path, "");
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header(header::COOKIE, cookie)
            .send()
            .await
            .map_err(|e| Error::Connectivity(format!("APIC request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Protocol(format!("Failed to read APIC reply: {e}")))?;

        if !status.is_success() {
            let message = apic_error_text(&text).unwrap_or_else(|| text.chars().take(500).collect());
            warn!(status = status.as_u16(), path, "APIC rejected request: {}", message);
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| Error::Protocol(format!("JSON parse error: {e}")))
    }
}

/// `imdata[0].error.attributes.text` of an APIC error reply
fn apic_error_text(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/imdata/0/error/attributes/text")
        .and_then(Value::as_str)
        .map(str::to_string)
}
