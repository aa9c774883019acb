//! APIC plugin configuration

use clap::{ArgAction, Args};
use std::path::PathBuf;
use std::time::Duration;

/// Settings of the APIC-hosted tenant service
#[derive(Debug, Clone, Args)]
pub struct ApicConfig {
    /// HTTP listen address
    #[arg(long, env = "APIC_PLUGIN_LISTEN", default_value = "0.0.0.0:80")]
    pub listen: String,

    /// APIC base URL as seen from the app container
    #[arg(long, env = "APIC_URL", default_value = "https://172.17.0.1/")]
    pub apic_url: String,

    /// App certificate user, `<vendor>_<appId>`
    #[arg(long, env = "APIC_CERT_USER", default_value = "Cisco_VMWarePortGroupUtil2")]
    pub cert_user: String,

    /// PEM private key installed for the app
    #[arg(long, env = "APIC_KEY_FILE", default_value = "/home/app/credentials/plugin.key")]
    pub key_file: PathBuf,

    /// Skip TLS certificate verification
    #[arg(long, env = "APIC_INSECURE", default_value_t = true, action = ArgAction::Set)]
    pub insecure: bool,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

impl ApicConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
