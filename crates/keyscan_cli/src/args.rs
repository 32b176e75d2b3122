//! Flags shared by every binary.

use std::time::Duration;

use anyhow::Context;
use clap::Args;
use keyscan_core::contract::{DEFAULT_PAGE_SIZE, DEFAULT_PARTITIONS};
use keyscan_http::{AccountServiceClient, AuthHeaders, ScanResource};

pub const DEFAULT_SERVICE_URL: &str = "http://localhost:8080/account/v2";

#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Base URL for the account service API
    #[arg(long, env = "ACCOUNT_SERVICE_URL", default_value = DEFAULT_SERVICE_URL)]
    pub url: String,
    /// Client name for authentication
    #[arg(long, env = "ACCOUNT_SERVICE_CLIENT_NAME", default_value = "test_provisioner")]
    pub client_name: String,
    /// Client secret for authentication
    #[arg(long, env = "ACCOUNT_SERVICE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,
    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

impl ConnectionArgs {
    pub fn auth(&self) -> AuthHeaders {
        let auth = AuthHeaders::new(&self.client_name);
        match &self.client_secret {
            Some(secret) => auth.with_secret(secret),
            None => auth,
        }
    }

    pub fn client(&self, resource: ScanResource) -> anyhow::Result<AccountServiceClient> {
        AccountServiceClient::new(
            &self.url,
            resource,
            &self.auth(),
            Duration::from_secs(self.timeout_secs),
        )
        .with_context(|| format!("failed to create client for {}", self.url))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Number of parallel partitions to scan
    #[arg(long, default_value_t = DEFAULT_PARTITIONS)]
    pub partitions: usize,
    /// Maximum number of results per request (1-100)
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub count: u32,
    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
    /// Emit scan lifecycle events as JSON lines on stderr
    #[arg(long)]
    pub json_events: bool,
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, short)]
    pub verbose: bool,
}
