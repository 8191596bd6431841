//! Configuration management.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `CAMPUS_` prefix:
//!
//! - `CAMPUS_HOST` - Server bind address (default: 0.0.0.0)
//! - `CAMPUS_PORT` - Server port (default: 3000)
//! - `CAMPUS_BASE_DOMAIN` - Apex domain tenants live under (required)
//! - `CAMPUS_RESERVED_LABELS` - Labels that never name a tenant (default: www,api)
//! - `CAMPUS_REGISTRY_FILE` - JSON file with tenant records
//! - `CAMPUS_REGISTRY_URL` - Control-plane database URL
//! - `CAMPUS_CONNECT_TIMEOUT_MS` - Per-attempt connect deadline (default: 5000)
//! - `CAMPUS_ACQUIRE_TIMEOUT_MS` - Per-caller wait deadline (default: 10000)
//! - `CAMPUS_LOOKUP_TIMEOUT_MS` - Registry lookup deadline (default: 2000)
//! - `CAMPUS_FAILURE_BACKOFF_MS` - Retry backoff after a failed connect (default: 2000)
//! - `CAMPUS_IDLE_TIMEOUT_SECS` - Close idle tenant connections (default: 0, disabled)
//! - `CAMPUS_MAX_TENANTS` - Maximum connected tenants (default: 256)
//! - `CAMPUS_POOL_SIZE` - Pooled connections per tenant (default: 5)
//! - `CAMPUS_REGISTRY_POLL_SECS` - Registry change polling (default: 30, 0 disables)
//!
//! Exactly one of `--registry-file` and `--registry-url` must be set.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::connection::{
    CacheSettings, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_FAILURE_BACKOFF,
    DEFAULT_MAX_TENANTS, DEFAULT_POOL_SIZE,
};
use crate::tenant::{DEFAULT_LOOKUP_TIMEOUT, DEFAULT_POLL_INTERVAL};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default reserved labels, comma-separated.
pub const DEFAULT_RESERVED: &str = "www,api";

// =============================================================================
// CLI
// =============================================================================

/// Campus Tenancy - multi-tenant school backend core.
///
/// Routes each request to its school's database based on the subdomain.
#[derive(Parser, Debug, Clone)]
#[command(name = "campus-tenancy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server
    Serve(ServeConfig),

    /// Resolve one host against the registry and optionally connect to it
    Check(CheckConfig),
}

/// Where tenant records come from.
#[derive(Args, Debug, Clone)]
pub struct RegistryArgs {
    /// JSON file containing an array of tenant records.
    #[arg(long, env = "CAMPUS_REGISTRY_FILE")]
    pub registry_file: Option<PathBuf>,

    /// Control-plane database URL holding the `tenants` table.
    #[arg(long, env = "CAMPUS_REGISTRY_URL")]
    pub registry_url: Option<String>,
}

impl RegistryArgs {
    fn validate(&self) -> Result<(), String> {
        match (&self.registry_file, &self.registry_url) {
            (Some(_), Some(_)) => {
                Err("Set only one of --registry-file and --registry-url".to_string())
            }
            (None, None) => Err(
                "No tenant registry configured. \
                 Set --registry-file (CAMPUS_REGISTRY_FILE) or --registry-url (CAMPUS_REGISTRY_URL)"
                    .to_string(),
            ),
            (None, Some(url)) if url.trim().is_empty() => {
                Err("registry_url must not be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Options for `serve`.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "CAMPUS_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "CAMPUS_PORT")]
    pub port: u16,

    // =========================================================================
    // Tenant Routing
    // =========================================================================
    /// Apex domain; tenants are served from `<slug>.<base-domain>`.
    #[arg(long, env = "CAMPUS_BASE_DOMAIN")]
    pub base_domain: String,

    /// Labels under the apex that never name a tenant (comma-separated).
    #[arg(
        long,
        env = "CAMPUS_RESERVED_LABELS",
        value_delimiter = ',',
        default_value = DEFAULT_RESERVED
    )]
    pub reserved_labels: Vec<String>,

    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Seconds between registry polls for status changes (0 disables).
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs(), env = "CAMPUS_REGISTRY_POLL_SECS")]
    pub registry_poll_secs: u64,

    // =========================================================================
    // Connection Cache
    // =========================================================================
    /// Deadline for one connect attempt, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64, env = "CAMPUS_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: u64,

    /// Deadline for a request waiting on a connection, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_ACQUIRE_TIMEOUT.as_millis() as u64, env = "CAMPUS_ACQUIRE_TIMEOUT_MS")]
    pub acquire_timeout_ms: u64,

    /// Deadline for a registry lookup, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_LOOKUP_TIMEOUT.as_millis() as u64, env = "CAMPUS_LOOKUP_TIMEOUT_MS")]
    pub lookup_timeout_ms: u64,

    /// Backoff after a failed connect before a retry is allowed, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_FAILURE_BACKOFF.as_millis() as u64, env = "CAMPUS_FAILURE_BACKOFF_MS")]
    pub failure_backoff_ms: u64,

    /// Close tenant connections idle this many seconds (0 disables).
    #[arg(long, default_value_t = 0, env = "CAMPUS_IDLE_TIMEOUT_SECS")]
    pub idle_timeout_secs: u64,

    /// Maximum number of tenants with an open connection.
    #[arg(long, default_value_t = DEFAULT_MAX_TENANTS, env = "CAMPUS_MAX_TENANTS")]
    pub max_tenants: usize,

    /// Pooled connections per tenant database.
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE, env = "CAMPUS_POOL_SIZE")]
    pub pool_size: u32,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_domain.trim().is_empty() {
            return Err(
                "Base domain is required. Set --base-domain or CAMPUS_BASE_DOMAIN".to_string(),
            );
        }
        if self.base_domain.contains(['/', ':', ' ']) {
            return Err(format!(
                "base_domain must be a bare domain name, got {:?}",
                self.base_domain
            ));
        }

        self.registry.validate()?;

        if self.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms must be greater than 0".to_string());
        }
        if self.acquire_timeout_ms == 0 {
            return Err("acquire_timeout_ms must be greater than 0".to_string());
        }
        if self.lookup_timeout_ms == 0 {
            return Err("lookup_timeout_ms must be greater than 0".to_string());
        }
        if self.max_tenants == 0 {
            return Err("max_tenants must be greater than 0".to_string());
        }
        if self.pool_size == 0 {
            return Err("pool_size must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reserved labels with blanks removed.
    pub fn reserved(&self) -> impl Iterator<Item = &str> {
        self.reserved_labels
            .iter()
            .map(|label| label.trim())
            .filter(|label| !label.is_empty())
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn registry_poll_interval(&self) -> Duration {
        Duration::from_secs(self.registry_poll_secs)
    }

    /// Connection cache settings derived from the flags.
    pub fn cache_settings(&self) -> CacheSettings {
        let idle_timeout = (self.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(self.idle_timeout_secs));

        CacheSettings::default()
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
            .with_failure_backoff(Duration::from_millis(self.failure_backoff_ms))
            .with_idle_timeout(idle_timeout)
            .with_max_tenants(self.max_tenants)
    }
}

/// Options for `check`.
#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    /// Host header to resolve, e.g. `stmarys.example.com`.
    #[arg(long = "host")]
    pub tenant_host: String,

    /// Apex domain tenants live under.
    #[arg(long, env = "CAMPUS_BASE_DOMAIN")]
    pub base_domain: String,

    /// Labels under the apex that never name a tenant (comma-separated).
    #[arg(
        long,
        env = "CAMPUS_RESERVED_LABELS",
        value_delimiter = ',',
        default_value = DEFAULT_RESERVED
    )]
    pub reserved_labels: Vec<String>,

    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Also open a connection to the tenant's database.
    #[arg(long, default_value_t = false)]
    pub connect: bool,

    /// Deadline for the connection check, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64, env = "CAMPUS_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CheckConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_domain.trim().is_empty() {
            return Err("Base domain is required. Set --base-domain or CAMPUS_BASE_DOMAIN".to_string());
        }
        if self.tenant_host.trim().is_empty() {
            return Err("--host must not be empty".to_string());
        }
        self.registry.validate()
    }

    pub fn reserved(&self) -> impl Iterator<Item = &str> {
        self.reserved_labels
            .iter()
            .map(|label| label.trim())
            .filter(|label| !label.is_empty())
    }
}

// =============================================================================
// Tests
// =============================================================================
