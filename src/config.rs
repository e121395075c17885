use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};

/// TLS configuration for queue <-> resource communication.
///
/// When enabled, every RPC uses mutual TLS (mTLS):
/// - The resource agent presents its certificate and verifies the queue's
/// - The queue presents its certificate and verifies the agent's
/// - Both sides must have certificates signed by the fleet CA
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Enable TLS. If false, all other TLS settings are ignored.
    pub enabled: bool,

    /// Path to the CA certificate (PEM format).
    /// Used to verify peer certificates.
    pub ca_cert_path: Option<PathBuf>,

    /// Path to this node's certificate (PEM format).
    /// Presented to peers during TLS handshake.
    pub cert_path: Option<PathBuf>,

    /// Path to this node's private key (PEM format).
    /// Must match the certificate.
    pub key_path: Option<PathBuf>,

    /// Allow insecure connections for development/testing.
    /// When true and TLS files are missing, runs in plaintext mode with warning.
    /// When false and TLS files are missing, fails to start.
    pub allow_insecure: bool,
}

impl TlsConfig {
    /// Check if TLS is properly configured with all required files.
    pub fn is_complete(&self) -> bool {
        self.enabled
            && self.ca_cert_path.is_some()
            && self.cert_path.is_some()
            && self.key_path.is_some()
    }
}

/// Control-plane settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Address of the JSON API.
    pub api_addr: SocketAddr,
    /// How often the keeper reconciles job state with resources.
    pub keeper_interval: Duration,
    /// Upper bound for dialing a resource.
    pub connect_timeout: Duration,
    /// Upper bound for a single RPC. Pause and quit wait for the tool to
    /// exit, so this must exceed the agents' stop grace period.
    pub rpc_timeout: Duration,
    /// Resources registered at startup.
    pub resources: Vec<ResourceEntry>,
    pub hooks: HooksConfig,
    pub tls: TlsConfig,
}

/// A resource to register: `name,host:port,token` on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub name: String,
    pub address: String,
    pub auth_token: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([127, 0, 0, 1], 9443)),
            keeper_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            rpc_timeout: Duration::from_secs(60),
            resources: Vec::new(),
            hooks: HooksConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn new(api_addr: SocketAddr) -> Self {
        Self {
            api_addr,
            ..Default::default()
        }
    }

    pub fn with_keeper_interval(mut self, interval: Duration) -> Self {
        self.keeper_interval = interval;
        self
    }
}

/// Targets notified of queue events. A target starting with `http://` or
/// `https://` receives the event as a JSON POST; anything else is run as a
/// program with the JSON on stdin.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub job_create: Vec<String>,
    pub job_start: Vec<String>,
    pub job_finish: Vec<String>,
    pub resource_connect: Vec<String>,
    pub queue_reorder: Vec<String>,
    /// Upper bound for one delivery, program or POST.
    pub timeout_secs: u64,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            job_create: Vec::new(),
            job_start: Vec::new(),
            job_finish: Vec::new(),
            resource_connect: Vec::new(),
            queue_reorder: Vec::new(),
            timeout_secs: 60,
        }
    }
}

impl HooksConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }
}

/// Settings of a resource agent process.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub listen_addr: SocketAddr,
    /// Shared secret every RPC from the queue must carry.
    pub auth_token: String,
    pub tools: ToolsConfig,
    pub tls: TlsConfig,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9444)),
            auth_token: String::new(),
            tools: ToolsConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

/// Per-tool plugin configuration, read from the agent's TOML file and
/// handed to each tooler's constructor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Parent of the per-job working directories.
    pub work_dir: PathBuf,
    /// How long a paused or quit tool may take to exit before it is killed.
    pub stop_grace_secs: u64,
    /// Hardware tags this agent advertises.
    pub hardware: Vec<String>,
    pub timer: Option<TimerConfig>,
    pub hashcat: Option<HashcatConfig>,
    pub john: Option<JohnConfig>,
    pub nmap: Option<NmapConfig>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("hashfleet"),
            stop_grace_secs: 30,
            hardware: vec![
                crate::tool::REQUIREMENT_CPU.to_string(),
                crate::tool::REQUIREMENT_GPU.to_string(),
                crate::tool::REQUIREMENT_NET.to_string(),
            ],
            timer: None,
            hashcat: None,
            john: None,
            nmap: None,
        }
    }
}

impl ToolsConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub requirement: String,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            requirement: crate::tool::REQUIREMENT_CPU.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HashcatConfig {
    pub binary: PathBuf,
    #[serde(default)]
    pub version: String,
    /// Display name -> wordlist path.
    pub dictionaries: BTreeMap<String, PathBuf>,
    /// Display name -> rule file path.
    #[serde(default)]
    pub rules: BTreeMap<String, PathBuf>,
    /// Display name -> hashcat `-m` number.
    pub hash_modes: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JohnConfig {
    pub binary: PathBuf,
    #[serde(default)]
    pub version: String,
    /// Display name -> wordlist path.
    pub dictionaries: BTreeMap<String, PathBuf>,
    /// Rule section names from john.conf.
    #[serde(default)]
    pub rules: Vec<String>,
    /// `--format` values jobs may ask for. Empty accepts any.
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapConfig {
    pub binary: PathBuf,
    #[serde(default)]
    pub version: String,
    /// Display name -> `-p` port list. "Custom" lets the job supply one.
    #[serde(default)]
    pub port_rules: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Accounts accepted by the queue's API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsersConfig {
    #[serde(default)]
    pub users: BTreeMap<String, UserEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub password: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl UsersConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}
