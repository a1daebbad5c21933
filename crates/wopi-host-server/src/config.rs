use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use wopi_host_core::{UnlockPolicy, UnlockedWritePolicy};

/// Configuration for the wopi-host-server.
#[derive(Parser, Debug, Clone)]
#[command(name = "wopi-host-server")]
#[command(about = "WOPI host serving documents from S3 or local storage to Collabora Online")]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "WOPI_BIND_HOST")]
    pub host: String,

    /// Port to bind to
    #[arg(long, default_value = "5000", env = "PORT")]
    pub port: u16,

    /// Storage backend holding the documents
    #[arg(long, default_value = "s3", env = "STORAGE_BACKEND")]
    pub storage_backend: StorageBackend,

    /// S3 bucket name (required with --storage-backend s3)
    #[arg(long, env = "S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// AWS region (falls back to the default provider chain)
    #[arg(long, env = "AWS_REGION")]
    pub aws_region: Option<String>,

    /// Custom S3 endpoint for S3-compatible stores (MinIO, R2, ...)
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// Use path-style addressing (needed by most S3-compatible stores)
    #[arg(long, env = "S3_FORCE_PATH_STYLE")]
    pub s3_force_path_style: bool,

    /// Base directory for the local backend
    #[arg(long, env = "LOCAL_STORAGE_DIR")]
    pub local_storage_dir: Option<PathBuf>,

    /// Access token expected on every WOPI request. Auth is disabled when unset.
    #[arg(long, env = "WOPI_ACCESS_TOKEN")]
    pub access_token: Option<String>,

    /// User id reported to the editor for authenticated callers
    #[arg(long, default_value = "user1", env = "WOPI_USER_ID")]
    pub user_id: String,

    /// Display name reported to the editor
    #[arg(long, default_value = "User1", env = "WOPI_USER_FRIENDLY_NAME")]
    pub user_friendly_name: String,

    /// Whether authenticated callers may save documents
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "WOPI_USER_CAN_WRITE")]
    pub user_can_write: bool,

    /// Owner id reported for every document
    #[arg(long, default_value = "admin", env = "WOPI_OWNER_ID")]
    pub owner_id: String,

    /// Lock lifetime in seconds
    #[arg(long, default_value = "1800", env = "WOPI_LOCK_TTL_SECS")]
    pub lock_ttl_secs: u64,

    /// Interval between expired-lock purges in seconds (0 disables the reaper)
    #[arg(long, default_value = "300", env = "WOPI_LOCK_REAP_INTERVAL_SECS")]
    pub lock_reap_interval_secs: u64,

    /// Upper bound on a single storage call in seconds (0 disables the bound)
    #[arg(long, default_value = "30", env = "WOPI_STORAGE_TIMEOUT_SECS")]
    pub storage_timeout_secs: u64,

    /// Largest accepted PutFile body in bytes
    #[arg(long, default_value = "52428800", env = "WOPI_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: usize,

    /// Response to UNLOCK on a document that is not locked
    #[arg(long, default_value = "conflict", env = "WOPI_UNLOCK_POLICY")]
    pub unlock_policy: UnlockPolicyArg,

    /// Whether PutFile needs a lock when the document is unlocked
    #[arg(long, default_value = "allow", env = "WOPI_UNLOCKED_WRITE_POLICY")]
    pub unlocked_write_policy: UnlockedWritePolicyArg,

    /// Public base URL of this host, used to build WOPISrc
    #[arg(long, default_value = "http://localhost:5000", env = "WOPI_HOST_DOMAIN")]
    pub wopi_host_domain: String,

    /// Base URL of the Collabora Online server
    #[arg(long, default_value = "http://localhost:9980", env = "COLLABORA_DOMAIN")]
    pub collabora_domain: String,
}

impl Config {
    /// Get the effective local storage directory.
    pub fn effective_local_storage_dir(&self) -> PathBuf {
        self.local_storage_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("wopi-files"))
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn storage_timeout(&self) -> Option<Duration> {
        (self.storage_timeout_secs > 0).then_some(Duration::from_secs(self.storage_timeout_secs))
    }

    pub fn lock_reap_interval(&self) -> Option<Duration> {
        (self.lock_reap_interval_secs > 0)
            .then_some(Duration::from_secs(self.lock_reap_interval_secs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StorageBackend {
    S3,
    Local,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Local => write!(f, "local"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum UnlockPolicyArg {
    Conflict,
    Succeed,
}

impl From<UnlockPolicyArg> for UnlockPolicy {
    fn from(arg: UnlockPolicyArg) -> Self {
        match arg {
            UnlockPolicyArg::Conflict => UnlockPolicy::Conflict,
            UnlockPolicyArg::Succeed => UnlockPolicy::Succeed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum UnlockedWritePolicyArg {
    Allow,
    RequireLock,
}

impl From<UnlockedWritePolicyArg> for UnlockedWritePolicy {
    fn from(arg: UnlockedWritePolicyArg) -> Self {
        match arg {
            UnlockedWritePolicyArg::Allow => UnlockedWritePolicy::Allow,
            UnlockedWritePolicyArg::RequireLock => UnlockedWritePolicy::RequireLock,
        }
    }
}
