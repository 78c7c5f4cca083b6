//! CLI/env configuration for one worker process (§6.6), following the
//! teacher's `LocalConfig` pattern: typed `clap::Parser` fields, a `Debug`
//! impl that never leaks secrets, and a `#[cfg(test)] new_for_test`.
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Clone)]
pub struct Config {
    /// Path to the deploy config JSON written by the control plane
    /// (§4.8 boot step 1).
    #[clap(long, env = "CONFIG_PATH")]
    pub config_path: PathBuf,

    /// Bearer token used for control-plane callbacks (§6.3).
    #[clap(long, env = "JOB_TOKEN")]
    pub job_token: String,

    #[clap(long, default_value = "8000")]
    pub port: u16,

    #[clap(long, env = "MODEL_BAZAAR_DIR", default_value = "model_bazaar")]
    pub model_bazaar_dir: PathBuf,

    #[clap(long, env = "MODEL_BAZAAR_URL", default_value = "http://localhost:8005")]
    pub model_bazaar_url: String,

    #[clap(long, env = "MODEL_ID")]
    pub model_id: String,

    #[clap(long, env = "REPLICA_ID")]
    pub replica_id: String,

    /// `id=addr` pairs for the rest of the cluster, comma-separated.
    #[clap(long, env = "RSM_PEERS", value_delimiter = ',', default_value = "")]
    pub peers: Vec<String>,

    #[clap(long, env = "RSM_BOOTSTRAP")]
    pub bootstrap: bool,

    #[clap(long, env = "RESPONSE_CACHE_ENABLED", default_value_t = true)]
    pub response_cache_enabled: bool,

    #[clap(long, env = "LLM_PROVIDER_URL")]
    pub llm_provider_url: Option<String>,

    #[clap(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: String,

    // Cloud credential env vars, read but never interpreted further inside
    // the core per §1(d)/§6.6 — launch wiring's responsibility.
    #[clap(long, env = "AWS_ACCESS_KEY")]
    pub aws_access_key: Option<String>,
    #[clap(long, env = "AWS_ACCESS_SECRET")]
    pub aws_access_secret: Option<String>,
    #[clap(long, env = "AWS_REGION_NAME")]
    pub aws_region_name: Option<String>,
    #[clap(long, env = "AZURE_ACCOUNT_NAME")]
    pub azure_account_name: Option<String>,
    #[clap(long, env = "AZURE_ACCOUNT_KEY")]
    pub azure_account_key: Option<String>,
    #[clap(long, env = "GCP_CREDENTIALS_FILE")]
    pub gcp_credentials_file: Option<PathBuf>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("config_path", &self.config_path)
            .field("job_token", &"<redacted>")
            .field("port", &self.port)
            .field("model_bazaar_dir", &self.model_bazaar_dir)
            .field("model_bazaar_url", &self.model_bazaar_url)
            .field("model_id", &self.model_id)
            .field("replica_id", &self.replica_id)
            .field("peers", &self.peers)
            .field("bootstrap", &self.bootstrap)
            .field("response_cache_enabled", &self.response_cache_enabled)
            .field("llm_provider_url", &self.llm_provider_url)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn index_path(&self) -> PathBuf {
        self.model_bazaar_dir
            .join("models")
            .join(&self.model_id)
            .join("model")
            .join("model.ndb")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.model_bazaar_dir
            .join("models")
            .join(&self.model_id)
            .join("llm_cache")
            .join("llm_cache.ndb")
    }

    pub fn log_path(&self) -> PathBuf {
        self.model_bazaar_dir.join("logs").join(&self.model_id).join("deployment.log")
    }

    pub fn snapshot_store(&self) -> PathBuf {
        self.model_bazaar_dir.join("snapshots").join(&self.replica_id)
    }

    pub fn stable_store(&self) -> PathBuf {
        self.model_bazaar_dir
            .join("snapshots")
            .join(&self.replica_id)
            .join("raft_state.json")
    }

    /// Parses `RSM_PEERS` (`id=addr,id=addr,...`) into the map
    /// `ReplicaConfig::peers` expects.
    pub fn parsed_peers(&self) -> std::collections::BTreeMap<String, String> {
        self.peers
            .iter()
            .filter(|s| !s.is_empty())
            .filter_map(|pair| pair.split_once('='))
            .map(|(id, addr)| (id.to_string(), addr.to_string()))
            .collect()
    }

    #[cfg(test)]
    pub fn new_for_test(dir: &std::path::Path) -> Self {
        Self {
            config_path: dir.join("config.json"),
            job_token: "test-token".to_string(),
            port: 0,
            model_bazaar_dir: dir.to_path_buf(),
            model_bazaar_url: "http://127.0.0.1:1".to_string(),
            model_id: "test-model".to_string(),
            replica_id: "r1".to_string(),
            peers: vec![],
            bootstrap: true,
            response_cache_enabled: true,
            llm_provider_url: None,
            log_format: "compact".to_string(),
            aws_access_key: None,
            aws_access_secret: None,
            aws_region_name: None,
            azure_account_name: None,
            azure_account_key: None,
            gcp_credentials_file: None,
        }
    }
}
