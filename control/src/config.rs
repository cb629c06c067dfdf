//! Configuration for the PORTTI controller
//!
//! Everything here is bootstrap-level: the cluster-facing knobs (sync period,
//! watched namespaces) can additionally be overridden at runtime through the
//! watched ConfigMap.

use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::annotations::parse_time;

/// Which namespaces contribute to the generated configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum NamespacePolicy {
    /// Only the `default` namespace is watched
    Default,
    /// Every namespace is watched
    All,
    /// An explicit allow-list of namespaces
    List(BTreeSet<String>),
}

impl NamespacePolicy {
    pub fn watched(&self, namespace: &str) -> bool {
        match self {
            NamespacePolicy::Default => namespace == "default",
            NamespacePolicy::All => true,
            NamespacePolicy::List(names) => names.contains(namespace),
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Name of the single ConfigMap the controller honors
    #[serde(default = "default_config_map_name")]
    pub config_map_name: String,

    /// Debounce interval between configuration generations
    #[serde(default = "default_sync_period", with = "duration_millis")]
    pub sync_period: Duration,

    /// Capacity of the fan-in event channel; producers block when it is full
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// HAProxy binary used for `-c` config checks
    #[serde(default = "default_haproxy_bin")]
    pub haproxy_bin: String,

    /// Upper bound on a single config-check invocation
    #[serde(default = "default_check_timeout", with = "duration_millis")]
    pub check_timeout: Duration,

    /// Directory holding candidate configuration files
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Directory where the certificate collaborator materializes PEM files
    #[serde(default = "default_certs_dir")]
    pub certs_dir: PathBuf,

    /// Namespace watch policy
    #[serde(default = "default_namespaces")]
    pub namespaces: NamespacePolicy,
}

fn default_config_map_name() -> String {
    "haproxy-configmap".to_string()
}

fn default_sync_period() -> Duration {
    Duration::from_secs(5)
}

fn default_channel_capacity() -> usize {
    100
}

fn default_haproxy_bin() -> String {
    "haproxy".to_string()
}

fn default_check_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_config_dir() -> PathBuf {
    env::temp_dir().join("portti")
}

fn default_certs_dir() -> PathBuf {
    PathBuf::from("/etc/haproxy/certs")
}

fn default_namespaces() -> NamespacePolicy {
    NamespacePolicy::Default
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            config_map_name: default_config_map_name(),
            sync_period: default_sync_period(),
            channel_capacity: default_channel_capacity(),
            haproxy_bin: default_haproxy_bin(),
            check_timeout: default_check_timeout(),
            config_dir: default_config_dir(),
            certs_dir: default_certs_dir(),
            namespaces: default_namespaces(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();

        if let Ok(val) = env::var("PORTTI_CONFIGMAP") {
            config.config_map_name = val;
        }

        if let Ok(val) = env::var("PORTTI_SYNC_PERIOD") {
            let millis = parse_time(&val)?;
            config.sync_period = Duration::from_millis(millis as u64);
        }

        if let Ok(val) = env::var("PORTTI_CHANNEL_CAPACITY") {
            config.channel_capacity = val.parse()?;
        }

        if let Ok(val) = env::var("PORTTI_HAPROXY_BIN") {
            config.haproxy_bin = val;
        }

        if let Ok(val) = env::var("PORTTI_CHECK_TIMEOUT") {
            let millis = parse_time(&val)?;
            config.check_timeout = Duration::from_millis(millis as u64);
        }

        if let Ok(val) = env::var("PORTTI_CONFIG_DIR") {
            config.config_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("PORTTI_CERTS_DIR") {
            config.certs_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("PORTTI_WATCH_NAMESPACES") {
            config.namespaces = parse_namespace_policy(&val);
        }

        if config.channel_capacity == 0 {
            return Err("PORTTI_CHANNEL_CAPACITY must be greater than zero".into());
        }

        Ok(config)
    }
}

fn parse_namespace_policy(val: &str) -> NamespacePolicy {
    match val.trim() {
        "" | "default" => NamespacePolicy::Default,
        "all" | "*" => NamespacePolicy::All,
        list => NamespacePolicy::List(
            list.split(',')
                .map(|ns| ns.trim().to_string())
                .filter(|ns| !ns.is_empty())
                .collect(),
        ),
    }
}
