//! Node configuration, loaded from TOML.
//!
//! Every field has a default so a config file only needs the operator
//! contract address. Durations are given in milliseconds.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use opn_consensus::{InspectOverTimeConfig, InspectionServiceConfig, ReviewStrategy};
use opn_fleet::FleetStateConfig;
use opn_protocol::constants::*;
use opn_protocol::{Address, NodeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub operator_contract_address: String,
    /// Generated at startup when absent.
    pub node_id: Option<String>,
    /// Addresses advertised in heartbeats and on the operator contract.
    pub addresses: Vec<String>,
    pub heartbeat_update_interval_ms: u64,
    /// How long to wait for a fleet to become ready before giving up on it.
    pub heartbeat_timeout_ms: u64,
    pub fleet_state: FleetStateSection,
    pub announce_node_to_contract: AnnounceSection,
    pub inspect_random_node: InspectRandomNodeSection,
    pub review_suspect_node: ReviewSuspectNodeSection,
    pub local: LocalSection,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            operator_contract_address: String::new(),
            node_id: None,
            addresses: Vec::new(),
            heartbeat_update_interval_ms: DEFAULT_HEARTBEAT_UPDATE_INTERVAL_MS,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            fleet_state: FleetStateSection::default(),
            announce_node_to_contract: AnnounceSection::default(),
            inspect_random_node: InspectRandomNodeSection::default(),
            review_suspect_node: ReviewSuspectNodeSection::default(),
            local: LocalSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetStateSection {
    pub prune_age_ms: u64,
    pub prune_interval_ms: u64,
    pub latency_extra_ms: u64,
    pub warmup_period_ms: u64,
}

impl Default for FleetStateSection {
    fn default() -> Self {
        Self {
            prune_age_ms: DEFAULT_PRUNE_AGE_MS,
            prune_interval_ms: DEFAULT_PRUNE_INTERVAL_MS,
            latency_extra_ms: DEFAULT_LATENCY_EXTRA_MS,
            warmup_period_ms: DEFAULT_WARMUP_PERIOD_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnounceSection {
    pub poll_interval_ms: u64,
    /// Minimum age of the on-chain heartbeat before it is rewritten.
    pub write_interval_ms: u64,
}

impl Default for AnnounceSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_ANNOUNCE_POLL_INTERVAL_MS,
            write_interval_ms: DEFAULT_ANNOUNCE_WRITE_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectRandomNodeSection {
    pub enabled: bool,
    pub interval_ms: u64,
    pub max_inspections: u32,
    pub inspection_interval_ms: u64,
    pub max_delay_before_first_inspection_ms: u64,
}

impl Default for InspectRandomNodeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_INSPECT_RANDOM_NODE_INTERVAL_MS,
            max_inspections: DEFAULT_MAX_INSPECTION_COUNT,
            inspection_interval_ms: DEFAULT_INSPECTION_INTERVAL_MS,
            max_delay_before_first_inspection_ms: DEFAULT_MAX_DELAY_BEFORE_FIRST_INSPECTION_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewSuspectNodeSection {
    pub enabled: bool,
    pub strategy: ReviewStrategy,
    pub max_inspections: u32,
    pub inspection_interval_ms: u64,
    pub max_delay_before_first_inspection_ms: u64,
}

impl Default for ReviewSuspectNodeSection {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: ReviewStrategy::default(),
            max_inspections: DEFAULT_MAX_INSPECTION_COUNT,
            inspection_interval_ms: DEFAULT_INSPECTION_INTERVAL_MS,
            max_delay_before_first_inspection_ms: DEFAULT_MAX_DELAY_BEFORE_FIRST_INSPECTION_MS,
        }
    }
}

/// In-process chain and network used by `operator-node run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSection {
    pub redundancy_factor: u32,
    /// Answer given by the simulated network probe.
    pub probe_result: bool,
    pub sponsorships: Vec<LocalSponsorship>,
}

impl Default for LocalSection {
    fn default() -> Self {
        Self { redundancy_factor: 1, probe_result: true, sponsorships: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSponsorship {
    pub address: String,
    pub stream_id: String,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// Staked operators besides our own.
    #[serde(default)]
    pub operators: Vec<String>,
}

fn default_partitions() -> u32 {
    1
}

impl NodeConfig {
    /// `~/.config/operator-node/config.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("operator-node").join("config.toml"))
    }

    /// Load from `path`, or from [`NodeConfig::default_path`] when `None`.
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };
        if !explicit && !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("Failed to parse config")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.operator()?;
        let intervals = [
            ("heartbeat_update_interval_ms", self.heartbeat_update_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("fleet_state.prune_age_ms", self.fleet_state.prune_age_ms),
            ("fleet_state.prune_interval_ms", self.fleet_state.prune_interval_ms),
            ("announce_node_to_contract.poll_interval_ms", self.announce_node_to_contract.poll_interval_ms),
            ("announce_node_to_contract.write_interval_ms", self.announce_node_to_contract.write_interval_ms),
            ("inspect_random_node.interval_ms", self.inspect_random_node.interval_ms),
            ("inspect_random_node.inspection_interval_ms", self.inspect_random_node.inspection_interval_ms),
            ("review_suspect_node.inspection_interval_ms", self.review_suspect_node.inspection_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        if self.inspect_random_node.max_inspections == 0 || self.review_suspect_node.max_inspections == 0 {
            bail!("max_inspections must be greater than zero");
        }
        for sponsorship in &self.local.sponsorships {
            Address::parse(&sponsorship.address)
                .with_context(|| format!("Invalid local sponsorship {}", sponsorship.address))?;
            for operator in &sponsorship.operators {
                Address::parse(operator).with_context(|| format!("Invalid local operator {operator}"))?;
            }
            if sponsorship.partitions == 0 || sponsorship.partitions > MAX_PARTITION_COUNT {
                bail!("Stream {} must have 1 to {MAX_PARTITION_COUNT} partitions", sponsorship.stream_id);
            }
        }
        Ok(())
    }

    pub fn operator(&self) -> Result<Address> {
        if self.operator_contract_address.is_empty() {
            return Err(anyhow!("operator_contract_address is not set"));
        }
        Address::parse(&self.operator_contract_address).context("Invalid operator_contract_address")
    }

    /// The configured node id, or a fresh random one.
    pub fn node_id(&self) -> NodeId {
        match &self.node_id {
            Some(id) => NodeId::new(id.clone()),
            None => NodeId::new(uuid::Uuid::new_v4().to_string()),
        }
    }

    pub fn heartbeat_update_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_update_interval_ms)
    }

    pub fn fleet_state_config(&self) -> FleetStateConfig {
        FleetStateConfig {
            prune_age: Duration::from_millis(self.fleet_state.prune_age_ms),
            prune_interval: Duration::from_millis(self.fleet_state.prune_interval_ms),
            heartbeat_interval: self.heartbeat_update_interval(),
            latency_extra: Duration::from_millis(self.fleet_state.latency_extra_ms),
            warmup_period: Duration::from_millis(self.fleet_state.warmup_period_ms),
        }
    }

    pub fn inspection_service_config(&self) -> InspectionServiceConfig {
        let section = &self.inspect_random_node;
        InspectionServiceConfig {
            interval: Duration::from_millis(section.interval_ms),
            inspection: InspectOverTimeConfig {
                heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
                max_delay_before_first_inspection: Duration::from_millis(section.max_delay_before_first_inspection_ms),
                max_inspections: section.max_inspections,
                inspection_interval: Duration::from_millis(section.inspection_interval_ms),
            },
        }
    }

    pub fn review_inspection_config(&self) -> InspectOverTimeConfig {
        let section = &self.review_suspect_node;
        InspectOverTimeConfig {
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            max_delay_before_first_inspection: Duration::from_millis(section.max_delay_before_first_inspection_ms),
            max_inspections: section.max_inspections,
            inspection_interval: Duration::from_millis(section.inspection_interval_ms),
        }
    }
}
