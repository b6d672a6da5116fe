//! Configuration via Figment: compiled defaults, then a TOML file, then
//! `KEEP_`-prefixed environment overrides.
//!
//! Example: `KEEP_NODE__SIGNING_TIMEOUT_SECS=600` -> `node.signing_timeout_secs`.

use crate::foundation::{NodeError, Result};
use bitcoin::Network;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "KEEP_";

const DEFAULT_AWAITING_KEY_GENERATION_LOOKBACK_SECS: u64 = 24 * 60 * 60;
const DEFAULT_KEY_GENERATION_TIMEOUT_SECS: u64 = 150;
const DEFAULT_SIGNING_TIMEOUT_SECS: u64 = 2 * 60 * 60;
const DEFAULT_SIGNING_EVENT_CHECK_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BALANCE_MONITORING_TICK_SECS: u64 = 10 * 60;
const DEFAULT_PRE_PARAMS_POOL_SIZE: usize = 5;
const DEFAULT_PRE_PARAMS_GENERATION_TIMEOUT_SECS: u64 = 120;
const DEFAULT_MAX_FEE_PER_VBYTE: i32 = 70;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub tss: TssSection,
    pub bitcoin: BitcoinSection,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeSection {
    /// How far back the startup scan walks keeps looking for pending key
    /// generations.
    pub awaiting_key_generation_lookback_secs: u64,
    pub key_generation_timeout_secs: u64,
    /// Per-request signing deadline; upper-bounds the retry runner.
    pub signing_timeout_secs: u64,
    /// Bound on the on-chain "still awaiting this digest" check that runs
    /// inside signing-event deduplication.
    pub signing_event_check_timeout_secs: u64,
    /// Operator balance below this raises an alert (ops extension).
    pub balance_alert_threshold: Option<u64>,
    pub balance_monitoring_tick_secs: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            awaiting_key_generation_lookback_secs: DEFAULT_AWAITING_KEY_GENERATION_LOOKBACK_SECS,
            key_generation_timeout_secs: DEFAULT_KEY_GENERATION_TIMEOUT_SECS,
            signing_timeout_secs: DEFAULT_SIGNING_TIMEOUT_SECS,
            signing_event_check_timeout_secs: DEFAULT_SIGNING_EVENT_CHECK_TIMEOUT_SECS,
            balance_alert_threshold: None,
            balance_monitoring_tick_secs: DEFAULT_BALANCE_MONITORING_TICK_SECS,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TssSection {
    pub pre_params_pool_size: usize,
    pub pre_params_generation_timeout_secs: u64,
}

impl Default for TssSection {
    fn default() -> Self {
        Self {
            pre_params_pool_size: DEFAULT_PRE_PARAMS_POOL_SIZE,
            pre_params_generation_timeout_secs: DEFAULT_PRE_PARAMS_GENERATION_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BitcoinSection {
    /// Where this operator wants recovered funds sent; an extended public
    /// key in practice.
    pub beneficiary_address: String,
    pub max_fee_per_vbyte: i32,
    /// `mainnet`, `testnet`, `signet` or `regtest`.
    pub network: String,
}

impl Default for BitcoinSection {
    fn default() -> Self {
        Self {
            beneficiary_address: String::new(),
            max_fee_per_vbyte: DEFAULT_MAX_FEE_PER_VBYTE,
            network: "mainnet".to_string(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { node: NodeSection::default(), tss: TssSection::default(), bitcoin: BitcoinSection::default() }
    }
}

impl NodeConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(NodeConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|err| NodeError::Config(err.to_string()))
    }

    pub fn awaiting_key_generation_lookback(&self) -> Duration {
        Duration::from_secs(self.node.awaiting_key_generation_lookback_secs)
    }

    pub fn key_generation_timeout(&self) -> Duration {
        Duration::from_secs(self.node.key_generation_timeout_secs)
    }

    pub fn signing_timeout(&self) -> Duration {
        Duration::from_secs(self.node.signing_timeout_secs)
    }

    pub fn signing_event_check_timeout(&self) -> Duration {
        Duration::from_secs(self.node.signing_event_check_timeout_secs)
    }

    pub fn pre_params_generation_timeout(&self) -> Duration {
        Duration::from_secs(self.tss.pre_params_generation_timeout_secs)
    }

    pub fn bitcoin_network(&self) -> Result<Network> {
        match self.bitcoin.network.as_str() {
            "mainnet" | "bitcoin" => Ok(Network::Bitcoin),
            "testnet" => Ok(Network::Testnet),
            "signet" => Ok(Network::Signet),
            "regtest" => Ok(Network::Regtest),
            other => Err(NodeError::Config(format!("unknown bitcoin network [{other}]"))),
        }
    }
}
