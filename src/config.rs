//! Node configuration.
//!
//! A TOML file describes the node; a few command-line flags override it.
//! Every field has a default so an empty file (or no file) yields a
//! standalone node on the default gossip port.

use crate::membership::service::MembershipConfig;
use crate::membership::types::NodeId;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_GOSSIP_PORT: u16 = 7946;

#[derive(Parser, Debug, Default, Clone)]
#[command(name = "bucket-node", about = "Bucket directory and request router node")]
pub struct Args {
    /// TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Gossip bind address, overrides `[bind]`.
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Seed peer to join through; may be repeated.
    #[arg(long = "seed")]
    pub seeds: Vec<SocketAddr>,

    #[arg(long)]
    pub name: Option<String>,

    /// Location tag used for distance ranking.
    #[arg(long)]
    pub loc: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Endpoint {
    #[serde(default = "default_ip")]
    pub addr: IpAddr,
    #[serde(default = "default_gossip_port")]
    pub port: u16,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            addr: default_ip(),
            port: default_gossip_port(),
        }
    }
}

impl Endpoint {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

/// RPC listener; unset fields follow the gossip bind address.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RpcEndpoint {
    pub addr: Option<IpAddr>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BucketConfig {
    pub name: String,
    /// Directory whose disk the capacity checker watches.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct NetBucketConfig {
    pub provider: String,
    pub name: String,
    #[serde(default)]
    pub meta: String,
    #[serde(default)]
    pub global: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Tuning {
    pub gossip_interval_ms: u64,
    pub retransmit_mult: usize,
    pub rpc_deadline_ms: u64,
    pub scheduler_interval_ms: u64,
    pub departed_grace_secs: u64,
    pub health_check_interval_secs: u64,
    pub meta_limit: usize,
    pub udp_payload_limit: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            gossip_interval_ms: 200,
            retransmit_mult: 4,
            rpc_deadline_ms: 5_000,
            scheduler_interval_ms: 1_000,
            departed_grace_secs: 30,
            health_check_interval_secs: 30,
            meta_limit: 512,
            udp_payload_limit: 1400,
        }
    }
}

impl Tuning {
    pub fn rpc_deadline(&self) -> Duration {
        Duration::from_millis(self.rpc_deadline_ms)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_interval_ms)
    }

    pub fn departed_grace(&self) -> Duration {
        Duration::from_secs(self.departed_grace_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name; a random UUID when unset.
    pub name: Option<String>,
    pub loc: String,
    pub seeds: Vec<SocketAddr>,
    pub bind: Endpoint,
    pub advertise: Option<Endpoint>,
    pub rpc: RpcEndpoint,
    pub buckets: Vec<BucketConfig>,
    pub net_buckets: Vec<NetBucketConfig>,
    pub tuning: Tuning,
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let cfg: NodeConfig = toml::from_str(content)?;
        Ok(cfg)
    }

    /// Loads the file named by `--config` (if any) and applies the flag overrides.
    pub fn load(args: &Args) -> Result<Self> {
        let mut cfg = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cfg.apply_args(args);
        Ok(cfg)
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(bind) = args.bind {
            self.bind = Endpoint {
                addr: bind.ip(),
                port: bind.port(),
            };
        }
        for seed in &args.seeds {
            if !self.seeds.contains(seed) {
                self.seeds.push(*seed);
            }
        }
        if let Some(name) = &args.name {
            self.name = Some(name.clone());
        }
        if let Some(loc) = &args.loc {
            self.loc = loc.clone();
        }
    }

    pub fn node_id(&self) -> NodeId {
        match &self.name {
            Some(name) => NodeId(name.clone()),
            None => NodeId::new(),
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind.socket_addr()
    }

    /// RPC listen address. The port defaults to the gossip port + 1, or to
    /// an ephemeral port when gossip itself binds an ephemeral one.
    pub fn rpc_addr(&self) -> SocketAddr {
        let addr = self.rpc.addr.unwrap_or(self.bind.addr);
        let port = match self.rpc.port {
            Some(port) => port,
            None if self.bind.port == 0 => 0,
            None => self.bind.port.saturating_add(1),
        };
        SocketAddr::new(addr, port)
    }

    pub fn membership_config(&self, name: NodeId) -> MembershipConfig {
        let mut config = MembershipConfig::new(name, self.bind_addr());
        config.advertise_addr = self.advertise.as_ref().map(Endpoint::socket_addr);
        config.seeds = self.seeds.clone();
        config.gossip_interval = Duration::from_millis(self.tuning.gossip_interval_ms);
        config.retransmit_mult = self.tuning.retransmit_mult;
        config.meta_limit = self.tuning.meta_limit;
        config.udp_payload_limit = self.tuning.udp_payload_limit;
        config
    }
}

fn default_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_gossip_port() -> u16 {
    DEFAULT_GOSSIP_PORT
}
