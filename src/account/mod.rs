//! Account model
//!
//! An account names one node configuration: which network it runs on, where
//! its data lives (or which remote node it talks to), and the credentials the
//! node needs to reach bitcoind, the indexer and the RGB proxy when unlocking.

pub mod registry;

use crate::error::RegistryError;
use crate::node::launcher::LaunchParams;
use crate::node::rpc::UnlockRequest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use url::Url;

/// Default control API port of a locally managed node
pub const DEFAULT_DAEMON_LISTENING_PORT: u16 = 3001;

/// Default LDK peer port of a locally managed node
pub const DEFAULT_LDK_PEER_LISTENING_PORT: u16 = 9735;

/// Bitcoin network the node runs on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
    #[default]
    Regtest,
}

/// Per-network connection defaults offered when creating an account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDefaults {
    pub rpc_connection_url: &'static str,
    pub indexer_url: &'static str,
    pub proxy_endpoint: &'static str,
    pub default_lsp_url: &'static str,
}

impl Network {
    /// Network name as passed to the node (`--network`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
        }
    }

    /// Default endpoints for this network
    pub fn defaults(&self) -> NetworkDefaults {
        match self {
            Network::Mainnet => NetworkDefaults {
                rpc_connection_url: "user:password@127.0.0.1:8332",
                indexer_url: "127.0.0.1:50001",
                proxy_endpoint: "rpc://127.0.0.1:3000/json-rpc",
                default_lsp_url: "https://api.kaleidoswap.com/",
            },
            Network::Testnet => NetworkDefaults {
                rpc_connection_url: "user:password@electrum.iriswallet.com:18332",
                indexer_url: "ssl://electrum.iriswallet.com:50013",
                proxy_endpoint: "rpcs://proxy.iriswallet.com/0.2/json-rpc",
                default_lsp_url: "https://api.testnet.kaleidoswap.com/",
            },
            Network::Signet => NetworkDefaults {
                rpc_connection_url: "user:default_password@bitcoind.signet.kaleidoswap.com:38332",
                indexer_url: "electrum.signet.kaleidoswap.com:60601",
                proxy_endpoint: "rpcs://proxy.signet.kaleidoswap.com/json-rpc",
                default_lsp_url: "https://api.signet.kaleidoswap.com/",
            },
            Network::Regtest => NetworkDefaults {
                rpc_connection_url: "user:password@regtest-bitcoind.rgbtools.org:80",
                indexer_url: "electrum.rgbtools.org:50041",
                proxy_endpoint: "rpcs://proxy.iriswallet.com/0.2/json-rpc",
                default_lsp_url: "https://api.regtest.kaleidoswap.com/",
            },
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "bitcoin" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "signet" => Ok(Network::Signet),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("Unknown network: {}", other)),
        }
    }
}

/// bitcoind RPC credentials, written as `user:password@host:port`
#[derive(Clone, PartialEq, Eq)]
pub struct RpcConnection {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

impl fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcConnection")
            .field("username", &self.username)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl FromStr for RpcConnection {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RegistryError::InvalidRpcConnection {
            value: s.to_string(),
        };

        // Password may itself contain '@' or ':', so split from the right
        let (credentials, host_port) = s.rsplit_once('@').ok_or_else(invalid)?;
        let (username, password) = credentials.split_once(':').ok_or_else(invalid)?;
        let (host, port) = host_port.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        if username.is_empty() || host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

/// A named node configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Unique account name
    pub name: String,

    pub network: Network,

    /// Data directory name under the data root; absent for remote nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datapath: Option<String>,

    /// bitcoind RPC connection string (`user:password@host:port`)
    pub rpc_connection_url: String,

    /// Control API URL of a remote node (ignored for local accounts)
    #[serde(default)]
    pub node_url: String,

    pub indexer_url: String,

    pub proxy_endpoint: String,

    #[serde(default)]
    pub default_lsp_url: String,

    #[serde(default = "default_daemon_port")]
    pub daemon_listening_port: u16,

    #[serde(default = "default_peer_port")]
    pub ldk_peer_listening_port: u16,
}

fn default_daemon_port() -> u16 {
    DEFAULT_DAEMON_LISTENING_PORT
}

fn default_peer_port() -> u16 {
    DEFAULT_LDK_PEER_LISTENING_PORT
}

impl Account {
    /// Create a locally managed account populated with the network defaults
    pub fn local(name: &str, network: Network) -> Self {
        let defaults = network.defaults();
        Self {
            name: name.to_string(),
            network,
            datapath: Some(format!("kaleidoswap-{}", slugify(name))),
            rpc_connection_url: defaults.rpc_connection_url.to_string(),
            node_url: format!("http://localhost:{}", DEFAULT_DAEMON_LISTENING_PORT),
            indexer_url: defaults.indexer_url.to_string(),
            proxy_endpoint: defaults.proxy_endpoint.to_string(),
            default_lsp_url: defaults.default_lsp_url.to_string(),
            daemon_listening_port: DEFAULT_DAEMON_LISTENING_PORT,
            ldk_peer_listening_port: DEFAULT_LDK_PEER_LISTENING_PORT,
        }
    }

    /// Create an account that talks to an already running node
    pub fn remote(name: &str, network: Network, node_url: &str) -> Self {
        Self {
            datapath: None,
            node_url: node_url.to_string(),
            ..Self::local(name, network)
        }
    }

    /// Whether this account needs a locally spawned node process
    pub fn is_local(&self) -> bool {
        self.datapath.as_deref().is_some_and(|p| !p.trim().is_empty())
    }

    /// Parsed bitcoind RPC credentials
    pub fn rpc_connection(&self) -> Result<RpcConnection, RegistryError> {
        self.rpc_connection_url.parse()
    }

    /// URL of the node's control API for this account
    pub fn control_api_url(&self) -> Result<Url, RegistryError> {
        let raw = if self.is_local() {
            format!("http://127.0.0.1:{}", self.daemon_listening_port)
        } else {
            self.node_url.clone()
        };

        Url::parse(&raw).map_err(|e| RegistryError::InvalidNodeUrl {
            value: raw.clone(),
            reason: e.to_string(),
        })
    }

    /// Process parameters for a local node, or `None` for remote accounts
    pub fn launch_params(&self, data_root: &Path) -> Option<LaunchParams> {
        let datapath = self.datapath.as_deref().filter(|p| !p.trim().is_empty())?;
        Some(LaunchParams {
            account_name: self.name.clone(),
            network: self.network,
            data_dir: data_root.join(datapath),
            daemon_listening_port: self.daemon_listening_port,
            ldk_peer_listening_port: self.ldk_peer_listening_port,
        })
    }

    /// Build the unlock request for this account with the given wallet password
    pub fn unlock_request(&self, password: &str) -> Result<UnlockRequest, RegistryError> {
        let rpc = self.rpc_connection()?;
        Ok(UnlockRequest {
            bitcoind_rpc_username: rpc.username,
            bitcoind_rpc_password: rpc.password,
            bitcoind_rpc_host: rpc.host,
            bitcoind_rpc_port: rpc.port,
            indexer_url: self.indexer_url.clone(),
            proxy_endpoint: self.proxy_endpoint.clone(),
            password: password.to_string(),
        })
    }
}

/// Turn an account name into a directory-safe slug
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}
