//! RON configuration file of the `convo` binary.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use convo_core::SyncSettings;
use convo_engine::{LocalIdentity, TransportSettings};
use serde::Deserialize;
use url::Url;

pub const DEFAULT_CONFIG: &str = "convo.ron";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConvoConfig {
    pub node_address: String,
    pub api_token: String,
    /// Node identity messages are sent under, e.g. `@@localhost.shinkai`.
    pub identity: String,
    pub profile: String,
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub use_branches: bool,
}

fn default_page_limit() -> usize {
    SyncSettings::default().page_limit
}

fn default_poll_interval_secs() -> u64 {
    SyncSettings::default().poll_interval.as_secs()
}

impl ConvoConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => bail!(
                "config file {} not found; create it with node_address, api_token, identity and profile",
                path.display()
            ),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        let config: ConvoConfig =
            ron::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
        if config.page_limit == 0 {
            bail!("page_limit in {} must be at least 1", path.display());
        }
        Ok(config)
    }

    pub fn sync_settings(&self) -> SyncSettings {
        let defaults = SyncSettings::default();
        let poll_interval = Duration::from_secs(self.poll_interval_secs.max(1));
        SyncSettings {
            page_limit: self.page_limit,
            poll_interval,
            max_poll_interval: defaults.max_poll_interval.max(poll_interval),
            ..defaults
        }
    }

    pub fn transport_settings(&self) -> Result<TransportSettings> {
        let node_address = Url::parse(&self.node_address)
            .with_context(|| format!("invalid node_address {:?}", self.node_address))?;
        let mut settings = TransportSettings::new(node_address, self.api_token.clone());
        settings.use_branches = self.use_branches;
        Ok(settings)
    }

    pub fn identity(&self) -> LocalIdentity {
        LocalIdentity::new(self.identity.clone(), self.profile.clone())
    }
}
