//! CLI config file
//!
//! ```yaml
//! multicluster:
//!   hostClusterName: host
//!   federation:
//!     etcdImage: registry.local/etcd:3.5.3-0
//! bootstrap:
//!   namespace: karmada-system
//!   etcdStorageMode: PVC
//! ```

use std::path::Path;

use meridian_common::crd::BootstrapOverrides;
use meridian_common::options::MultiClusterOptions;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Contents of the `--config` file
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CliConfig {
    /// Multi-cluster options
    pub multicluster: MultiClusterOptions,
    /// Defaults for control-plane installs
    pub bootstrap: BootstrapOverrides,
}

impl CliConfig {
    /// Parse and validate a config document
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.multicluster.validate()?;
        Ok(config)
    }

    /// Load the config file at `path`, or defaults when no file is given
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&text).map_err(|e| Error::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}
