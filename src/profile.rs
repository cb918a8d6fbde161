//! Bootstrap code run once per session before the first command.
//!
//! Bindings made here are tagged [`BindingOrigin::Profile`](crate::value_store::BindingOrigin)
//! by the kernel, which keeps them out of value listings.

use tracing::debug;

use crate::{config::ProfileConfig, InternalResult};

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileScript {
    /// Where the code came from, for logging.
    pub source: String,
    pub code: String,
}

#[derive(Debug, Clone, Default)]
pub struct Profile {
    config: ProfileConfig,
}

impl Profile {
    pub fn new(config: ProfileConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Inline scripts first, then script files in configured order. Missing
    /// files are skipped; other read failures are errors.
    pub async fn load(&self) -> InternalResult<Vec<ProfileScript>> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }

        let mut scripts: Vec<ProfileScript> = self
            .config
            .scripts
            .iter()
            .enumerate()
            .map(|(index, code)| ProfileScript {
                source: format!("inline[{}]", index),
                code: code.clone(),
            })
            .collect();

        for path in &self.config.paths {
            match tokio::fs::read_to_string(path).await {
                Ok(code) => scripts.push(ProfileScript {
                    source: path.display().to_string(),
                    code,
                }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Profile script {} does not exist, skipping", path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(scripts)
    }
}
