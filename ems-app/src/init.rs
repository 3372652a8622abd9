//! Scaffolding for `ems init`.
//!
//! Writes the config template without overwriting an existing file, then opens
//! the configured database so its schema exists.

use crate::config::{EmsConfig, default_config_path, expand_home};
use anyhow::Result;
use ems_store::Store;
use std::path::{Path, PathBuf};

const CONFIG_TEMPLATE: &str = include_str!("../../config-templates/config.toml");

#[derive(Debug, Clone)]
pub struct InitReport {
    pub config_path: PathBuf,
    pub config_created: bool,
    pub database: String,
}

pub async fn initialize(config_path: Option<PathBuf>) -> Result<InitReport> {
    let config_path = config_path.unwrap_or_else(default_config_path);
    let config_created = write_template_if_missing(&config_path).await?;
    let cfg = EmsConfig::load(Some(config_path.clone())).await?;
    let store = Store::open(expand_home(&cfg.store.database_path)?).await?;
    Ok(InitReport {
        config_path,
        config_created,
        database: store.location().to_string(),
    })
}

async fn write_template_if_missing(target: &Path) -> Result<bool> {
    match tokio::fs::metadata(target).await {
        Ok(_) => Ok(false),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| anyhow::anyhow!("create config dir {}: {e}", parent.display()))?;
            }
            tokio::fs::write(target, CONFIG_TEMPLATE)
                .await
                .map_err(|e| anyhow::anyhow!("write config template {}: {e}", target.display()))?;
            tracing::info!(path = %target.display(), "config template written");
            Ok(true)
        }
        Err(err) => Err(anyhow::anyhow!(
            "inspect config path {}: {err}",
            target.display()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn template_is_written_once_and_never_overwritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("nested").join("config.toml");

        assert!(write_template_if_missing(&target).await.expect("first write"));
        assert_eq!(
            std::fs::read_to_string(&target).expect("read"),
            CONFIG_TEMPLATE
        );

        std::fs::write(&target, "# edited\n").expect("edit");
        assert!(!write_template_if_missing(&target).await.expect("second write"));
        assert_eq!(std::fs::read_to_string(&target).expect("read"), "# edited\n");
    }

    #[tokio::test]
    async fn initialize_creates_database_at_configured_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("config.toml");
        let db_path = dir.path().join("data").join("ems.sqlite3");
        std::fs::write(
            &config_path,
            format!("[store]\ndatabase_path = {:?}\n", db_path.display().to_string()),
        )
        .expect("write config");

        let report = initialize(Some(config_path.clone())).await.expect("init");
        assert!(!report.config_created);
        assert_eq!(report.config_path, config_path);
        assert!(db_path.exists());
    }
}
