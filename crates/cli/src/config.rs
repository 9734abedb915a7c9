use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use hashgrid_core::ArbiterConfig;

use crate::cli::CliArgs;

/// Config file picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "hashgrid.toml";

/// Load config from the given path, or `./hashgrid.toml`, or defaults.
///
/// Environment overrides apply in every case; CLI flags apply last.
pub fn load(args: &CliArgs) -> Result<ArbiterConfig> {
    let mut config = match resolve_path(args.config.as_deref()) {
        Some(path) => {
            debug!(?path, "Loading config");
            ArbiterConfig::from_file(&path)
                .with_context(|| format!("failed to load config: {}", path.display()))?
        }
        None => {
            debug!("Config file not found, using defaults");
            ArbiterConfig::from_env().context("failed to build default config")?
        }
    };
    apply_args(&mut config, args);
    config
        .validate()
        .context("invalid configuration after CLI overrides")?;
    Ok(config)
}

fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        }
    }
}

/// CLI flags win over file and environment.
pub fn apply_args(config: &mut ArbiterConfig, args: &CliArgs) {
    if let Some(workers) = args.workers {
        config.pool.workers = workers;
    }
    if let Some(ms) = args.round_interval_ms {
        config.pool.round_interval_ms = ms;
    }
    if let Some(watts) = args.power_budget {
        config.thermal.power_budget_w = watts;
    }
    if args.power_save {
        config.adaptation.power_save_mode = true;
    }
}

/// Render the resolved config for `--print-config`.
pub fn render(config: &ArbiterConfig) -> Result<String> {
    toml::to_string_pretty(config).context("failed to serialize config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["hashgrid"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn flags_override_config() {
        let mut config = ArbiterConfig::default();
        apply_args(
            &mut config,
            &args(&["--workers", "12", "--power-budget", "100", "--power-save"]),
        );
        assert_eq!(config.pool.workers, 12);
        assert_eq!(config.thermal.power_budget_w, 100.0);
        assert!(config.adaptation.power_save_mode);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load(&args(&["--config", "/nonexistent/hashgrid.toml"])).unwrap_err();
        assert!(format!("{err:#}").contains("failed to load config"));
    }

    #[test]
    fn rendered_config_parses_back() {
        let config = ArbiterConfig::default();
        let rendered = render(&config).unwrap();
        let parsed: ArbiterConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.pool.workers, config.pool.workers);
        assert_eq!(parsed.thermal.reclaim, config.thermal.reclaim);
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = ArbiterConfig::default();
        apply_args(&mut config, &args(&["--workers", "0"]));
        assert!(config.validate().is_err());
    }
}
