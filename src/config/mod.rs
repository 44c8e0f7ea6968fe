mod types;

pub use types::*;

use anyhow::{Context, Result};
use mp4frag_media::FragmentOptions;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./mp4frag.toml", "~/.config/mp4frag/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.fragment.duration_ms == Some(0) {
        anyhow::bail!("Fragment duration cannot be 0");
    }

    if config.fragment.timescale == Some(0) {
        anyhow::bail!("Timescale cannot be 0");
    }

    if config.log.verbosity > MAX_VERBOSITY {
        anyhow::bail!(
            "Verbosity must be between 0 and {}, got {}",
            MAX_VERBOSITY,
            config.log.verbosity
        );
    }

    Ok(())
}

impl Config {
    /// Options for one fragmentation run.
    pub fn fragment_options(&self) -> FragmentOptions {
        FragmentOptions {
            fragment_duration: self.fragment.duration_ms,
            timescale: self.fragment.timescale,
            verbosity: self.log.verbosity,
            debug: self.log.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mp4frag.toml");
        fs::write(
            &path,
            "[fragment]\nduration_ms = 4000\ntimescale = 90000\n\n[log]\nverbosity = 2\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.fragment.duration_ms, Some(4000));
        assert_eq!(config.fragment.timescale, Some(90000));
        assert_eq!(config.log.verbosity, 2);
        assert!(!config.log.debug);

        let options = config.fragment_options();
        assert_eq!(options.fragment_duration, Some(4000));
        assert_eq!(options.timescale, Some(90000));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.fragment_options(), FragmentOptions::default());
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = Config::default();
        config.fragment.duration_ms = Some(0);
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.fragment.timescale = Some(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_verbosity_bound() {
        let mut config = Config::default();
        config.log.verbosity = MAX_VERBOSITY;
        assert!(validate_config(&config).is_ok());
        config.log.verbosity = MAX_VERBOSITY + 1;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_unreadable_config() {
        let dir = tempdir().unwrap();
        let err = load_config(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));

        let path = dir.path().join("bad.toml");
        fs::write(&path, "[fragment]\nduration_ms = \"soon\"\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
