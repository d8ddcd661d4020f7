//! CLI command definitions and handlers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, eyre};
use serde::Serialize;
use strata_common::{CreateOpts, GraphDriver};

use crate::driver::{Driver, DriverConfig};
use crate::namespace::IdentityMapping;

/// Strata - btrfs layer storage
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Root directory for strata data
    #[arg(
        long,
        global = true,
        env = "STRATA_ROOT",
        default_value = "/var/lib/strata"
    )]
    pub root: PathBuf,

    /// Driver option (e.g. btrfs.min_space=10G), may be repeated
    #[arg(long = "storage-opt", global = true, value_name = "KEY=VALUE")]
    pub storage_opts: Vec<String>,

    /// Own layers by the subordinate IDs of this user
    #[arg(long, global = true, value_name = "USER")]
    pub userns_remap: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Output format of `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned key/value columns.
    Table,
    /// A JSON document.
    Json,
}

/// Layer commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a layer
    Create {
        /// Layer ID
        layer_id: String,

        /// Snapshot this layer instead of starting empty
        #[arg(short, long)]
        parent: Option<String>,

        /// Quota ceiling for the layer (e.g. 10G)
        #[arg(short, long)]
        size: Option<String>,

        /// SELinux label for the layer directory
        #[arg(long)]
        mount_label: Option<String>,

        /// Create a writable container layer
        #[arg(long)]
        read_write: bool,
    },

    /// Remove a layer and any subvolumes nested in it
    Remove {
        /// Layer ID
        layer_id: String,
    },

    /// Print the directory holding a layer's contents
    Get {
        /// Layer ID
        layer_id: String,

        /// SELinux label for the layer directory
        #[arg(long)]
        mount_label: Option<String>,
    },

    /// Exit successfully if a layer exists
    Exists {
        /// Layer ID
        layer_id: String,
    },

    /// Show driver status
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Show the recorded and effective quota of a layer
    Quota {
        /// Layer ID
        layer_id: String,
    },

    /// Unmount the driver's home directory
    Cleanup,
}

#[derive(Serialize)]
struct StatusReport<'a> {
    driver: &'a str,
    home: PathBuf,
    status: BTreeMap<String, String>,
}

impl Cli {
    /// Tracing filter directive for the chosen verbosity.
    #[must_use]
    pub const fn log_directive(&self) -> &'static str {
        if self.debug { "strata=debug" } else { "strata=info" }
    }

    /// Driver configuration from the global flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the remap user has no subordinate ID ranges.
    pub fn driver_config(&self) -> Result<DriverConfig> {
        let mut config = DriverConfig::default().with_root(self.root.clone());
        for option in &self.storage_opts {
            config = config.with_option(option.clone());
        }

        if let Some(user) = &self.userns_remap {
            let mapping = IdentityMapping::from_subordinate_ranges(user)
                .map_err(|e| eyre!("Failed to build identity mapping for {}: {}", user, e))?;
            config = config.with_id_mapping(mapping);
        }

        Ok(config)
    }

    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver cannot be initialized or the command fails.
    pub fn execute(self) -> Result<ExitCode> {
        let config = self.driver_config()?;
        let driver = Driver::from_config(&config)
            .map_err(|e| eyre!("Failed to initialize btrfs driver: {}", e))?;

        match self.command {
            Commands::Create {
                layer_id,
                parent,
                size,
                mount_label,
                read_write,
            } => {
                let mut opts = CreateOpts::default();
                if let Some(size) = size {
                    opts = opts.with_storage_opt("size", size);
                }
                if let Some(label) = mount_label {
                    opts = opts.with_mount_label(label);
                }

                let result = if read_write {
                    driver.create_read_write(&layer_id, parent.as_deref(), &opts)
                } else {
                    driver.create(&layer_id, parent.as_deref(), &opts)
                };
                result.map_err(|e| eyre!("Failed to create layer: {}", e))?;

                println!("Layer {} created", layer_id);
            }

            Commands::Remove { layer_id } => {
                driver
                    .remove(&layer_id)
                    .map_err(|e| eyre!("Failed to remove layer: {}", e))?;

                println!("Layer {} removed", layer_id);
            }

            Commands::Get {
                layer_id,
                mount_label,
            } => {
                let path = driver
                    .get(&layer_id, mount_label.as_deref())
                    .map_err(|e| eyre!("Failed to get layer: {}", e))?;
                driver
                    .put(&layer_id)
                    .map_err(|e| eyre!("Failed to release layer: {}", e))?;

                println!("{}", path.display());
            }

            Commands::Exists { layer_id } => {
                if !driver.exists(&layer_id) {
                    return Ok(ExitCode::FAILURE);
                }
            }

            Commands::Status { format } => {
                let status = driver.status();
                match format {
                    OutputFormat::Json => {
                        let report = StatusReport {
                            driver: driver.name(),
                            home: driver.paths().home().to_path_buf(),
                            status: status.into_iter().collect(),
                        };
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    }
                    OutputFormat::Table => {
                        println!("Storage Driver: {}", driver.name());
                        for (key, value) in status {
                            println!(" {}: {}", key, value);
                        }
                    }
                }
            }

            Commands::Quota { layer_id } => {
                let recorded = driver
                    .recorded_quota(&layer_id)
                    .map_err(|e| eyre!("Failed to read quota record: {}", e))?;
                println!(
                    "Recorded:  {}",
                    recorded.map_or_else(|| "none".to_string(), |size| size.to_string())
                );

                match driver.quota_limit(&layer_id) {
                    Ok(Some(limit)) => println!("Effective: {}", limit),
                    Ok(None) => println!("Effective: none"),
                    Err(e) => println!("Effective: unavailable ({})", e),
                }
            }

            Commands::Cleanup => {
                driver
                    .cleanup()
                    .map_err(|e| eyre!("Failed to clean up driver: {}", e))?;
            }
        }

        Ok(ExitCode::SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "strata",
            "status",
            "--root",
            "/srv/strata",
            "--storage-opt",
            "btrfs.min_space=1G",
            "--debug",
        ])
        .unwrap();

        assert_eq!(cli.root, PathBuf::from("/srv/strata"));
        assert_eq!(cli.log_directive(), "strata=debug");
        let config = cli.driver_config().unwrap();
        assert_eq!(config.home(), PathBuf::from("/srv/strata/btrfs"));
        assert_eq!(config.options, vec!["btrfs.min_space=1G".to_string()]);
    }

    #[test]
    fn create_arguments() {
        let cli = Cli::try_parse_from([
            "strata", "create", "child", "--parent", "base", "--size", "10G",
        ])
        .unwrap();

        match cli.command {
            Commands::Create {
                layer_id,
                parent,
                size,
                read_write,
                ..
            } => {
                assert_eq!(layer_id, "child");
                assert_eq!(parent.as_deref(), Some("base"));
                assert_eq!(size.as_deref(), Some("10G"));
                assert!(!read_write);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn status_format_is_validated() {
        assert!(Cli::try_parse_from(["strata", "status", "--format", "yaml"]).is_err());
        let cli = Cli::try_parse_from(["strata", "status", "-f", "json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Status {
                format: OutputFormat::Json
            }
        ));
    }
}
