use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mapcache",
    about = "Map cache scheduling and synchronization daemon",
    version = env!("CARGO_PKG_VERSION"),
    author,
    propagate_version = true
)]
pub struct Cli {
    #[arg(short, long, global = true, env = "MAPCACHE_CONFIG", help = "Path to mapcache.toml")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the scheduler and workers until Ctrl-C or SIGTERM")]
    Run,

    #[command(about = "Refresh one cache table now")]
    Populate {
        #[arg(long, help = "Key selector, e.g. /if/interface/name")]
        key: String,

        #[arg(long, help = "Value selector, e.g. /if/interface/mtu")]
        value: String,

        #[arg(long, help = "Device name")]
        device: String,
    },

    #[command(subcommand, about = "Manage mappings and device bindings")]
    Map(MapCommands),

    #[command(about = "Enable periodic synchronization")]
    Enable,

    #[command(about = "Disable periodic synchronization")]
    Disable,

    #[command(about = "Set the worker pool size used by the next start")]
    Workers {
        #[arg(help = "Number of workers")]
        count: usize,
    },

    #[command(about = "Show global settings and store status")]
    Status {
        #[arg(short, long, help = "Output as JSON")]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum MapCommands {
    #[command(about = "Create a mapping or change its update interval")]
    Add {
        #[arg(long)]
        key: String,

        #[arg(long)]
        value: String,

        #[arg(long, help = "Update interval in seconds (default 300 for a new mapping)")]
        interval: Option<u64>,
    },

    #[command(about = "Bind a device to a mapping")]
    Bind {
        #[arg(long)]
        key: String,

        #[arg(long)]
        value: String,

        #[arg(long)]
        device: String,

        #[arg(long, help = "Per-device update interval in seconds")]
        interval: Option<u64>,
    },

    #[command(about = "Remove a device binding and its cache table")]
    Unbind {
        #[arg(long)]
        key: String,

        #[arg(long)]
        value: String,

        #[arg(long)]
        device: String,
    },

    #[command(about = "Remove a mapping with all of its bindings")]
    Remove {
        #[arg(long)]
        key: String,

        #[arg(long)]
        value: String,
    },

    #[command(about = "List mappings, bindings and their last poll")]
    Show {
        #[arg(short, long, help = "Output as JSON")]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_populate_args() {
        let cli = Cli::try_parse_from([
            "mapcache",
            "populate",
            "--key",
            "/if/interface/name",
            "--value",
            "/if/interface/mtu",
            "--device",
            "edge-1",
        ])
        .unwrap();

        match cli.command {
            Commands::Populate { key, value, device } => {
                assert_eq!(key, "/if/interface/name");
                assert_eq!(value, "/if/interface/mtu");
                assert_eq!(device, "edge-1");
            }
            _ => panic!("expected populate"),
        }
    }

    #[test]
    fn test_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["mapcache", "map", "show", "--json", "--config", "/tmp/m.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/m.toml")));
        assert!(matches!(cli.command, Commands::Map(MapCommands::Show { json: true })));
    }

    #[test]
    fn test_populate_requires_device() {
        assert!(Cli::try_parse_from(["mapcache", "populate", "--key", "/a/k", "--value", "/a/v"]).is_err());
    }
}
