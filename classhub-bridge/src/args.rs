//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Default configuration file.
pub const DEFAULT_CONFIG: &str = "classhub.json5";

/// ClassHub bridge between the classroom bus and cloud accounts.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "ClassHub classroom/cloud bridge")]
pub struct HubArgs {
    /// Path to configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Validate the configuration, print the routing table and exit.
    #[arg(long)]
    pub check: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = HubArgs::try_parse_from(["classhub-bridge"]).unwrap();
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG));
        assert_eq!(args.log_level, None);
        assert!(!args.check);
    }

    #[test]
    fn test_all_flags() {
        let args = HubArgs::try_parse_from([
            "classhub-bridge",
            "-c",
            "room.json5",
            "--log-level",
            "debug",
            "--check",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("room.json5"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.check);
    }
}
