//! Command-line interface definitions using clap

use clap::Parser;

/// qrlinker - dynamic QR code redirect engine
#[derive(Parser, Debug)]
#[command(name = "qrlinker")]
#[command(version)]
#[command(about = "Dynamic QR code redirect engine", long_about = None)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short = 'c', default_value = super::DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// Print a sample configuration file and exit
    #[arg(long)]
    pub generate_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_flag() {
        let args = Args::parse_from(["qrlinker", "-c", "custom.toml"]);
        assert_eq!(args.config, "custom.toml");
        assert!(!args.generate_config);

        let args = Args::parse_from(["qrlinker", "--config=other.toml", "--generate-config"]);
        assert_eq!(args.config, "other.toml");
        assert!(args.generate_config);
    }

    #[test]
    fn test_default_config_path() {
        let args = Args::parse_from(["qrlinker"]);
        assert_eq!(args.config, "config.toml");
    }
}
