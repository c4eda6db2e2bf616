//! Command-line interface.

use clap::Parser;
use std::path::PathBuf;

/// Load-balancing frontend for v2 onion services.
#[derive(Parser, Debug)]
#[command(name = "onionmux")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug mode
    #[arg(short, long)]
    pub debug: bool,

    /// Config path
    #[arg(short, long, value_parser = existing_file)]
    pub config: PathBuf,
}

fn existing_file(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("path {value:?} is not an existing file"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_config_flag() {
        assert!(Cli::try_parse_from(["onionmux"]).is_err());
    }

    #[test]
    fn rejects_missing_config_file() {
        assert!(Cli::try_parse_from(["onionmux", "--config", "/no/such/file"]).is_err());
    }
}
