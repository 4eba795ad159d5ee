//! CLI subcommand implementations

pub mod approve;
pub mod distill;
pub mod dna;
pub mod ledger;
pub mod run;
pub mod status;

use std::path::Path;

use opshield_runtime::RuntimeConfig;

/// Load configuration from `--config`, falling back to defaults.
pub fn load_config(matches: &clap::ArgMatches) -> Result<RuntimeConfig, String> {
    match matches.get_one::<String>("config") {
        Some(path) => RuntimeConfig::load(Path::new(path)).map_err(|e| e.to_string()),
        None => Ok(RuntimeConfig::default()),
    }
}
