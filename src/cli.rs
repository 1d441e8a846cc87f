//! Defines command-line interface options using `clap` for the `pmp` binary.

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

/// Climate model evaluation metrics
#[derive(Parser, Debug)]
#[command(
    name = "pmp",
    version,
    about = "Compute PCMDI metrics for climate model output"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Number of threads to use for parallel processing. Defaults to number of CPU cores.
    #[arg(short = 't', long, global = true)]
    pub threads: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mean climate statistics of model climatologies against observations
    MeanClimate(ParamArgs),
    /// Validate a mean climate parameter file without running it
    CheckParams(ParamArgs),
    /// Extratropical modes of variability (EOF analysis and CBF projection)
    VariabilityMode(ConfigArgs),
    /// Wang monsoon precipitation index skill scores
    MonsoonWang(ConfigArgs),
    /// Monsoon onset and decay from fractional accumulated daily precipitation
    MonsoonSperber(ConfigArgs),
    /// Standardized Precipitation Index maps
    Spi(ConfigArgs),
    /// Annual and seasonal extremes of daily precipitation and temperature
    Extremes(ConfigArgs),
    /// Köppen-Geiger classification of monthly climatologies
    Koppen(KoppenArgs),
    /// Turn a CMEC settings file into a PMP parameter file
    CmecParams(CmecArgs),
}

#[derive(Args, Debug)]
pub struct ParamArgs {
    /// JSON parameter file
    #[arg(short, long)]
    pub param: PathBuf,

    /// Override a parameter, formatted as <name>=<value>; the value is read as JSON when it parses
    #[arg(long = "set", value_parser = parse_override)]
    pub overrides: Vec<(String, Value)>,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct KoppenArgs {
    /// Monthly near-surface temperature climatology
    #[arg(long)]
    pub tas: PathBuf,

    #[arg(long, default_value = "tas")]
    pub tas_var: String,

    /// Monthly precipitation climatology
    #[arg(long)]
    pub pr: PathBuf,

    #[arg(long, default_value = "pr")]
    pub pr_var: String,

    /// Path to save the class map as NetCDF. If not set, prints the class counts.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CmecArgs {
    /// CMEC settings file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Name of the PMP configuration inside the settings file
    #[arg(long)]
    pub pmp_config: String,

    /// Parameter file to write
    #[arg(short, long)]
    pub output: PathBuf,
}

pub(crate) fn parse_override(s: &str) -> Result<(String, Value), String> {
    match s.split_once('=') {
        Some((name, raw)) if !name.is_empty() => {
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((name.to_string(), value))
        }
        _ => Err("Invalid format: Expected '<name>=<value>'.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn override_values() {
        assert_eq!(parse_override("case_id=v20240101").unwrap(), ("case_id".into(), json!("v20240101")));
        assert_eq!(parse_override("vars=[\"pr\",\"tas\"]").unwrap().1, json!(["pr", "tas"]));
        assert_eq!(parse_override("save_test_clims=true").unwrap().1, json!(true));
        assert!(parse_override("=3").is_err());
        assert!(parse_override("case_id").is_err());
    }

    #[test]
    fn parses_subcommand() {
        let cli = Cli::try_parse_from(["pmp", "-vv", "-t", "4", "spi", "--config", "spi.json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.threads, Some(4));
        assert!(matches!(cli.command, Command::Spi(ref a) if a.config == PathBuf::from("spi.json")));

        let cli = Cli::try_parse_from(["pmp", "monsoon-sperber", "-c", "sperber.json"]).unwrap();
        assert!(matches!(cli.command, Command::MonsoonSperber(ref a) if a.config == PathBuf::from("sperber.json")));
    }
}
