//! Entry point for the `pmp` binary.
//! Handles CLI parsing, thread pool setup, and dispatches each metrics package.

use anyhow::{Context, Result};
use clap::Parser;
use pcmdi_metrics::cmec::{write_parameter_file, CmecEnvironment};
use pcmdi_metrics::drought::SpiConfig;
use pcmdi_metrics::extremes::ExtremesConfig;
use pcmdi_metrics::koppen::classify_grid;
use pcmdi_metrics::monsoon::{SperberConfig, WangConfig};
use pcmdi_metrics::netcdf_io::{read_field, NetCDFWriter};
use pcmdi_metrics::parallel::{get_parallel_info, ParallelConfig};
use pcmdi_metrics::variability::VariabilityConfig;
use pcmdi_metrics::{logging, PmpParameter};
use std::path::Path;
use std::process;
use tracing::info;

mod cli;

use cli::{Cli, Command, ParamArgs};

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    ParallelConfig::new(cli.threads)
        .setup_global_pool()
        .context("failed to configure the thread pool")?;
    get_parallel_info().log();

    match cli.command {
        Command::MeanClimate(args) => {
            let parameter = load_parameter(&args)?;
            let written = pcmdi_metrics::mean_climate::run(&parameter).context("mean climate run failed")?;
            for path in written {
                println!("✅ Saved metrics to {}", path.display());
            }
        }
        Command::CheckParams(args) => {
            let parameter = pcmdi_metrics::mean_climate::with_command_line_defaults(&load_parameter(&args)?);
            parameter
                .check_values()
                .with_context(|| format!("invalid parameter file {}", args.param.display()))?;
            println!("✅ {} is valid", args.param.display());
        }
        Command::VariabilityMode(args) => {
            let config = VariabilityConfig::from_file(&args.config)
                .with_context(|| format!("failed to read {}", args.config.display()))?;
            pcmdi_metrics::variability::run(&config).context("variability mode run failed")?;
            println!("✅ Saved results under {}", config.results_dir.display());
        }
        Command::MonsoonWang(args) => {
            let config = WangConfig::from_file(&args.config)
                .with_context(|| format!("failed to read {}", args.config.display()))?;
            pcmdi_metrics::monsoon::wang::run(&config).context("monsoon run failed")?;
            println!(
                "✅ Saved metrics to {}",
                config.results_dir.join(&config.outnamejson).display()
            );
        }
        Command::MonsoonSperber(args) => {
            let config = SperberConfig::from_file(&args.config)
                .with_context(|| format!("failed to read {}", args.config.display()))?;
            pcmdi_metrics::monsoon::sperber::run(&config).context("monsoon onset run failed")?;
            println!(
                "✅ Saved metrics to {}",
                config.output_dir("metrics_results").join(format!("{}.json", config.json_name())).display()
            );
        }
        Command::Spi(args) => {
            let config = SpiConfig::from_file(&args.config)
                .with_context(|| format!("failed to read {}", args.config.display()))?;
            for path in pcmdi_metrics::drought::run(&config).context("SPI run failed")? {
                println!("✅ Saved result to {}", path.display());
            }
        }
        Command::Extremes(args) => {
            let config = ExtremesConfig::from_file(&args.config)
                .with_context(|| format!("failed to read {}", args.config.display()))?;
            let path = pcmdi_metrics::extremes::run(&config).context("extremes run failed")?;
            println!("✅ Saved metrics to {}", path.display());
        }
        Command::Koppen(args) => {
            let tas = read_field(&args.tas, &args.tas_var)
                .with_context(|| format!("failed to read '{}' from {}", args.tas_var, args.tas.display()))?;
            let pr = read_field(&args.pr, &args.pr_var)
                .with_context(|| format!("failed to read '{}' from {}", args.pr_var, args.pr.display()))?;
            let map = classify_grid(&tas, &pr).context("classification failed")?;
            match args.output {
                Some(output) => {
                    NetCDFWriter::new(&output).write_maps(&map.grid, &[("koppen", map.codes.view())])?;
                    println!("✅ Saved result to {}", output.display());
                }
                None => {
                    for (i, class) in map.classes.iter().enumerate() {
                        let count = map.index.iter().filter(|&&k| k == i).count();
                        println!("{:<4} {:>8}  {}", class.label(), count, class.color());
                    }
                }
            }
        }
        Command::CmecParams(args) => {
            let env = CmecEnvironment::from_env();
            write_parameter_file(&args.config, &args.output, &args.pmp_config, &env)
                .with_context(|| format!("failed to convert {}", args.config.display()))?;
            println!("✅ Wrote parameter file {}", args.output.display());
        }
    }
    Ok(())
}

fn load_parameter(args: &ParamArgs) -> Result<PmpParameter> {
    let mut parameter = read_parameter(&args.param)?;
    for (name, value) in &args.overrides {
        info!(name = %name, "overriding parameter");
        parameter.set(name.clone(), value.clone());
    }
    Ok(parameter)
}

fn read_parameter(path: &Path) -> Result<PmpParameter> {
    PmpParameter::from_file(path).with_context(|| format!("failed to read parameter file {}", path.display()))
}
