use anyhow::{Context, Result};
use chrono::NaiveTime;
use clap::{Parser, Subcommand};
use egm_node::{
    simulate::{self, Scenario},
    Config,
};
use egm_validation::barcode::{secure_enhanced_barcode, standard_barcode, system_barcode};
use std::path::PathBuf;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(author, version, about = "EGM ticket validation engine.", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the validation number a policy would generate.
    Barcode {
        #[command(subcommand)]
        kind: BarcodeKind,
    },

    /// Validate a config file and exit.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },

    /// Run scripted cash-outs and redemptions against in-memory collaborators.
    Simulate {
        /// Config file (defaults apply when omitted).
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = 5)]
        cashouts: u32,

        #[arg(long, default_value_t = 1)]
        handpays: u32,

        #[arg(long, default_value_t = 3)]
        redemptions: u32,

        /// Seed for amounts and host decisions.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[derive(Subcommand, Debug)]
enum BarcodeKind {
    /// Standard validation from the amount and time of day.
    Standard {
        amount: u64,

        /// Time of day (HH:MM:SS).
        #[arg(long, value_parser = parse_time, default_value = "00:00:00")]
        time: NaiveTime,
    },

    /// Secure-enhanced validation from the machine validation id and sequence number.
    Secure { machine_id: u32, sequence: u64 },

    /// Host-assigned system validation.
    System { system_id: u8, number: u64 },
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M:%S").map_err(|err| format!("invalid time: {err}"))
}

fn init_tracing(level: Level, json: bool) {
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load(path: Option<&PathBuf>) -> Result<(Config, Level)> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let level = config.validate().context("invalid config")?;
    Ok((config, level))
}

fn main() {
    if let Err(err) = main_result() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn main_result() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Barcode { kind } => {
            let barcode = match kind {
                BarcodeKind::Standard { amount, time } => standard_barcode(amount, time),
                BarcodeKind::Secure {
                    machine_id,
                    sequence,
                } => secure_enhanced_barcode(machine_id, sequence),
                BarcodeKind::System { system_id, number } => system_barcode(system_id, number),
            };
            println!("{barcode}");
        }
        Command::CheckConfig { config } => {
            let (config, _) = load(Some(&config))?;
            println!("{config:#?}");
            println!("config ok");
        }
        Command::Simulate {
            config,
            cashouts,
            handpays,
            redemptions,
            seed,
        } => {
            let (config, level) = load(config.as_ref())?;
            init_tracing(level, config.json_logs);
            info!(mode = ?config.validation.mode, "loaded config");

            let scenario = Scenario {
                cashouts,
                handpays,
                redemptions,
                seed,
                machine_validation_id: config.validation.machine_validation_id.unwrap_or(1),
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start runtime")?;
            let report = runtime.block_on(simulate::run(config.validation, &scenario))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
