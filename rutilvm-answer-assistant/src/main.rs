use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::{
    fs,
    path::{Path, PathBuf},
};

use rutilvm_engine_setup::{
    answer::{AnswerFile, StorageKind},
    discovery::{parse_exports, parse_lun_records, parse_targets},
    settings::Settings,
};

/// This tool can be used to check hosted-engine answer files and to try the storage discovery
/// parsers on captured command output, without touching the host.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    ValidateAnswer(CommandValidateAnswer),
    ParseLuns(CommandParseLuns),
    ParseExports(CommandParseExports),
    ParseTargets(CommandParseTargets),
    Template(CommandTemplate),
}

/// Validate if an answer file is formatted correctly and fully resolved.
#[derive(Args, Debug)]
struct CommandValidateAnswer {
    /// Path to the answer file
    path: PathBuf,
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

/// Show the LUNs found in saved 'multipath -ll' output.
#[derive(Args, Debug)]
struct CommandParseLuns {
    /// File containing the output
    file: PathBuf,
}

/// Show the exports found in saved 'showmount -e' output.
#[derive(Args, Debug)]
struct CommandParseExports {
    /// File containing the output
    file: PathBuf,

    /// The output does not start with the 'Export list for ...' line
    #[arg(long, default_value_t = false)]
    no_header: bool,
}

/// Show the target names found in saved iSCSI discovery output.
#[derive(Args, Debug)]
struct CommandParseTargets {
    /// File containing the output
    file: PathBuf,
}

/// Print the answer file skeleton for a storage backend, with all placeholders unresolved.
#[derive(Args, Debug)]
struct CommandTemplate {
    /// Storage backend: fc, nfs or iscsi
    kind: StorageKind,

    /// Settings file to take the site defaults from
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let args = Cli::parse();
    let res = match &args.command {
        Commands::ValidateAnswer(args) => validate_answer(args),
        Commands::ParseLuns(args) => parse_luns(args),
        Commands::ParseExports(args) => show_exports(args),
        Commands::ParseTargets(args) => show_targets(args),
        Commands::Template(args) => template(args),
    };
    if let Err(err) = res {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn read_input(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))
}

fn validate_answer(args: &CommandValidateAnswer) -> Result<()> {
    let answer = AnswerFile::parse(&read_input(&args.path)?)
        .with_context(|| format!("{} is not a valid answer file", args.path.display()))?;
    if args.debug {
        println!("Parsed data from answer file:\n{:#?}", answer);
    }

    if answer.storage_kind().is_none() {
        bail!("no storage backend configured");
    }
    let unresolved = answer.unresolved();
    if !unresolved.is_empty() {
        bail!("unresolved placeholders: {}", unresolved.join(", "));
    }

    println!("The answer file was parsed successfully, no errors found!");
    Ok(())
}

fn parse_luns(args: &CommandParseLuns) -> Result<()> {
    let luns = parse_lun_records(&read_input(&args.file)?)?;
    println!("{}", serde_json::to_string_pretty(&luns)?);
    Ok(())
}

fn show_exports(args: &CommandParseExports) -> Result<()> {
    let exports = parse_exports(&read_input(&args.file)?, !args.no_header);
    println!("{}", serde_json::to_string_pretty(&exports)?);
    Ok(())
}

fn show_targets(args: &CommandParseTargets) -> Result<()> {
    let targets = parse_targets(&read_input(&args.file)?);
    println!("{}", serde_json::to_string_pretty(&targets)?);
    Ok(())
}

fn template(args: &CommandTemplate) -> Result<()> {
    let settings = match &args.config {
        Some(path) => Settings::load(path, true)?,
        None => Settings::default(),
    };

    let mut answer = AnswerFile::new();
    answer.init_base(&settings)?;
    answer.append_storage_template(args.kind)?;
    print!("{}", answer.render());
    Ok(())
}
