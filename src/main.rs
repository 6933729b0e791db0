//! looproll - roll unrolled straight-line code back into loops
//!
//! # Usage
//!
//! ```bash
//! # Roll every function of a module and write the result
//! looproll roll module.json -o rolled.json
//!
//! # Force rolling, enable region rolling and dump aligned graphs
//! looproll roll module.json --always-roll --extensions --dot-dir graphs
//!
//! # Print a module as text
//! looproll dump module.json
//! ```

use clap::{Parser, Subcommand};
use roller::ir::dump::dump_module;
use roller::ir::optimization::{OptimizationPass, PassManager};
use roller::ir::validation::validate_module;
use roller::ir::IrModule;
use roller::{logging, LoopRollingPass, RollingConfig};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "looproll")]
#[command(version = "0.1.0")]
#[command(about = "Loop rolling over straight-line SSA code", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Roll the functions of a JSON module
    Roll {
        /// Path to the module
        file: PathBuf,

        /// Output file path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration file with a [rolling] section
        #[arg(long)]
        config: Option<PathBuf>,

        /// Roll whenever possible, ignoring the cost model
        #[arg(long)]
        always_roll: bool,

        /// Required size reduction before a loop is kept
        #[arg(long)]
        threshold: Option<i64>,

        /// Loads and stores only align when their alignment agrees
        #[arg(long)]
        match_alignment: bool,

        /// Enable min/max reductions and region rolling
        #[arg(long)]
        extensions: bool,

        /// Write a dot file per aligned graph into this directory
        #[arg(long)]
        dot_dir: Option<PathBuf>,

        /// Print rolling statistics
        #[arg(long)]
        stats: bool,

        /// Increase log verbosity (-v info, -vv debug, -vvv trace)
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,
    },

    /// Print a JSON module as text
    Dump {
        /// Path to the module
        file: PathBuf,
    },
}

/// Command-line switches layered over the configuration file
struct RollOptions {
    config: Option<PathBuf>,
    always_roll: bool,
    threshold: Option<i64>,
    match_alignment: bool,
    extensions: bool,
    dot_dir: Option<PathBuf>,
}

impl RollOptions {
    fn resolve(self) -> Result<RollingConfig, String> {
        let mut config = match &self.config {
            Some(path) => RollingConfig::load(path)?,
            None => RollingConfig::default(),
        };
        config.always_roll |= self.always_roll;
        config.match_alignment |= self.match_alignment;
        config.extensions |= self.extensions;
        if let Some(threshold) = self.threshold {
            config.size_threshold = threshold;
        }
        if self.dot_dir.is_some() {
            config.dump_graphs = self.dot_dir;
        }
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Roll {
            file,
            output,
            config,
            always_roll,
            threshold,
            match_alignment,
            extensions,
            dot_dir,
            stats,
            verbose,
        } => {
            logging::init_with_level(logging::level_for_verbosity(verbose));
            let options = RollOptions {
                config,
                always_roll,
                threshold,
                match_alignment,
                extensions,
                dot_dir,
            };
            options
                .resolve()
                .and_then(|config| roll_file(&file, output.as_deref(), config, stats))
        }
        Commands::Dump { file } => {
            logging::init();
            read_module(&file).map(|module| print!("{}", dump_module(&module)))
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn read_module(path: &Path) -> Result<IrModule, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    IrModule::from_json(&text)
}

fn roll_file(file: &Path, output: Option<&Path>, config: RollingConfig, stats: bool) -> Result<(), String> {
    let mut module = read_module(file)?;
    validate_module(&module).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        format!("{} is not valid: {}", file.display(), messages.join("; "))
    })?;

    let pass = LoopRollingPass::new(config);
    log::debug!("running {}", pass.name());
    let mut manager = PassManager::new();
    manager.add_pass(pass);
    let result = manager.run(&mut module);

    if let Err(errors) = validate_module(&module) {
        for error in &errors {
            log::warn!("rolled module fails verification: {}", error);
        }
        return Err(format!("rolling produced {} verification errors", errors.len()));
    }

    let json = module.to_json()?;
    match output {
        Some(path) => std::fs::write(path, json)
            .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?,
        None => println!("{}", json),
    }

    if stats {
        eprintln!("{}", "=".repeat(40));
        eprintln!("Rolling statistics");
        eprintln!("{}", "=".repeat(40));
        eprintln!("  modified: {}", result.modified);
        eprintln!("  instructions eliminated: {}", result.instructions_eliminated);
        eprintln!("  blocks eliminated: {}", result.blocks_eliminated);
        for (key, value) in result.sorted_stats() {
            eprintln!("  {}: {}", key, value);
        }
    }
    Ok(())
}
