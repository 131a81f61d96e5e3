//! netc command-line driver.
//!
//! Provides the `netc` binary. `compile` builds a topology read from a JSON
//! file and prints a machine-readable summary; `dump` builds it and prints
//! the textual graph dump (optionally filtered by primitive type) followed
//! by the memory dependencies.
//!
//! Log output goes to stderr and is controlled by the `NETC_LOG` environment
//! variable (e.g. `NETC_LOG=netc_opt=debug`).

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use netc_core::{
    BuildOptions, LoadError, MemoryDependencyStrategy, PrimitiveType, QueueType, Topology,
};
use netc_opt::{build_program, CompiledProgram, NullBackend, OptError};

/// Graph-level network compiler.
#[derive(Parser)]
#[command(name = "netc", about = "Graph-level network compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Build a topology and print a JSON summary.
    Compile {
        #[command(flatten)]
        build: BuildArgs,
    },
    /// Build a topology and print the graph dump.
    Dump {
        #[command(flatten)]
        build: BuildArgs,

        /// Only list nodes of this primitive type (e.g. `convolution`).
        #[arg(long)]
        filter: Option<String>,

        /// Print node names only, without edges, layouts and flags.
        #[arg(long)]
        brief: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Basic,
    SkippedBranchAware,
    OutOfOrderAware,
}

impl From<StrategyArg> for MemoryDependencyStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Basic => MemoryDependencyStrategy::Basic,
            StrategyArg::SkippedBranchAware => MemoryDependencyStrategy::SkippedBranchAware,
            StrategyArg::OutOfOrderAware => MemoryDependencyStrategy::OutOfOrderAware,
        }
    }
}

/// Inputs and option overrides shared by all subcommands.
#[derive(Args)]
struct BuildArgs {
    /// Path to the topology JSON file.
    #[arg(short, long)]
    topology: PathBuf,

    /// Path to a build options JSON file. Flags below override it.
    #[arg(short, long)]
    options: Option<PathBuf>,

    /// Debug build: order checks after every pass, all buffers kept.
    #[arg(long)]
    debug: bool,

    /// Skip optimization and graph compilation.
    #[arg(long)]
    no_opt: bool,

    /// Target an out-of-order execution queue.
    #[arg(long)]
    out_of_order: bool,

    /// Memory dependency strategy (default: chosen by queue type).
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Pass to skip; may be repeated.
    #[arg(long = "disable")]
    disabled_passes: Vec<String>,

    /// Write a graph dump after every pass into this directory.
    #[arg(long)]
    dump_dir: Option<PathBuf>,
}

impl BuildArgs {
    fn load(&self) -> Result<(Topology, BuildOptions), LoadError> {
        let topology = Topology::load(&self.topology)?;
        let mut options = match &self.options {
            Some(path) => BuildOptions::from_json_file(path)?,
            None => BuildOptions::default(),
        };
        options.debug |= self.debug;
        options.no_optimizations |= self.no_opt;
        if self.out_of_order {
            options.queue_type = QueueType::OutOfOrder;
        }
        if let Some(strategy) = self.strategy {
            options.memory_dependency_strategy = Some(strategy.into());
        }
        options
            .disabled_passes
            .extend(self.disabled_passes.iter().cloned());
        if self.dump_dir.is_some() {
            options.graph_dumps_dir = self.dump_dir.clone();
        }
        Ok((topology, options))
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("NETC_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Compile { build } => run_compile(&build),
        Commands::Dump {
            build,
            filter,
            brief,
        } => run_dump(&build, filter.as_deref(), brief),
    };
    process::exit(exit_code);
}

/// Loads the inputs and builds the program.
///
/// Exit codes on failure: 1 = build error, 2 = invalid arguments,
/// 3 = I/O error.
fn build(args: &BuildArgs) -> Result<CompiledProgram, i32> {
    let (topology, options) = args.load().map_err(|e| {
        eprintln!("Error: {}", e);
        load_exit_code(&e)
    })?;
    tracing::info!(
        topology = %args.topology.display(),
        primitives = topology.primitives.len(),
        "loaded topology"
    );
    build_program(&topology, options, &mut NullBackend).map_err(|e| {
        match &e {
            OptError::Dump(io) => {
                eprintln!("I/O error: {}", io);
                return 3;
            }
            OptError::InvariantViolation { .. } => eprintln!("Internal error: {}", e),
            _ => eprintln!("Build error: {}", e),
        }
        1
    })
}

/// A malformed input file is a build error; an unreadable one is I/O.
fn load_exit_code(err: &LoadError) -> i32 {
    match err {
        LoadError::Parse { .. } => 1,
        LoadError::Read { .. } => 3,
    }
}

fn run_compile(args: &BuildArgs) -> i32 {
    let program = match build(args) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let ids = |keys: &[netc_core::NodeKey]| -> Vec<String> {
        keys.iter().map(|&k| program[k].id().to_string()).collect()
    };
    let order: Vec<String> = program
        .processing_order()
        .iter()
        .map(|k| program[k].id().to_string())
        .collect();
    let summary = serde_json::json!({
        "program": program.prog_id(),
        "nodes": program.node_count(),
        "processing_order": order,
        "inputs": ids(program.inputs()),
        "outputs": ids(program.outputs()),
        "optimized_out": program.optimized_out(),
    });
    let json = serde_json::to_string_pretty(&summary)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize summary: {}\"}}", e));
    println!("{}", json);
    0
}

fn run_dump(args: &BuildArgs, filter: Option<&str>, brief: bool) -> i32 {
    let ty = match filter.map(parse_primitive_type).transpose() {
        Ok(ty) => ty,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return 2;
        }
    };
    let program = match build(args) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let by_type = |node: &netc_core::ProgramNode| ty.map_or(true, |t| node.is_type(t));
    print!("{}", program.dump("build", !brief, Some(&by_type)));
    print!("{}", program.memory_dependencies_string());
    0
}

/// Parse a primitive type name as used in topology files.
fn parse_primitive_type(s: &str) -> Result<PrimitiveType, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| format!("unknown primitive type '{}'", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(topology: PathBuf) -> BuildArgs {
        BuildArgs {
            topology,
            options: None,
            debug: false,
            no_opt: false,
            out_of_order: false,
            strategy: None,
            disabled_passes: Vec::new(),
            dump_dir: None,
        }
    }

    #[test]
    fn malformed_topology_is_a_build_error() {
        let dir = std::env::temp_dir().join(format!("netc_cli_test_{}", process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(build(&args(path)).unwrap_err(), 1);
        assert_eq!(build(&args(dir.join("missing.json"))).unwrap_err(), 3);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn flags_override_options_file() {
        let dir = std::env::temp_dir().join(format!("netc_cli_opts_{}", process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let topology = dir.join("net.json");
        std::fs::write(&topology, r#"{ "primitives": [] }"#).unwrap();
        let options = dir.join("options.json");
        std::fs::write(&options, r#"{ "disabled_passes": ["trim_to_outputs"] }"#).unwrap();

        let mut cli = args(topology);
        cli.options = Some(options);
        cli.out_of_order = true;
        cli.strategy = Some(StrategyArg::Basic);
        cli.disabled_passes = vec!["prepare_padding".to_string()];
        let (_, opts) = cli.load().unwrap();
        assert_eq!(opts.queue_type, QueueType::OutOfOrder);
        assert_eq!(opts.memory_dependency_strategy(), MemoryDependencyStrategy::Basic);
        assert!(!opts.is_pass_enabled("trim_to_outputs"));
        assert!(!opts.is_pass_enabled("prepare_padding"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn primitive_type_names_match_topology_files() {
        assert_eq!(parse_primitive_type("convolution"), Ok(PrimitiveType::Convolution));
        assert!(parse_primitive_type("conv2d").is_err());
    }
}
