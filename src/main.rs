use std::{fs, path::Path, path::PathBuf, process};

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use goxvm::bytecode::disasm::{print_module, print_stats};
use goxvm::bytecode::{IrModule, load_ir_from_string};
use goxvm::runtime::{StackMachine, VmConfig};

/// Gox IR toolchain: run, inspect and convert IR modules.
#[derive(Parser)]
#[command(name = "goxvm", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a module (.ir text or .irb binary)
    Run {
        module: PathBuf,

        /// Function to start from
        #[arg(long, default_value = "main")]
        entry: String,

        /// TOML file with machine limits
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the result and globals to stderr after a successful run
        #[arg(long)]
        snapshot: bool,
    },

    /// Print the textual form of a module
    Dump { module: PathBuf },

    /// Print a disassembly listing
    Disasm {
        module: PathBuf,

        /// Also print instruction statistics
        #[arg(long)]
        stats: bool,
    },

    /// Write the binary form of a text module
    Encode {
        module: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() {
    // RUST_LOG controls verbosity; stdout is reserved for program output.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .compact()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            module,
            entry,
            config,
            snapshot,
        } => run_module(&module, &entry, config.as_deref(), snapshot),
        Command::Dump { module } => println!("{}", read_module(&module).dump()),
        Command::Disasm { module, stats } => {
            let module = read_module(&module);
            print_module(&module);
            if stats {
                print_stats(&module);
            }
        }
        Command::Encode { module, output } => encode_module(&module, &output),
    }
}

fn fail(message: String) -> ! {
    eprintln!("{}", message);
    process::exit(1);
}

fn read_module(path: &Path) -> IrModule {
    let binary = path.extension().and_then(|e| e.to_str()) == Some("irb");

    if binary {
        let bytes = fs::read(path)
            .unwrap_or_else(|e| fail(format!("Failed to read '{}': {}", path.display(), e)));
        IrModule::from_bytes(&bytes)
            .unwrap_or_else(|e| fail(format!("Invalid module '{}': {}", path.display(), e)))
    } else {
        let text = fs::read_to_string(path)
            .unwrap_or_else(|e| fail(format!("Failed to read '{}': {}", path.display(), e)));
        load_ir_from_string(&text)
            .unwrap_or_else(|e| fail(format!("Load error in '{}': {}", path.display(), e)))
    }
}

fn run_module(path: &Path, entry: &str, config: Option<&Path>, snapshot: bool) {
    let config = match config {
        Some(config) => VmConfig::load(config).unwrap_or_else(|e| fail(e.to_string())),
        None => VmConfig::default(),
    };

    let module = read_module(path);
    let mut vm = StackMachine::with_config(config);

    if let Err(e) = vm.load(module) {
        fail(format!("Load error: {}", e));
    }

    match vm.run(entry) {
        Ok(value) => {
            if snapshot {
                eprintln!("result: {}", value);
                for (name, value) in vm.globals() {
                    eprintln!("  {} = {}", name, value);
                }
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("machine state:\n{}", e.snapshot);
            process::exit(1);
        }
    }
}

fn encode_module(path: &Path, output: &Path) {
    let module = read_module(path);
    let bytes = module
        .to_bytes()
        .unwrap_or_else(|e| fail(format!("Encode error: {}", e)));

    if let Err(e) = fs::write(output, bytes) {
        fail(format!("Failed to write '{}': {}", output.display(), e));
    }
}
