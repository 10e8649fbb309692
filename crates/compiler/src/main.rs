//! Minic compiler CLI.
//!
//! Command-line interface for compiling C-subset sources to executables
//! or inspecting the compiler's two artifacts (assembly, quadruples).

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use minicc::BuildConfig;

#[derive(ClapParser)]
#[command(name = "minicc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Minic compiler - compile a C subset to x86-64", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file to an executable
    Build {
        /// Input source file
        input: PathBuf,

        /// Output executable path (defaults to input filename without extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep the intermediate assembly file (.s)
        #[arg(long)]
        keep_asm: bool,

        /// Toolchain command used to assemble and link (overrides config)
        #[arg(long)]
        cc: Option<String>,

        /// Path to a build configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Emit the generated assembly
    EmitAsm {
        /// Input source file
        input: PathBuf,

        /// Output path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Emit the quadruple listing
    EmitQuads {
        /// Input source file
        input: PathBuf,

        /// Output path (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            keep_asm,
            cc,
            config,
        } => {
            let output = output.unwrap_or_else(|| {
                let stem = input.file_stem().unwrap_or_default();
                PathBuf::from(stem)
            });
            run_build(&input, &output, keep_asm, cc.as_deref(), config.as_deref());
        }
        Commands::EmitAsm { input, output } => {
            run_emit(&input, output.as_deref(), Artifact::Assembly);
        }
        Commands::EmitQuads { input, output } => {
            run_emit(&input, output.as_deref(), Artifact::Quadruples);
        }
        Commands::Completions { shell } => {
            run_completions(shell);
        }
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "minicc", &mut io::stdout());
}

enum Artifact {
    Assembly,
    Quadruples,
}

fn read_source(input: &Path) -> String {
    match fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {}: {}", input.display(), e);
            process::exit(1);
        }
    }
}

fn run_emit(input: &Path, output: Option<&Path>, artifact: Artifact) {
    let source = read_source(input);
    let compiled = match minicc::compile(&source) {
        Ok(compiled) => compiled,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let text = match artifact {
        Artifact::Assembly => {
            let mut text = compiled.assembly.join("\n");
            text.push('\n');
            text
        }
        Artifact::Quadruples => compiled.quadruple,
    };

    match output {
        Some(path) => {
            if let Err(e) = fs::write(path, text) {
                eprintln!("Error writing {}: {}", path.display(), e);
                process::exit(1);
            }
        }
        None => print!("{}", text),
    }
}

fn run_build(
    input: &Path,
    output: &Path,
    keep_asm: bool,
    cc_override: Option<&str>,
    config_path: Option<&Path>,
) {
    let mut config = match config_path {
        Some(path) => match BuildConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        },
        None => BuildConfig::default(),
    };
    if keep_asm {
        config.keep_asm = true;
    }
    if let Some(cc) = cc_override {
        config.cc = cc.to_string();
    }

    let source = read_source(input);
    let assembly = match minicc::compile_to_assembly(&source) {
        Ok(assembly) => assembly,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let asm_path = output.with_extension("s");
    if let Err(e) = fs::write(&asm_path, assembly) {
        eprintln!("Error writing {}: {}", asm_path.display(), e);
        process::exit(1);
    }

    // The core never shells out; assembling and linking live here in
    // the driver, behind an external C toolchain.
    let mut command = process::Command::new(&config.cc);
    command.arg(&asm_path).arg("-o").arg(output);
    for arg in &config.extra_cc_args {
        command.arg(arg);
    }

    let status = match command.status() {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error running {}: {}", config.cc, e);
            process::exit(1);
        }
    };

    if !config.keep_asm {
        fs::remove_file(&asm_path).ok();
    }

    if !status.success() {
        eprintln!("Error: {} exited with {}", config.cc, status);
        process::exit(1);
    }

    println!("Compiled {} -> {}", input.display(), output.display());
    if config.keep_asm {
        println!("Assembly saved to {}", asm_path.display());
    }
}
