//! `lumen`: evaluate a source file (or stdin) and print the last value.
//!
//! The runtime itself lives in `lumen-vm`; this binary only parses flags,
//! wires up logging, and renders the structured error report on failure.

use clap::Parser;
use lumen_analyzer::Analyzer;
use lumen_vm::dispatch::Invoker;
use lumen_vm::{Backend, Env, EnvConfig};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lumen", about = "A Clojure-dialect runtime with tree-walk and bytecode backends")]
struct Args {
    /// Source file to evaluate; stdin when omitted.
    file: Option<PathBuf>,

    /// Evaluate through the bytecode VM instead of the tree-walker.
    #[arg(long)]
    vm: bool,

    /// Force the tree-walking backend (the default).
    #[arg(long)]
    tree_walk: bool,

    /// Print bytecode for each top-level form instead of evaluating.
    #[arg(long)]
    disassemble: bool,

    /// Runtime configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `lumen_vm=trace`.
    #[arg(long, default_value = "warn")]
    log: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => match EnvConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error loading config {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => EnvConfig::default(),
    };
    if args.vm {
        config.backend = Backend::Vm;
    } else if args.tree_walk {
        config.backend = Backend::TreeWalk;
    }

    let (src, file_name) = match read_source(&args) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut env = match Env::with_config(config) {
        Ok(env) => env,
        Err(diag) => {
            eprintln!("{diag}");
            return ExitCode::FAILURE;
        }
    };

    if args.disassemble {
        return disassemble(&mut env, &src, &file_name);
    }

    match env.eval_str(&src, &file_name) {
        Ok(value) => match env.pr_value(&value) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(diag) => {
                eprintln!("{diag}");
                ExitCode::FAILURE
            }
        },
        Err(diag) => {
            eprintln!("{diag}");
            ExitCode::FAILURE
        }
    }
}

fn read_source(args: &Args) -> Result<(String, String), String> {
    match &args.file {
        Some(path) => {
            let src = std::fs::read_to_string(path).map_err(|e| format!("error reading {}: {e}", path.display()))?;
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("input").to_string();
            Ok((src, name))
        }
        None => {
            let mut src = String::new();
            std::io::stdin()
                .read_to_string(&mut src)
                .map_err(|e| format!("error reading stdin: {e}"))?;
            Ok((src, "stdin".to_string()))
        }
    }
}

/// One disassembly listing per top-level form, in the canonical
/// `OFFSET  OPCODE  OPERAND` shape.
fn disassemble(env: &mut Env, src: &str, file_name: &str) -> ExitCode {
    let forms = match lumen_vm::reader::read_all(src, file_name) {
        Ok(forms) => forms,
        Err(diag) => {
            eprintln!("{diag}");
            return ExitCode::FAILURE;
        }
    };
    for (i, form) in forms.iter().enumerate() {
        let node = {
            let mut invoker = Invoker {
                gc: &mut env.gc,
                dynamic: &mut env.dynamic,
            };
            let mut analyzer = Analyzer::new(&mut env.arena, &mut env.namespaces, file_name, &mut invoker);
            match analyzer.analyze(form) {
                Ok(node) => node,
                Err(diag) => {
                    eprintln!("{diag}");
                    return ExitCode::FAILURE;
                }
            }
        };
        let ns = Some(env.namespaces.current.clone());
        let proto = lumen_compiler::compile_toplevel(&env.arena, node, ns);
        println!(";; form {i}");
        print!("{}", lumen_compiler::disassemble_toplevel(&proto));
    }
    ExitCode::SUCCESS
}
