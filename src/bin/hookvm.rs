//! CLI wrapper for the hookvm runtime.
//!
//! Usage:
//!   hookvm <file>                      # Run a script in the tool context
//!   hookvm -e "code"                   # Evaluate a snippet
//!   hookvm --config cfg.json <file>    # Load engine settings first
//!   hookvm                             # Start REPL (interactive mode)
//!
//! Set `HOOKVM_LOG` to one of `error`, `warn`, `info`, `debug`, `trace` to
//! get engine logs on stderr.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process;

use hookvm::runner::api::Runtime;
use hookvm::runner::ds::value::Value;
use hookvm::runner::plugin::config::EngineConfig;
use log::{LevelFilter, Log, Metadata, Record};

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging() {
    let level = match env::var("HOOKVM_LOG") {
        Ok(value) => value.parse().unwrap_or(LevelFilter::Warn),
        Err(_) => LevelFilter::Off,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn main() {
    init_logging();
    let mut args: Vec<String> = env::args().skip(1).collect();

    let mut config = EngineConfig::default();
    if args.len() >= 2 && args[0] == "--config" {
        config = match EngineConfig::load(Path::new(&args[1])) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config '{}': {}", args[1], e);
                process::exit(1);
            }
        };
        args.drain(..2);
    }

    match args.len() {
        0 => run_repl(config),
        1 if args[0] == "-h" || args[0] == "--help" => {
            print_usage();
            process::exit(0);
        }
        1 => run_file(config, &args[0]),
        2 if args[0] == "-e" || args[0] == "--eval" => eval_code(config, &args[1]),
        _ => {
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("hookvm - closure hooking runtime");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  hookvm [--config <file.json>] <file>        Run a script");
    eprintln!("  hookvm [--config <file.json>] -e \"code\"     Evaluate a snippet");
    eprintln!("  hookvm [--config <file.json>]               Start REPL (interactive mode)");
}

/// Scripts print through the runtime, so echo its output as we go.
fn runtime_for(mut config: EngineConfig) -> Runtime {
    config.echo_output = true;
    Runtime::with_config(config)
}

fn print_results(values: &[Value]) {
    if !values.is_empty() {
        let line = values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        println!("{}", line.join("\t"));
    }
}

fn run_file(config: EngineConfig, filename: &str) {
    let source = match fs::read_to_string(filename) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", filename, e);
            process::exit(1);
        }
    };
    let mut rt = runtime_for(config);
    if let Err(e) = rt.exec(&source) {
        eprintln!("Runtime error: {}", e);
        process::exit(1);
    }
}

fn eval_code(config: EngineConfig, code: &str) {
    let mut rt = runtime_for(config);
    match rt.exec(code) {
        Ok(values) => print_results(&values),
        Err(e) => {
            eprintln!("Runtime error: {}", e);
            process::exit(1);
        }
    }
}

fn run_repl(config: EngineConfig) {
    println!("hookvm v{}", env!("CARGO_PKG_VERSION"));
    println!("Type code and press Enter. Type .exit to quit.");
    println!();

    let mut rt = runtime_for(config);
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        if stdout.flush().is_err() {
            break;
        }

        let mut input = String::new();
        match stdin.read_line(&mut input) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                break;
            }
        }

        let input = input.trim();
        if input == ".exit" || input == ".quit" {
            break;
        }
        if input.is_empty() {
            continue;
        }

        match rt.exec(input) {
            Ok(values) => print_results(&values),
            Err(e) => eprintln!("Runtime error: {}", e),
        }
        if let Err(e) = rt.collect_garbage() {
            eprintln!("Runtime error: {}", e);
        }
    }

    println!("Goodbye!");
}
