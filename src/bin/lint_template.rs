//! Lint template files: unregistered functions, unknown arguments, unaligned bits, etc.
//!
//! Usage:
//!   lint_template [OPTIONS] FILE.xml...
//!
//! Functions are checked against the general-purpose and MQTT sets unless `--bare` is given.
//! Exit code 1 if any file fails to load or has error-level findings.

use clap::Parser;
use protoforge::lint::{lint, LintMessage, Severity};
use protoforge::{builtins, mqtt, FunctionRegistry};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lint_template")]
#[command(about = "Static checks for protoforge templates")]
struct Cli {
    /// Template files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Human-readable output
    #[arg(short = 'H', long)]
    human: bool,

    /// Check against an empty function registry
    #[arg(long)]
    bare: bool,
}

#[derive(Clone, Copy)]
enum OutputStyle {
    Compact,
    Human,
}

fn print_message(path: &str, m: &LintMessage, style: OutputStyle) {
    let severity_str = match m.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };
    let location = match &m.tag {
        Some(tag) => format!("{}:<{}>", path, tag),
        None => path.to_string(),
    };
    match style {
        OutputStyle::Compact => {
            println!("{}: {}: {} [{}]", location, severity_str, m.message, m.rule.id());
        }
        OutputStyle::Human => {
            println!("  {}: {}", location, m.message);
            println!("    rule: {} ({})", m.rule.id(), severity_str);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::init();
    let style = if cli.human { OutputStyle::Human } else { OutputStyle::Compact };

    let mut registry = FunctionRegistry::new();
    if !cli.bare {
        builtins::register(&mut registry)?;
        mqtt::register(&mut registry)?;
    }

    let mut has_error = false;
    let mut total_warnings = 0usize;
    let mut total_errors = 0usize;

    for path in &cli.files {
        let display_path = path.display().to_string();
        let doc = match protoforge::load_file(path) {
            Ok(doc) => doc,
            Err(e) => {
                eprintln!("{}: {}", display_path, e);
                has_error = true;
                continue;
            }
        };
        let messages = lint(&doc, &registry);
        for m in &messages {
            match m.severity {
                Severity::Error => total_errors += 1,
                Severity::Warning => total_warnings += 1,
            }
            print_message(&display_path, m, style);
        }
        if messages.iter().any(|m| m.severity == Severity::Error) {
            has_error = true;
        }
    }

    if total_errors > 0 || total_warnings > 0 {
        eprintln!("lint: {} error(s), {} warning(s)", total_errors, total_warnings);
    }
    if has_error {
        std::process::exit(1);
    }
    Ok(())
}
