//! Generate protocol messages from a template.
//!
//! Usage:
//!   protoforge [OPTIONS] TEMPLATE
//!
//! Messages are written back to back to stdout (or `--output`), or sent over one TCP
//! connection with `--send host:port`. The general-purpose and MQTT function sets are
//! registered. `RUST_LOG` controls logging; `--verbose` defaults it to debug.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use protoforge::{builtins, dump, mqtt, transport, ChoiceLength, FunctionRegistry, Generator, GeneratorOptions};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

#[derive(Clone, Copy, ValueEnum)]
enum ChoiceLengthArg {
    /// Legacy: length of the content index
    Index,
    /// Length of the chosen value
    Value,
}

impl From<ChoiceLengthArg> for ChoiceLength {
    fn from(arg: ChoiceLengthArg) -> Self {
        match arg {
            ChoiceLengthArg::Index => ChoiceLength::Index,
            ChoiceLengthArg::Value => ChoiceLength::Value,
        }
    }
}

#[derive(Parser)]
#[command(name = "protoforge")]
#[command(about = "Generate randomized protocol messages from a template")]
#[command(version)]
struct Cli {
    /// Template file
    template: PathBuf,

    /// Number of messages to generate
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,

    /// Seed for reproducible output
    #[arg(short, long)]
    seed: Option<u64>,

    /// Write messages to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Send messages over TCP instead of writing them to stdout
    #[arg(long, value_name = "HOST:PORT")]
    send: Option<String>,

    /// Override the template's choice-length policy
    #[arg(long, value_enum)]
    choice_length: Option<ChoiceLengthArg>,

    /// Print each message as hex plus its resolved tree to stderr
    #[arg(short, long)]
    dump: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let doc = protoforge::load_file(&cli.template)
        .with_context(|| format!("loading {}", cli.template.display()))?;
    let mut registry = FunctionRegistry::new();
    builtins::register(&mut registry)?;
    mqtt::register(&mut registry)?;
    let options = GeneratorOptions {
        choice_length: cli.choice_length.map(ChoiceLength::from),
        ..GeneratorOptions::default()
    };
    let mut generator = Generator::with_options(doc, registry, options)?;
    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut messages = Vec::with_capacity(cli.count);
    for i in 0..cli.count {
        let bytes = generator
            .generate(&mut rng)
            .with_context(|| format!("generating message {}", i + 1))?;
        if cli.dump {
            eprintln!("# message {} ({} bytes)", i + 1, bytes.len());
            eprintln!("{}", dump::hex_string(&bytes));
            eprintln!("{}", dump::dump_tree(&generator));
        }
        messages.push(bytes);
    }

    if let Some(addr) = &cli.send {
        transport::send_all(addr.as_str(), &messages).with_context(|| format!("sending to {}", addr))?;
    }
    match &cli.output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            write_all(BufWriter::new(file), &messages)?;
        }
        None if cli.send.is_none() => write_all(io::stdout().lock(), &messages)?,
        None => {}
    }
    Ok(())
}

fn write_all<W: Write>(mut out: W, messages: &[Vec<u8>]) -> io::Result<()> {
    for message in messages {
        out.write_all(message)?;
    }
    out.flush()
}
