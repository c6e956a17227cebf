//! Command-line evaluator: runs each expression in order on one evaluator and prints the
//! last result as JSON.

use std::io::Read;
use std::process::ExitCode;

use clap::Parser;
use sxpj::{Evaluator, EvaluatorConfig, NullFields, OutputValue};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sxpj")]
#[command(version, about = "Evaluate SexpyJSON expressions and print the result as JSON")]
struct Cli {
    /// Expressions to evaluate in order (use - to read one from stdin)
    #[arg(required = true)]
    expressions: Vec<String>,

    /// Print JSON on a single line
    #[arg(short, long)]
    compact: bool,

    /// Order object members by name
    #[arg(short, long)]
    sort_keys: bool,

    /// Omit object members whose value is null
    #[arg(short, long)]
    drop_nulls: bool,

    /// Maximum nesting of function bodies and literal arrays/objects
    #[arg(long, default_value_t = sxpj::DEFAULT_MAX_CALL_DEPTH)]
    max_depth: usize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<String, Box<dyn std::error::Error>> {
    let mut evaluator = Evaluator::with_config(EvaluatorConfig {
        max_call_depth: Some(cli.max_depth),
    });

    let mut last = OutputValue::Null;
    for (index, source) in cli.expressions.iter().enumerate() {
        let source = if source == "-" {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        } else {
            source.clone()
        };
        debug!(index, "evaluating argument");
        let parsed = sxpj::parse(&source)?;
        last = evaluator.evaluate(&parsed)?;
    }

    let null_fields = if cli.drop_nulls {
        NullFields::Drop
    } else {
        NullFields::Keep
    };
    let mut json = last.to_json(null_fields);
    if cli.sort_keys {
        json = sxpj::json::sort_keys(json);
    }
    let text = if cli.compact {
        serde_json::to_string(&json)?
    } else {
        serde_json::to_string_pretty(&json)?
    };
    Ok(text)
}
