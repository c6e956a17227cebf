use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use sxpj::builtinops::{find_builtin_op, get_builtin_ops};
use sxpj::{Evaluator, NullFields};
use tracing_subscriber::EnvFilter;

fn main() -> rustyline::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    println!("SexpyJSON REPL v{}", env!("CARGO_PKG_VERSION"));
    println!("Type expressions to evaluate them, :help for commands, or Ctrl+D to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let mut evaluator = Evaluator::new();

    loop {
        match rl.readline("sxpj> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                // Add the line to history
                let _ = rl.add_history_entry(line);

                // Handle special commands
                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":names" => {
                        print_names(&evaluator);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                // Definitions made by a successful line stay visible to later lines
                match sxpj::parse(line) {
                    Ok(parsed) => match evaluator.evaluate(&parsed) {
                        Ok(output) => print_output(&output.to_json(NullFields::Keep)),
                        Err(e) => println!("Error: {}", e),
                    },
                    Err(e) => println!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted. Use Ctrl+D or :quit to exit.");
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }
    Ok(())
}

fn print_output(json: &serde_json::Value) {
    match serde_json::to_string_pretty(json) {
        Ok(text) => println!("{}", text),
        Err(e) => println!("Error: {}", e),
    }
}

fn print_help() {
    println!("SexpyJSON REPL Commands:");
    println!("  :help    - Show this help message");
    println!("  :names   - Show names defined in this session");
    println!("  :quit    - Exit the interpreter");
    println!("  :exit    - Exit the interpreter");
    println!();
    println!("Any JSON value is an expression; (f a b) calls f anywhere a value may appear.");
    println!("  Literals: 42, 3.14, \"text\", true, null, [1, 2], {{\"k\": 1}}");
    println!("  Comments: # to end of line");
    println!();
    let describe = |special: bool| {
        get_builtin_ops()
            .iter()
            .filter(|op| op.is_special_form() == special)
            .map(|op| format!("{}/{}", op.id, op.arity))
            .collect::<Vec<_>>()
            .join(" ")
    };
    println!("Special forms: {}", describe(true));
    println!("Functions: {}", describe(false));
    println!("  (name/arity: n exactly, n+ at least, even for pairs, any)");
    println!();
    println!("Examples:");
    println!("  (+ 1 2 3)");
    println!("  (define square (fn [x] (* x x)))");
    println!("  {{\"area\": (square 5), \"ok\": (> (square 5) 20)}}");
    println!("  (map (fn [c] (if (eq c \"a\") \"o\" c)) \"banana\")");
}

fn print_names(evaluator: &Evaluator) {
    let user_names: Vec<String> = evaluator
        .names()
        .into_iter()
        .filter(|name| find_builtin_op(name.name()).is_none())
        .map(|name| name.to_string())
        .collect();
    if user_names.is_empty() {
        println!("(no names defined)");
    } else {
        println!("{}", user_names.join(" "));
    }
}
