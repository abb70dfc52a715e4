mod builtins;
mod config;
mod env;
mod error;
mod eval;
mod expand;
mod heap;
mod reader;
mod repl;
mod symbol;
mod value;

use clap::Parser;
use error::Error;
use eval::Interp;
use repl::ReplHelper;
use rustyline::error::ReadlineError;
use rustyline::{Config, Editor};

/// Lisp interpreter with a mark-and-sweep heap
#[derive(Parser, Debug)]
#[command(name = "marklisp")]
#[command(version = config::VERSION)]
#[command(about = "A small Lisp with lexical closures, macros, TCO, and a custom GC")]
struct CliArgs {
    /// Startup tokens; `no-initialize` skips loading core.lisp, anything
    /// else is ignored
    #[arg(value_name = "TOKEN")]
    tokens: Vec<String>,
}

fn main() {
    let args = CliArgs::parse();

    let mut interp = match Interp::new() {
        Ok(interp) => interp,
        Err(e) => {
            println!("Fatal error: {e}");
            std::process::exit(1);
        }
    };

    if !args.tokens.iter().any(|t| t == "no-initialize") {
        let bootstrap = format!(
            "(do (println \"Loding core file...\") (println (load \"{}\")))",
            config::CORE_FILE
        );
        match interp.eval_source(&bootstrap) {
            Ok(_) => {}
            Err(Error::HeapExhausted) => {
                println!("Fatal error: {}", Error::HeapExhausted);
                std::process::exit(1);
            }
            Err(e) => println!("Fatal error: {e}"),
        }
    }

    match run_repl(&mut interp) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// The interactive loop. Expressions are read (spanning lines until
/// balanced), macro-expanded, evaluated, and printed in display form.
/// Returning the symbol `exit` ends the session; a parse failure ends it
/// after printing `Parse failed.`; heap exhaustion is fatal.
fn run_repl(interp: &mut Interp) -> Result<i32, ReadlineError> {
    let config = Config::builder().auto_add_history(true).build();
    let mut rl = Editor::with_config(config)?;
    rl.set_helper(Some(ReplHelper));

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let mut rest = line.as_str();
                loop {
                    match reader::parse_one(rest) {
                        Ok(None) => break,
                        Ok(Some((sexp, after))) => {
                            rest = after;
                            match interp.run_form(&sexp) {
                                Ok(v) if interp.is_exit(v) => return Ok(0),
                                Ok(v) => println!("{}", value::display(&interp.heap, v)),
                                Err(Error::HeapExhausted) => {
                                    println!("Fatal error: {}", Error::HeapExhausted);
                                    return Ok(1);
                                }
                                Err(e) => println!("Fatal error: {e}"),
                            }
                        }
                        Err(_) => {
                            println!("Parse failed.");
                            return Ok(0);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => return Ok(0),
            Err(e) => return Err(e),
        }
    }
}
