//! The reference front end (spec.md §6's CLI surface): `lily [-h] [-t] [-s SOURCE | FILE]`.

use std::io::Read as _;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use lily::lexer::LexMode;
use lily::Interpreter;

#[derive(Debug, ClapParser)]
#[command(name = "lily", about = "Run a lily program")]
struct Cli {
    /// Tagged mode: echo literal text verbatim until a `<?lily ... ?>` block.
    #[arg(short = 't', long = "tagged")]
    tagged: bool,
    /// Treat the positional argument as source text rather than a file path.
    #[arg(short = 's', long = "source")]
    source: bool,
    /// Source text (with `-s`) or a file path; reads stdin if omitted.
    input: Option<String>,
    /// Extra arguments exposed to the script as `sys::argv`.
    #[arg(trailing_var_arg = true)]
    argv: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (source, name, mode) = match (&cli.input, cli.source) {
        (Some(text), true) => (text.clone(), "<string>".to_string(), explicit_mode(cli.tagged)),
        (Some(path), false) => {
            let source = match std::fs::read_to_string(path) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("lily: could not read '{path}': {e}");
                    return ExitCode::FAILURE;
                }
            };
            let mode = if cli.tagged { LexMode::Tagged } else { explicit_mode_sniff(&source) };
            (source, path.clone(), mode)
        }
        (None, _) => {
            let mut source = String::new();
            if std::io::stdin().read_to_string(&mut source).is_err() {
                eprintln!("lily: could not read stdin");
                return ExitCode::FAILURE;
            }
            (source, "<stdin>".to_string(), explicit_mode(cli.tagged))
        }
    };

    let interp = match Interpreter::parse_special(source, name.clone(), mode, cli.argv) {
        Ok(interp) => interp,
        Err(err) => {
            eprintln!("{}", err.format_traceback(&name));
            return ExitCode::FAILURE;
        }
    };

    match interp.run(&name) {
        Ok(()) => ExitCode::SUCCESS,
        Err(traceback) => {
            eprintln!("{traceback}");
            ExitCode::FAILURE
        }
    }
}

fn explicit_mode(tagged: bool) -> LexMode {
    if tagged {
        LexMode::Tagged
    } else {
        LexMode::Untagged
    }
}

fn explicit_mode_sniff(source: &str) -> LexMode {
    if source.contains("<?lily") {
        LexMode::Tagged
    } else {
        LexMode::Untagged
    }
}
