use argh::FromArgs;
use shell_blocks::Interpreter;
use shell_blocks::input::ScriptSource;
use std::fs::File;
use std::io::{BufReader, Cursor};
use tracing::Level;

#[derive(FromArgs)]
/// A small shell with redirections and if/elif/else/fi blocks.
struct Args {
    #[argh(option, short = 'c')]
    /// run COMMAND and exit with its status.
    command: Option<String>,

    #[argh(switch, short = 'v')]
    /// log parsing and dispatch decisions to stderr.
    verbose: bool,

    #[argh(switch)]
    /// log everything, including tokenization, to stderr.
    trace: bool,

    #[argh(positional)]
    /// script file to run instead of reading from the terminal.
    script: Option<String>,
}

fn init_logging(args: &Args) {
    let level = if args.trace {
        Level::TRACE
    } else if args.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args: Args = argh::from_env();
    init_logging(&args);

    let mut sh = Interpreter::default();
    let status = if let Some(command) = args.command {
        sh.run_source(&mut ScriptSource::new(Cursor::new(command.into_bytes())))
    } else if let Some(path) = args.script {
        match File::open(&path) {
            Ok(file) => sh.run_source(&mut ScriptSource::new(BufReader::new(file))),
            Err(err) => {
                eprintln!("shell: {}: {}", path, err);
                127
            }
        }
    } else {
        match sh.repl() {
            Ok(status) => status,
            Err(err) => {
                eprintln!("shell: {}", err);
                1
            }
        }
    };

    std::process::exit(status);
}
