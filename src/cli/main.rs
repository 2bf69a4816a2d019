use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{info, LevelFilter};
use std::io::{self, BufRead, Write};
use std::path::Path;

use wordvm::{load_program_file, Memory, Processor, StdConsole, TraceLog, MEMORY_SIZE};

const PROGRAM_PATH: &str = "PROGRAM_PATH";
const VERBOSITY: &str = "verbosity";

fn cli() -> Command {
    // Hack to make the build dirty when the toml changes.
    include_str!("../../Cargo.toml");

    clap::command!()
        .arg(Arg::new(PROGRAM_PATH)
            .help("The path to the program file to run. If omitted, a \
                   filename is prompted for interactively.")
            .action(ArgAction::Set))
        .arg(Arg::new(VERBOSITY)
            .help("Specify up to three times to increase the verbosity of output.")
            .short('v')
            .long("verbose")
            .action(ArgAction::Count)
            .value_parser(value_parser!(u8).range(..=3)))
}

fn logging_format(formatter: &mut env_logger::fmt::Formatter,
                  record: &log::Record) -> io::Result<()> {
    writeln!(formatter, "{:>7}  {}", record.level(), record.args())
}

/// Logging setup for normal build (not testing).
#[cfg(not(test))]
fn init_logging(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .format(logging_format)
        .init();
}

/// Logging setup for testing build (properly captures stdout and ignores
/// multiple invocations).
#[cfg(test)]
fn init_logging(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .format(logging_format)
        .is_test(true)
        .try_init();
}

/// Print a prompt and read one trimmed line from stdin. `None` means EOF.
fn read_line_trimmed(prompt: &str) -> io::Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Ask for a program filename until an existing file is named. Returns
/// `None` when the user declines to retry (or stdin closes).
fn prompt_for_program() -> io::Result<Option<String>> {
    loop {
        let filename = match read_line_trimmed("Enter program filename: ")? {
            Some(filename) => filename,
            None => return Ok(None),
        };
        if filename.is_empty() {
            eprintln!("Error: Filename cannot be empty");
            continue;
        }
        if Path::new(&filename).exists() {
            return Ok(Some(filename));
        }
        eprintln!("Error: File '{}' does not exist.", filename);
        let retry = read_line_trimmed("Would you like to try again? (y/n): ")?
            .map(|response| response.to_lowercase());
        match retry.as_deref() {
            Some("y") | Some("yes") => continue,
            _ => {
                println!("Exiting program.");
                return Ok(None);
            }
        }
    }
}

/// Main run function; returns an exit code.
fn run(args: ArgMatches) -> u8 {
    return match _run(args) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    };

    fn _run(args: ArgMatches) -> Result<(), String> {
        // Set up logging.
        let log_level = match args.get_count(VERBOSITY) {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            3 => LevelFilter::Trace,
            _ => unreachable!(),
        };
        init_logging(log_level);

        // Find the program to run.
        let path = match args.get_one::<String>(PROGRAM_PATH) {
            Some(path) => path.clone(),
            None => {
                match prompt_for_program()
                    .map_err(|e| format!("Failed to read filename: {}", e))?
                {
                    Some(path) => path,
                    None => return Ok(()),  // The user chose to exit.
                }
            }
        };

        // Load the program image.
        let mut memory = Memory::new(MEMORY_SIZE);
        let entry = load_program_file(&path, &mut memory)
            .map_err(|e| format!("Failed to load program: {}", e))?;
        info!("Loaded '{}', entry point {:#06X}.", path, entry);

        // Run it. Runtime errors terminate the program via the error trace
        // and still exit 0; only load failures report through the exit code.
        let trace = TraceLog::open()
            .map_err(|e| format!("Failed to create processor: {}", e))?;
        let mut processor = Processor::new(memory, StdConsole, trace);
        processor.reset(entry);
        processor.run();
        info!("Processor finished (stopped={}, errored={}).",
              processor.stopped(), processor.errored());

        Ok(())
    }
}

fn main() {
    let args = cli().get_matches();
    std::process::exit(run(args).into());
}
