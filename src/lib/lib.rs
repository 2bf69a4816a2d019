mod console;
mod error;
mod instruction;
mod loader;
mod memory;
mod processor;
mod psw;
mod word;

pub use console::{Console, ConsoleOutput, ScriptedConsole, StdConsole};
pub use error::{LoadError, LoadResult, ParseError, VmError, VmResult};
pub use instruction::{AddressMode, Instruction, Opcode, MAX_OPCODE};
pub use loader::{load_program, load_program_file};
pub use memory::{Memory, MEMORY_SIZE};
pub use processor::{Processor, TraceLog, NUM_REGISTERS};
pub use psw::Psw;
pub use word::{Word, WORD_BYTES};

/// Initialise logging for tests.
#[cfg(test)]
pub fn init_test_logging() {
    use std::io::Write;

    // The logger can only be initialised once and test order is arbitrary,
    // so repeat initialisation is ignored.
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("trace"))
        .format(|out, record| {
            writeln!(out, "{:>7} {}", record.level(), record.args())
        })
        .is_test(true)
        .try_init();
}
