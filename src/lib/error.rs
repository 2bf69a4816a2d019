use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;

/// Runtime errors raised by the execution engine. Any of these terminates
/// the current run; none is recoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// Memory access outside the valid range.
    OutOfBounds { address: usize },
    /// Instruction pointer outside the valid range at fetch.
    InvalidIp { ip: u16 },
    /// Unknown or zero opcode at fetch.
    InvalidOpcode { ip: u16, opcode: u8 },
    /// Register index outside the register file.
    InvalidRegister { index: u8 },
    /// Integer or float division with a zero divisor.
    DivByZero,
    /// Malformed console input.
    IoError(String),
}

pub type VmResult<T> = Result<T, VmError>;

impl Display for VmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            VmError::OutOfBounds { address } => {
                write!(f, "memory access out of bounds: {:#X}", address)
            }
            VmError::InvalidIp { ip } => {
                write!(f, "invalid instruction pointer: {:#X}", ip)
            }
            VmError::InvalidOpcode { ip, opcode } => {
                write!(f, "invalid opcode at {:#X}: {}", ip, opcode)
            }
            VmError::InvalidRegister { index } => {
                write!(f, "invalid register index: {}", index)
            }
            VmError::DivByZero => write!(f, "division by zero"),
            VmError::IoError(message) => write!(f, "{}", message),
        }
    }
}

impl Error for VmError {}

/// A loader failure, pinned to the offending line of the program file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line_number: usize,
    pub line: String,
    pub message: String,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}\nContent: {}", self.line_number, self.message, self.line)
    }
}

impl Error for ParseError {}

/// Errors produced while loading a program.
#[derive(Debug)]
pub enum LoadError {
    Parse(ParseError),
    Io(io::Error),
}

pub type LoadResult<T> = Result<T, LoadError>;

impl Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Parse(e) => write!(f, "{}", e),
            LoadError::Io(e) => write!(f, "error reading file: {}", e),
        }
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LoadError::Parse(e) => Some(e),
            LoadError::Io(e) => Some(e),
        }
    }
}

impl From<ParseError> for LoadError {
    fn from(e: ParseError) -> Self {
        LoadError::Parse(e)
    }
}

impl From<io::Error> for LoadError {
    fn from(e: io::Error) -> Self {
        LoadError::Io(e)
    }
}
