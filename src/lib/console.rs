use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use crate::error::{VmError, VmResult};

/// The blocking console used by the input/output instructions.
///
/// The processor is generic over this trait so that tests can script the
/// console instead of touching the real stdin/stdout.
pub trait Console {
    /// Read a decimal integer.
    fn read_int(&mut self) -> VmResult<i32>;
    /// Read a decimal float.
    fn read_float(&mut self) -> VmResult<f32>;
    /// Write an integer.
    fn write_int(&mut self, value: i32);
    /// Write a float.
    fn write_float(&mut self, value: f32);
}

/// The real console: prompts on stdout, blocks on stdin.
pub struct StdConsole;

impl StdConsole {
    fn read_line(prompt: &str) -> VmResult<String> {
        print!("{}", prompt);
        io::stdout()
            .flush()
            .map_err(|e| VmError::IoError(format!("console write failed: {}", e)))?;
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| VmError::IoError(format!("console read failed: {}", e)))?;
        Ok(line)
    }
}

impl Console for StdConsole {
    fn read_int(&mut self) -> VmResult<i32> {
        parse_int(&Self::read_line("Enter integer value: ")?)
    }

    fn read_float(&mut self) -> VmResult<f32> {
        parse_float(&Self::read_line("Enter float value: ")?)
    }

    fn write_int(&mut self, value: i32) {
        println!("Output: {}", value);
    }

    fn write_float(&mut self, value: f32) {
        println!("Output: {}", value);
    }
}

fn parse_int(line: &str) -> VmResult<i32> {
    line.trim()
        .parse()
        .map_err(|e| VmError::IoError(format!("invalid integer input: {}", e)))
}

fn parse_float(line: &str) -> VmResult<f32> {
    line.trim()
        .parse()
        .map_err(|e| VmError::IoError(format!("invalid float input: {}", e)))
}

/// A value written to a console.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleOutput {
    Int(i32),
    Float(f32),
}

/// A console fed from a fixed script of input lines, recording every output.
/// Stands in for `StdConsole` in tests.
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    inputs: VecDeque<String>,
    pub outputs: Vec<ConsoleOutput>,
}

impl ScriptedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an input line.
    pub fn push_input(&mut self, line: &str) {
        self.inputs.push_back(line.to_string());
    }

    fn next_input(&mut self) -> VmResult<String> {
        self.inputs
            .pop_front()
            .ok_or_else(|| VmError::IoError("no scripted input left".to_string()))
    }
}

impl Console for ScriptedConsole {
    fn read_int(&mut self) -> VmResult<i32> {
        let line = self.next_input()?;
        parse_int(&line)
    }

    fn read_float(&mut self) -> VmResult<f32> {
        let line = self.next_input()?;
        parse_float(&line)
    }

    fn write_int(&mut self, value: i32) {
        self.outputs.push(ConsoleOutput::Int(value));
    }

    fn write_float(&mut self, value: f32) {
        self.outputs.push(ConsoleOutput::Float(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("42\n").unwrap(), 42);
        assert_eq!(parse_int("  -7  ").unwrap(), -7);
        assert!(matches!(parse_int("4.2"), Err(VmError::IoError(_))));
        assert!(matches!(parse_int(""), Err(VmError::IoError(_))));
        // Out of 32-bit range.
        assert!(parse_int("2147483648").is_err());
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float("3.5\n").unwrap(), 3.5);
        assert_eq!(parse_float("-2").unwrap(), -2.0);
        assert!(matches!(parse_float("x"), Err(VmError::IoError(_))));
    }

    #[test]
    fn test_scripted_console() {
        let mut console = ScriptedConsole::new();
        console.push_input("5");
        console.push_input("1.25");
        assert_eq!(console.read_int().unwrap(), 5);
        assert_eq!(console.read_float().unwrap(), 1.25);
        // The script is exhausted.
        assert!(console.read_int().is_err());

        console.write_int(9);
        console.write_float(0.5);
        assert_eq!(
            console.outputs,
            vec![ConsoleOutput::Int(9), ConsoleOutput::Float(0.5)]
        );
    }
}
