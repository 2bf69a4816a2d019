use log::{debug, info};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{LoadError, LoadResult, ParseError};
use crate::instruction::MAX_OPCODE;
use crate::memory::Memory;
use crate::word::Word;

/// Highest legal addressing-mode value (two bits).
const MAX_BB: u8 = 0x03;

/// Load a program from a file, returning the entry point.
pub fn load_program_file<P: AsRef<Path>>(path: P, memory: &mut Memory) -> LoadResult<u16> {
    let file = File::open(path)?;
    load_program(BufReader::new(file), memory)
}

/// Load a program from a line-oriented source into memory, returning the
/// entry point.
///
/// Each line holds one directive; `#` starts a comment running to the end of
/// the line. Directive names are case-insensitive. Addresses and opcodes are
/// hexadecimal without prefix; `i` literals are decimal integers and `r`
/// literals decimal floats. The file must set an entry point with `e` and
/// finish with `s`.
pub fn load_program<R: BufRead>(source: R, memory: &mut Memory) -> LoadResult<u16> {
    let mut cursor: u16 = 0;
    let mut entry_point: u16 = 0;
    let mut entry_point_set = false;
    let mut line_number = 0;

    for line in source.lines() {
        let raw = line?;
        line_number += 1;

        // Strip the trailing comment, if any, then surrounding whitespace.
        let text = match raw.find('#') {
            Some(idx) => &raw[..idx],
            None => &raw[..],
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let directive = Directive {
            line_number,
            text,
            fields: text.split_whitespace().collect(),
        };
        match directive.name().as_str() {
            "a" => {
                let address = directive.address_field(
                    1, memory, "address", "invalid address format",
                    "address command requires a value")?;
                debug!("Cursor set to {:#06X}.", address);
                cursor = address;
            }
            "e" => {
                let address = directive.address_field(
                    1, memory, "entry point", "invalid initial IP format",
                    "entry point command requires a value")?;
                debug!("Entry point set to {:#06X}.", address);
                entry_point = address;
                entry_point_set = true;
            }
            "i" => {
                let field = directive.field(1, "integer command requires a value")?;
                let value: i32 = field.parse().map_err(|e| {
                    directive.error(format!("invalid integer format: {}", e))
                })?;
                memory.write_cell(cursor, Word::from_int(value)).map_err(|e| {
                    directive.error(format!("failed to write integer to memory: {}", e))
                })?;
                cursor += 1;
            }
            "r" => {
                let field = directive.field(1, "float command requires a value")?;
                let value: f32 = field.parse().map_err(|e| {
                    directive.error(format!("invalid float format: {}", e))
                })?;
                memory.write_cell(cursor, Word::from_float(value)).map_err(|e| {
                    directive.error(format!("failed to write float to memory: {}", e))
                })?;
                cursor += 1;
            }
            "k" => {
                if directive.fields.len() < 5 {
                    return Err(directive.error(format!(
                        "command requires 4 parameters (opcode, bb, addr1, addr2), got {}",
                        directive.fields.len() - 1)));
                }

                let opcode = u8::from_str_radix(directive.fields[1], 16).map_err(|e| {
                    directive.error(format!("invalid opcode format: {}", e))
                })?;
                if opcode > MAX_OPCODE {
                    return Err(directive.error(format!(
                        "opcode value {:#04X} is out of valid range [0x00-0x45]", opcode)));
                }

                let bb = u8::from_str_radix(directive.fields[2], 16).map_err(|e| {
                    directive.error(format!("invalid bb format: {}", e))
                })?;
                if bb > MAX_BB {
                    return Err(directive.error(format!(
                        "BB value {:#04X} exceeds 2-bit range [0x00-0x03]", bb)));
                }

                let addr1 = directive.address_field(
                    3, memory, "addr1", "invalid addr1 format", "")?;
                let addr2 = directive.address_field(
                    4, memory, "addr2", "invalid addr2 format", "")?;

                let word = Word::from_command(opcode, bb, addr1, addr2);
                memory.write_cell(cursor, word).map_err(|e| {
                    directive.error(format!("failed to write command to memory: {}", e))
                })?;
                cursor += 1;
            }
            "s" => {
                if !entry_point_set {
                    return Err(directive.error(
                        "program ended without setting entry point (e command)".to_string()));
                }
                info!("Program loaded; entry point {:#06X}.", entry_point);
                return Ok(entry_point);
            }
            _ => {
                return Err(directive.error(
                    format!("unknown command type: {}", directive.fields[0])));
            }
        }
    }

    Err(LoadError::Parse(ParseError {
        line_number,
        line: String::new(),
        message: "program file ended without 's' command".to_string(),
    }))
}

/// One non-empty program line split into whitespace-separated fields.
struct Directive<'a> {
    line_number: usize,
    text: &'a str,
    fields: Vec<&'a str>,
}

impl Directive<'_> {
    fn name(&self) -> String {
        self.fields[0].to_lowercase()
    }

    /// A parse error pinned to this line.
    fn error(&self, message: String) -> LoadError {
        LoadError::Parse(ParseError {
            line_number: self.line_number,
            line: self.text.to_string(),
            message,
        })
    }

    fn field(&self, index: usize, missing: &str) -> LoadResult<&str> {
        self.fields
            .get(index)
            .copied()
            .ok_or_else(|| self.error(missing.to_string()))
    }

    /// Parse a hexadecimal address field and check it against the memory
    /// range.
    fn address_field(
        &self,
        index: usize,
        memory: &Memory,
        what: &str,
        bad_format: &str,
        missing: &str,
    ) -> LoadResult<u16> {
        let field = self.field(index, missing)?;
        let address = u32::from_str_radix(field, 16)
            .map_err(|e| self.error(format!("{}: {}", bad_format, e)))?;
        if !memory.is_valid_address(address as usize) {
            return Err(self.error(format!(
                "{} {:#X} is out of valid range [0-{}]",
                what, address, memory.size() - 1)));
        }
        Ok(address as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use crate::init_test_logging;

    fn load(program: &str) -> (Memory, LoadResult<u16>) {
        init_test_logging();
        let mut memory = Memory::default();
        let result = load_program(program.as_bytes(), &mut memory);
        (memory, result)
    }

    fn expect_parse_error(result: LoadResult<u16>) -> ParseError {
        match result {
            Err(LoadError::Parse(e)) => e,
            Err(LoadError::Io(e)) => panic!("expected a parse error, got io error {}", e),
            Ok(entry) => panic!("expected a parse error, got entry {:#X}", entry),
        }
    }

    #[test]
    fn test_load_minimal_program() {
        let (_, result) = load("e 0000\ns\n");
        assert_eq!(result.unwrap(), 0);
    }

    #[test]
    fn test_load_data_and_commands() {
        let (mut memory, result) = load(
            "a 0100\n\
             i 3\n\
             i -4\n\
             r 3.5\n\
             a 0000\n\
             k 01 00 0100 0101\n\
             e 0000\n\
             s\n");
        assert_eq!(result.unwrap(), 0);
        assert_eq!(memory.read_cell(0x100).unwrap().as_int(), 3);
        assert_eq!(memory.read_cell(0x101).unwrap().as_int(), -4);
        assert_eq!(memory.read_cell(0x102).unwrap().as_float(), 3.5);
        assert_eq!(
            memory.read_cell(0).unwrap(),
            Word::from_command(0x01, 0x00, 0x100, 0x101)
        );
    }

    #[test]
    fn test_comments_blanks_and_case() {
        let (mut memory, result) = load(
            "# leading comment\n\
             \n\
             A 0010   # set the cursor\n\
             I 7\n\
             E 0010\n\
             S\n");
        assert_eq!(result.unwrap(), 0x10);
        assert_eq!(memory.read_cell(0x10).unwrap().as_int(), 7);
    }

    #[test]
    fn test_content_after_s_is_ignored() {
        let (_, result) = load("e 0000\ns\nk 99 99 99 99\n");
        assert_eq!(result.unwrap(), 0);
    }

    #[test]
    fn test_missing_terminator() {
        let (_, result) = load("e 0000\n");
        let e = expect_parse_error(result);
        assert!(e.message.contains("ended without 's'"));
        assert_eq!(e.line_number, 1);
    }

    #[test]
    fn test_missing_entry_point() {
        let (_, result) = load("i 1\ns\n");
        let e = expect_parse_error(result);
        assert!(e.message.contains("without setting entry point"));
    }

    #[test]
    fn test_unknown_directive() {
        let (_, result) = load("q 1\ns\n");
        let e = expect_parse_error(result);
        assert_eq!(e.message, "unknown command type: q");
        assert_eq!(e.line_number, 1);
        assert_eq!(e.line, "q 1");
    }

    #[test]
    fn test_missing_values() {
        for (program, fragment) in [
            ("a\n", "address command requires a value"),
            ("e\n", "entry point command requires a value"),
            ("i\n", "integer command requires a value"),
            ("r\n", "float command requires a value"),
        ] {
            let (_, result) = load(program);
            let e = expect_parse_error(result);
            assert!(e.message.contains(fragment), "{}: {}", program, e.message);
        }
    }

    #[test]
    fn test_bad_number_formats() {
        let (_, result) = load("a xyz\n");
        assert!(expect_parse_error(result).message.contains("invalid address format"));
        let (_, result) = load("i 1.5\n");
        assert!(expect_parse_error(result).message.contains("invalid integer format"));
        let (_, result) = load("r one\n");
        assert!(expect_parse_error(result).message.contains("invalid float format"));
        let (_, result) = load("k zz 00 0000 0000\n");
        assert!(expect_parse_error(result).message.contains("invalid opcode format"));
    }

    #[test]
    fn test_address_out_of_range() {
        let (_, result) = load("a 10000\n");
        let e = expect_parse_error(result);
        assert!(e.message.contains("out of valid range"));
        let (_, result) = load("e 10000\ns\n");
        assert!(expect_parse_error(result).message.contains("out of valid range"));
        let (_, result) = load("k 01 00 10000 0000\n");
        assert!(expect_parse_error(result).message.contains("addr1"));
    }

    #[test]
    fn test_opcode_and_bb_ranges() {
        let (_, result) = load("k 46 00 0000 0000\n");
        let e = expect_parse_error(result);
        assert!(e.message.contains("out of valid range [0x00-0x45]"));

        let (_, result) = load("k 01 04 0000 0000\n");
        let e = expect_parse_error(result);
        assert!(e.message.contains("exceeds 2-bit range"));
    }

    #[test]
    fn test_command_parameter_count() {
        let (_, result) = load("k 01 00 0000\n");
        let e = expect_parse_error(result);
        assert!(e.message.contains("requires 4 parameters"));
        assert!(e.message.contains("got 3"));
    }

    #[test]
    fn test_address2_narrowed_to_ten_bits() {
        // The field is declared 12 bits wide but encoded in 10; the loader
        // accepts the full range and the encoding truncates.
        let (mut memory, result) = load("k 01 00 0000 0FFF\ne 0000\ns\n");
        assert_eq!(result.unwrap(), 0);
        assert_eq!(memory.read_cell(0).unwrap().raw() & 0x3FF, 0x3FF);
    }

    #[test]
    fn test_stop_command_stores_zero_cell() {
        let (mut memory, result) = load("k 00 00 0123 0045\ne 0000\ns\n");
        assert_eq!(result.unwrap(), 0);
        assert_eq!(memory.read_cell(0).unwrap(), Word::ZERO);
    }

    #[test]
    fn test_write_past_cell_range() {
        // 0x8000 is a valid byte address but its cell window is not.
        let (_, result) = load("a 8000\ni 1\n");
        let e = expect_parse_error(result);
        assert!(e.message.contains("failed to write integer to memory"));
    }

    #[test]
    fn test_load_from_file() {
        init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sum.vm");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "a 0100").unwrap();
        writeln!(file, "i 3").unwrap();
        writeln!(file, "e 0100").unwrap();
        writeln!(file, "s").unwrap();
        drop(file);

        let mut memory = Memory::default();
        let entry = load_program_file(&path, &mut memory).unwrap();
        assert_eq!(entry, 0x100);
        assert_eq!(memory.read_cell(0x100).unwrap().as_int(), 3);
    }

    #[test]
    fn test_load_missing_file() {
        init_test_logging();
        let mut memory = Memory::default();
        let result = load_program_file("no-such-file.vm", &mut memory);
        assert!(matches!(result, Err(LoadError::Io(_))));
    }
}
