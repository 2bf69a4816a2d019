
use log::{error, info, trace};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use crate::console::Console;
use crate::error::{VmError, VmResult};
use crate::instruction::{AddressMode, Instruction, Opcode};
use crate::memory::Memory;
use crate::psw::Psw;
use crate::word::Word;

/// Number of registers in the register file.
pub const NUM_REGISTERS: usize = 2;

/// Path of the execution trace, truncated on every open.
const EXECUTION_LOG: &str = "vm_execution.log";
/// Path of the error trace, appended across runs.
const ERROR_LOG: &str = "vm_error.log";

/// The two trace sinks of a running machine.
///
/// The files are owned directly, so they are released on drop along every
/// exit path, including panics.
pub struct TraceLog {
    execution: Option<File>,
    errors: Option<File>,
}

impl TraceLog {
    /// Open the standard log files in the working directory.
    pub fn open() -> io::Result<Self> {
        let execution = File::create(EXECUTION_LOG)?;
        let errors = OpenOptions::new()
            .create(true)
            .append(true)
            .open(ERROR_LOG)?;
        Ok(TraceLog {
            execution: Some(execution),
            errors: Some(errors),
        })
    }

    /// A trace log that discards everything. Used by tests.
    pub fn disabled() -> Self {
        TraceLog {
            execution: None,
            errors: None,
        }
    }

    fn message(&mut self, message: &str) {
        trace!("{}", message);
        if let Some(file) = &mut self.execution {
            // Trace failures are not execution failures.
            let _ = writeln!(file, "{}", message);
        }
    }

    fn error(&mut self, message: &str) {
        error!("{}", message);
        if let Some(file) = &mut self.errors {
            let _ = writeln!(file, "ERROR: {}", message);
        }
    }
}

/// What the execution loop should do after an instruction completes.
enum Step {
    /// Advance to the next cell.
    Next,
    /// The instruction transferred control; IP is already set.
    Jumped,
    /// STOP was executed; IP stays where it is.
    Halt,
}

/// The virtual machine processor.
///
/// Owns the memory, the PSW, the register file, the console, and the trace
/// sinks; runs exactly one program to completion. The `stop` and `error`
/// flags are monotonic within a run and only cleared by `reset`.
pub struct Processor<C> {
    memory: Memory,
    psw: Psw,
    registers: [i32; NUM_REGISTERS],
    stop: bool,
    error: bool,
    console: C,
    trace: TraceLog,
}

impl<C: Console> Processor<C> {
    pub fn new(memory: Memory, console: C, trace: TraceLog) -> Self {
        Processor {
            memory,
            psw: Psw::default(),
            registers: [0; NUM_REGISTERS],
            stop: false,
            error: false,
            console,
            trace,
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn psw(&self) -> &Psw {
        &self.psw
    }

    pub fn stopped(&self) -> bool {
        self.stop
    }

    pub fn errored(&self) -> bool {
        self.error
    }

    /// Read a register. Only indices below `NUM_REGISTERS` exist.
    pub fn register(&self, index: u8) -> VmResult<i32> {
        if index as usize >= NUM_REGISTERS {
            return Err(VmError::InvalidRegister { index });
        }
        Ok(self.registers[index as usize])
    }

    fn set_register(&mut self, index: u8, value: i32) -> VmResult<()> {
        if index as usize >= NUM_REGISTERS {
            return Err(VmError::InvalidRegister { index });
        }
        self.registers[index as usize] = value;
        Ok(())
    }

    /// Reset to the given entry point: flags cleared, registers zeroed,
    /// stop and error flags cleared.
    pub fn reset(&mut self, entry: u16) {
        if !self.memory.is_valid_cell(entry) {
            self.trace.message(&format!("Invalid initial IP: {:#06X}", entry));
            self.error = true;
            return;
        }
        self.psw.reset(entry);
        self.registers = [0; NUM_REGISTERS];
        self.error = false;
        self.stop = false;
        self.trace.message(&format!("Processor reset with initial IP: {:#06X}", entry));
    }

    /// Run until STOP, an invalid instruction, or a runtime error.
    pub fn run(&mut self) {
        self.trace.message("Starting program execution");
        while !self.stop && !self.error {
            if let Err(e) = self.step() {
                self.trace.error(&format!(
                    "Error executing instruction at {:#06X}: {}", self.psw.ip, e));
                self.error = true;
            }
        }
        info!("Execution finished (stop={}, error={}).", self.stop, self.error);
    }

    /// Fetch, decode and execute a single instruction. On error the IP is
    /// left at the failing instruction.
    fn step(&mut self) -> VmResult<()> {
        let ip = self.psw.ip;
        if !self.memory.is_valid_cell(ip) {
            return Err(VmError::InvalidIp { ip });
        }
        let word = self.memory.read_cell(ip)?;
        let instruction = Instruction::decode(word).ok_or(VmError::InvalidOpcode {
            ip,
            opcode: word.opcode_byte(),
        })?;
        trace!("{:#06X}: {:?}", ip, instruction);

        match self.execute(&instruction)? {
            Step::Halt => {
                self.trace.message("STOP: halting processor");
                self.stop = true;
            }
            Step::Jumped => {}
            Step::Next => {
                self.psw.ip = ((ip as usize + 1) % self.memory.size()) as u16;
            }
        }
        Ok(())
    }

    /// Dispatch on the opcode.
    fn execute(&mut self, instruction: &Instruction) -> VmResult<Step> {
        match instruction.opcode {
            Opcode::Stop => Ok(Step::Halt),

            Opcode::IAdd | Opcode::ISub | Opcode::IMul | Opcode::IDiv => {
                self.integer_arithmetic(instruction)?;
                Ok(Step::Next)
            }

            Opcode::RAdd | Opcode::RSub | Opcode::RMul | Opcode::RDiv => {
                self.float_arithmetic(instruction)?;
                Ok(Step::Next)
            }

            Opcode::IIn => {
                let value = self.console.read_int()?;
                let dest = self.operand_address(instruction, instruction.addr1)?;
                self.memory.write_cell(dest, Word::from_int(value))?;
                self.trace.message(&format!("IIN: read value {}", value));
                Ok(Step::Next)
            }

            Opcode::IOut => {
                let src = self.operand_address(instruction, instruction.addr1)?;
                let value = self.memory.read_cell(src)?.as_int();
                self.console.write_int(value);
                self.trace.message(&format!("IOUT: value {}", value));
                Ok(Step::Next)
            }

            Opcode::RIn => {
                let value = self.console.read_float()?;
                let dest = self.operand_address(instruction, instruction.addr1)?;
                self.memory.write_cell(dest, Word::from_float(value))?;
                self.trace.message(&format!("RIN: read value {}", value));
                Ok(Step::Next)
            }

            Opcode::ROut => {
                let src = self.operand_address(instruction, instruction.addr1)?;
                let value = self.memory.read_cell(src)?.as_float();
                self.console.write_float(value);
                self.trace.message(&format!("ROUT: value {}", value));
                Ok(Step::Next)
            }

            Opcode::Jz => self.conditional_jump(instruction, self.psw.flags() == 0),
            Opcode::Jg => self.conditional_jump(instruction, (self.psw.flags() as i16) > 0),
            Opcode::Jl => self.conditional_jump(instruction, (self.psw.flags() as i16) < 0),

            Opcode::Load => {
                // The source is absolute; no addressing modes apply.
                let value = self.memory.read_cell(instruction.addr2)?.as_int();
                let register = low_register_index(instruction.addr1);
                self.set_register(register, value)?;
                self.trace.message(&format!("LOAD: R{} = {}", register, value));
                Ok(Step::Next)
            }

            Opcode::Store => {
                // The destination is absolute; no addressing modes apply.
                let register = low_register_index(instruction.addr2);
                let value = self.register(register)?;
                self.memory.write_cell(instruction.addr1, Word::from_int(value))?;
                self.trace.message(&format!(
                    "STORE: [{:#06X}] = R{} ({})", instruction.addr1, register, value));
                Ok(Step::Next)
            }

            Opcode::AddR | Opcode::SubR => {
                let dest = low_register_index(instruction.addr1);
                let src = low_register_index(instruction.addr2);
                let a = self.register(dest)?;
                let b = self.register(src)?;
                let (result, carry, overflow) = if instruction.opcode == Opcode::AddR {
                    int_add(a, b)
                } else {
                    int_sub(a, b)
                };
                self.set_register(dest, result)?;
                self.psw.set_arithmetic_flags(result, carry, overflow);
                let symbol = if instruction.opcode == Opcode::AddR { '+' } else { '-' };
                self.trace.message(&format!(
                    "{}: R{} = R{} {} R{} ({} = {} {} {})",
                    instruction.opcode.mnemonic(), dest, dest, symbol, src,
                    result, a, symbol, b));
                Ok(Step::Next)
            }

            Opcode::MovR => {
                let dest = low_register_index(instruction.addr1);
                let src = low_register_index(instruction.addr2);
                let value = self.register(src)?;
                self.set_register(dest, value)?;
                self.trace.message(&format!("MOVR: R{} = R{} ({})", dest, src, value));
                Ok(Step::Next)
            }
        }
    }

    /// Resolve the effective address of one memory operand. Memory operands
    /// share a register index taken from the low three bits of the first
    /// address field.
    fn operand_address(&self, instruction: &Instruction, addr: u16) -> VmResult<u16> {
        let register = low_register_index(instruction.addr1);
        self.effective_address(instruction.mode, addr, register)
    }

    /// Compute an effective address from the mode bits, a 12-bit immediate,
    /// and a register index. Arithmetic is signed 32-bit, truncated to 16
    /// bits.
    fn effective_address(&self, mode: AddressMode, addr: u16, register: u8) -> VmResult<u16> {
        match mode {
            AddressMode::Absolute => Ok(addr),
            AddressMode::Displacement => {
                // Always displaces by R0, whatever the operand's register
                // index says.
                let base = self.register(0)?;
                Ok((addr as i32).wrapping_add(base) as u16)
            }
            AddressMode::Register => Ok(self.register(register)? as u16),
            AddressMode::RegisterDisplacement => {
                let base = self.register(register)?;
                Ok((addr as i32).wrapping_add(base) as u16)
            }
        }
    }

    fn integer_arithmetic(&mut self, instruction: &Instruction) -> VmResult<()> {
        let dest = self.operand_address(instruction, instruction.addr1)?;
        let src = self.operand_address(instruction, instruction.addr2)?;
        let a = self.memory.read_cell(dest)?.as_int();
        let b = self.memory.read_cell(src)?.as_int();

        let (result, carry, overflow) = match instruction.opcode {
            Opcode::IAdd => int_add(a, b),
            Opcode::ISub => int_sub(a, b),
            Opcode::IMul => int_mul(a, b),
            Opcode::IDiv => {
                if b == 0 {
                    self.trace.message("IDIV: division by zero error");
                    return Err(VmError::DivByZero);
                }
                (a.wrapping_div(b), false, false)
            }
            _ => unreachable!(),
        };

        self.memory.write_cell(dest, Word::from_int(result))?;
        self.psw.set_arithmetic_flags(result, carry, overflow);
        self.trace.message(&format!(
            "{}: {} {} {} = {}",
            instruction.opcode.mnemonic(), a, operator_symbol(instruction.opcode), b, result));
        Ok(())
    }

    fn float_arithmetic(&mut self, instruction: &Instruction) -> VmResult<()> {
        let dest = self.operand_address(instruction, instruction.addr1)?;
        let src = self.operand_address(instruction, instruction.addr2)?;
        let a = self.memory.read_cell(dest)?.as_float();
        let b = self.memory.read_cell(src)?.as_float();

        let result = match instruction.opcode {
            Opcode::RAdd => a + b,
            Opcode::RSub => a - b,
            Opcode::RMul => a * b,
            Opcode::RDiv => {
                if b == 0.0 {
                    self.trace.message("RDIV: division by zero error");
                    return Err(VmError::DivByZero);
                }
                a / b
            }
            _ => unreachable!(),
        };

        self.memory.write_cell(dest, Word::from_float(result))?;
        self.psw.set_float_flags(result);
        self.trace.message(&format!(
            "{}: {} {} {} = {}",
            instruction.opcode.mnemonic(), a, operator_symbol(instruction.opcode), b, result));
        Ok(())
    }

    /// Jump to the first operand's effective address when `taken`. Jumps
    /// resolve their target with register index 0.
    fn conditional_jump(&mut self, instruction: &Instruction, taken: bool) -> VmResult<Step> {
        if taken {
            let target = self.effective_address(instruction.mode, instruction.addr1, 0)?;
            self.psw.ip = target;
            self.trace.message(&format!(
                "{}: jumping to {:#06X}", instruction.opcode.mnemonic(), target));
            Ok(Step::Jumped)
        } else {
            self.trace.message(&format!(
                "{}: condition not met, continuing", instruction.opcode.mnemonic()));
            Ok(Step::Next)
        }
    }
}

/// Register index named by an address field (its low three bits).
fn low_register_index(addr: u16) -> u8 {
    (addr & 0x7) as u8
}

fn operator_symbol(opcode: Opcode) -> char {
    match opcode {
        Opcode::IAdd | Opcode::RAdd => '+',
        Opcode::ISub | Opcode::RSub => '-',
        Opcode::IMul | Opcode::RMul => '*',
        Opcode::IDiv | Opcode::RDiv => '/',
        _ => '?',
    }
}

fn int_add(a: i32, b: i32) -> (i32, bool, bool) {
    let result = a.wrapping_add(b);
    let overflow = (a > 0 && b > 0 && result < 0) || (a < 0 && b < 0 && result > 0);
    // Carry out of the low 32 bits, both operands interpreted unsigned.
    let carry = (a as u32).wrapping_add(b as u32) > 0x7FFF_FFFF;
    (result, carry, overflow)
}

fn int_sub(a: i32, b: i32) -> (i32, bool, bool) {
    let result = a.wrapping_sub(b);
    let overflow = (a > 0 && b < 0 && result < 0) || (a < 0 && b > 0 && result > 0);
    // Borrow out of the low 32 bits, both operands interpreted unsigned.
    let carry = (a as u32) < (b as u32);
    (result, carry, overflow)
}

fn int_mul(a: i32, b: i32) -> (i32, bool, bool) {
    let result = a.wrapping_mul(b);
    // Overflow probe: dividing the result by one operand must recover the
    // other. Skipped for a zero operand.
    let overflow = b != 0 && result.wrapping_div(b) != a;
    (result, false, overflow)
}
