// Bits of the packed flag word used by the conditional jumps.
pub const FLAG_SIGN: u16 = 0x8000;
pub const FLAG_OVERFLOW: u16 = 0x0800;
pub const FLAG_ZERO: u16 = 0x0400;
pub const FLAG_CARRY: u16 = 0x0001;

/// Program Status Word: the instruction pointer plus the condition flags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Psw {
    pub ip: u16,
    pub sign: bool,
    pub carry: bool,
    pub overflow: bool,
    pub zero: bool,
}

impl Psw {
    /// Reset to the given entry point with every flag cleared.
    pub fn reset(&mut self, entry: u16) {
        *self = Psw {
            ip: entry,
            ..Psw::default()
        };
    }

    /// Pack the condition flags into the 16-bit word tested by the
    /// conditional jumps. The sign flag occupies bit 15, so a set sign flag
    /// makes the word negative under a signed interpretation.
    pub fn flags(&self) -> u16 {
        let mut flags = 0;
        if self.sign {
            flags |= FLAG_SIGN;
        }
        if self.overflow {
            flags |= FLAG_OVERFLOW;
        }
        if self.zero {
            flags |= FLAG_ZERO;
        }
        if self.carry {
            flags |= FLAG_CARRY;
        }
        flags
    }

    /// Unpack a flag word produced by `flags`.
    pub fn set_flags(&mut self, flags: u16) {
        self.sign = flags & FLAG_SIGN != 0;
        self.overflow = flags & FLAG_OVERFLOW != 0;
        self.zero = flags & FLAG_ZERO != 0;
        self.carry = flags & FLAG_CARRY != 0;
    }

    /// Update all four flags after an integer operation.
    pub fn set_arithmetic_flags(&mut self, result: i32, carry: bool, overflow: bool) {
        self.sign = result < 0;
        self.zero = result == 0;
        self.carry = carry;
        self.overflow = overflow;
    }

    /// Update the flags after a float operation. Carry and overflow are
    /// meaningless for floats and are cleared.
    pub fn set_float_flags(&mut self, result: f32) {
        self.sign = result < 0.0;
        self.zero = result == 0.0;
        self.carry = false;
        self.overflow = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bit_positions() {
        let mut psw = Psw::default();
        assert_eq!(psw.flags(), 0);
        psw.sign = true;
        assert_eq!(psw.flags(), 0x8000);
        psw.overflow = true;
        assert_eq!(psw.flags(), 0x8800);
        psw.zero = true;
        assert_eq!(psw.flags(), 0x8C00);
        psw.carry = true;
        assert_eq!(psw.flags(), 0x8C01);
    }

    #[test]
    fn test_flags_round_trip() {
        for flags in [0x0000, 0x0001, 0x0400, 0x0800, 0x8000, 0x8C01] {
            let mut psw = Psw::default();
            psw.set_flags(flags);
            assert_eq!(psw.flags(), flags);
        }
        // Bits outside the four flag positions are not representable.
        let mut psw = Psw::default();
        psw.set_flags(0xFFFF);
        assert_eq!(psw.flags(), 0x8C01);
    }

    #[test]
    fn test_arithmetic_flags() {
        let mut psw = Psw::default();
        psw.set_arithmetic_flags(-5, true, false);
        assert!(psw.sign && psw.carry && !psw.overflow && !psw.zero);
        psw.set_arithmetic_flags(0, false, true);
        assert!(!psw.sign && !psw.carry && psw.overflow && psw.zero);
    }

    #[test]
    fn test_float_flags_clear_carry_and_overflow() {
        let mut psw = Psw::default();
        psw.carry = true;
        psw.overflow = true;
        psw.set_float_flags(-1.5);
        assert!(psw.sign && !psw.zero && !psw.carry && !psw.overflow);
        psw.set_float_flags(0.0);
        assert!(!psw.sign && psw.zero);
    }

    #[test]
    fn test_reset_clears_flags() {
        let mut psw = Psw::default();
        psw.set_flags(0x8C01);
        psw.reset(0x0123);
        assert_eq!(psw.ip, 0x0123);
        assert_eq!(psw.flags(), 0);
    }
}
