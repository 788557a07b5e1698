use std::fmt;

use serde::{Deserialize, Serialize};

/// Operand width selected by the mnemonic (`movb` vs `mov`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Width {
    W8,
    W16,
}

impl fmt::Display for Width {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Width::W8 => f.write_str("8-bit"),
            Width::W16 => f.write_str("16-bit"),
        }
    }
}

pub const REGS16: [&str; 16] = [
    "pc", "sp", "bp", "sr", "ax", "bx", "cx", "dx", "ex", "fx", "gx", "hx", "ix", "jx", "kx", "lx",
];

// Low/high halves of ax..lx, index = ((r16 - 4) << 1) | high
pub const REGS8: [&str; 24] = [
    "al", "ah", "bl", "bh", "cl", "ch", "dl", "dh", "el", "eh", "fl", "fh", "gl", "gh", "hl", "hh",
    "il", "ih", "jl", "jh", "kl", "kh", "ll", "lh",
];

/// Encoding marker for an absent operand.
pub const NO_OPERAND: u8 = 0xF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    pub index: u8,
    pub width: Width,
}

impl Register {
    /// Look a register name up in the table for `width`.
    pub fn parse(name: &str, width: Width) -> Option<Register> {
        let lower = name.to_ascii_lowercase();
        let index = match width {
            Width::W16 if lower == "spx" => Some(1),
            Width::W16 => REGS16.iter().position(|r| *r == lower),
            Width::W8 => REGS8.iter().position(|r| *r == lower),
        }?;
        Some(Register { index: index as u8, width })
    }

    /// Width of a register name regardless of context, if it names one at all.
    pub fn width_of(name: &str) -> Option<Width> {
        [Width::W16, Width::W8].into_iter().find(|w| Register::parse(name, *w).is_some())
    }

    pub fn name(&self) -> &'static str {
        match self.width {
            Width::W16 => REGS16[self.index as usize],
            Width::W8 => REGS8[self.index as usize],
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name())
    }
}

/// Addressing modes as they appear in the operand-mode nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    Register,
    Immediate,
    Direct,
    IndirectMemory,
    IndirectBase,
    IndirectBasePlus,
    IndirectBaseMinus,
    IndirectBaseReg,
    IndirectBaseScaled,
}

impl AddressingMode {
    pub fn nibble(self, width: Width) -> u8 {
        use AddressingMode::*;
        match (self, width) {
            (Register, _) => 0x0,
            (Immediate, _) => 0x1,
            (Direct, _) => 0x2,
            (IndirectMemory, _) => 0x3,
            (IndirectBaseScaled, _) => 0x8,
            (IndirectBase, Width::W16) => 0x9,
            (IndirectBasePlus, Width::W16) => 0xA,
            (IndirectBaseMinus, Width::W16) => 0xB,
            (IndirectBaseReg, Width::W16) => 0xC,
            (IndirectBase, Width::W8) => 0x4,
            (IndirectBasePlus, Width::W8) => 0x5,
            (IndirectBaseMinus, Width::W8) => 0x6,
            (IndirectBaseReg, Width::W8) => 0x7,
        }
    }

    /// Bytes of operand data following the mode byte.
    pub fn data_len(self, width: Width) -> u32 {
        use AddressingMode::*;
        match self {
            Register => 1,
            Immediate => match width {
                Width::W8 => 1,
                Width::W16 => 2,
            },
            Direct | IndirectMemory => 2,
            IndirectBase | IndirectBaseReg => 1,
            IndirectBasePlus | IndirectBaseMinus => 3,
            IndirectBaseScaled => 2,
        }
    }
}
