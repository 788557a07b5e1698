use bitflags::bitflags;

use crate::ast::OperandKind;
use crate::isa::sis16::Width;

bitflags! {
    /// Operand classes a mnemonic accepts in one operand slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct OperandClass: u8 {
        const REGISTER = 1 << 0;
        const IMMEDIATE = 1 << 1;
        const MEMORY = 1 << 2;
    }
}

impl OperandClass {
    pub const NONE: OperandClass = OperandClass::empty();
    pub const WRITABLE: OperandClass = OperandClass::REGISTER.union(OperandClass::MEMORY);
    pub const READABLE: OperandClass = OperandClass::all();

    pub fn of(kind: OperandKind) -> OperandClass {
        match kind {
            OperandKind::Register => OperandClass::REGISTER,
            OperandKind::Immediate => OperandClass::IMMEDIATE,
            _ => OperandClass::MEMORY,
        }
    }

    pub fn admits(self, kind: OperandKind) -> bool {
        self.contains(OperandClass::of(kind))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrDesc {
    pub mnemonic: &'static str,
    pub opcode: u8,
    pub width: Width,
    pub dst: OperandClass,
    pub src: OperandClass,
}

impl InstrDesc {
    /// Number of operands written in source: destination first, then source.
    pub fn arity(&self) -> usize {
        usize::from(!self.dst.is_empty()) + usize::from(!self.src.is_empty())
    }
}

const fn desc(
    mnemonic: &'static str,
    opcode: u8,
    width: Width,
    dst: OperandClass,
    src: OperandClass,
) -> InstrDesc {
    InstrDesc { mnemonic, opcode, width, dst, src }
}

use OperandClass as C;
use Width::{W16, W8};

pub const TABLE: &[InstrDesc] = &[
    desc("nop", 0x00, W16, C::NONE, C::NONE),
    desc("mov", 0x01, W16, C::WRITABLE, C::READABLE),
    desc("movb", 0x02, W8, C::WRITABLE, C::READABLE),
    desc("add", 0x03, W16, C::WRITABLE, C::READABLE),
    desc("addb", 0x04, W8, C::WRITABLE, C::READABLE),
    desc("sub", 0x05, W16, C::WRITABLE, C::READABLE),
    desc("subb", 0x06, W8, C::WRITABLE, C::READABLE),
    desc("cmp", 0x07, W16, C::WRITABLE, C::READABLE),
    desc("cmpb", 0x08, W8, C::WRITABLE, C::READABLE),
    desc("inc", 0x09, W16, C::WRITABLE, C::NONE),
    desc("incb", 0x0A, W8, C::WRITABLE, C::NONE),
    desc("dec", 0x0B, W16, C::WRITABLE, C::NONE),
    desc("decb", 0x0C, W8, C::WRITABLE, C::NONE),
    desc("push", 0x0D, W16, C::NONE, C::READABLE),
    desc("pop", 0x0E, W16, C::WRITABLE, C::NONE),
    desc("jmp", 0x10, W16, C::NONE, C::READABLE),
    desc("jsr", 0x11, W16, C::NONE, C::READABLE),
    desc("ret", 0x12, W16, C::NONE, C::NONE),
    desc("syscall", 0x13, W16, C::NONE, C::NONE),
    desc("ssc", 0x14, W16, C::NONE, C::REGISTER.union(C::IMMEDIATE)),
];

/// Case-insensitive mnemonic lookup.
pub fn lookup(mnemonic: &str) -> Option<&'static InstrDesc> {
    TABLE.iter().find(|d| d.mnemonic.eq_ignore_ascii_case(mnemonic))
}
