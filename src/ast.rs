use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SourcePos;
use crate::instructions::InstrDesc;
use crate::isa::sis16::Register;

/// Index into the program's `SymbolTable`. Operands refer to labels by id so
/// pass 2 is a plain table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol { name: name.to_string() });
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn name(&self, id: SymbolId) -> &str {
        &self.get(id).name
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols.iter().enumerate().map(|(i, s)| (SymbolId(i as u32), s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Literal(u16),
    Symbol(SymbolId),
}

/// An operand as written. `V` is `Value` while labels are still symbolic
/// and `u16` once pass 2 has substituted addresses.
#[rustfmt::skip]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand<V = Value> {
    Register(Register),                                                    // %ax
    Direct(V),                                                             // $F354, label
    Immediate(V),                                                          // #$F354, #label
    IndirectMemory(V),                                                     // [$F354], [label]
    IndirectBase(Register),                                                // [%bx]
    IndirectBaseOffset { base: Register, offset: u16, negative: bool },    // [%bx + 4], [%bx - 4]
    IndirectBaseReg { base: Register, index: Register },                   // [%bx + %cx]
    IndirectBaseScaled { base: Register, index: Register, scale: u16 },    // [%sp + %ax * 2]
}

impl<V> Operand<V> {
    pub fn try_map<W, E>(self, f: impl FnOnce(V) -> Result<W, E>) -> Result<Operand<W>, E> {
        Ok(match self {
            Operand::Register(r) => Operand::Register(r),
            Operand::Direct(v) => Operand::Direct(f(v)?),
            Operand::Immediate(v) => Operand::Immediate(f(v)?),
            Operand::IndirectMemory(v) => Operand::IndirectMemory(f(v)?),
            Operand::IndirectBase(b) => Operand::IndirectBase(b),
            Operand::IndirectBaseOffset { base, offset, negative } => {
                Operand::IndirectBaseOffset { base, offset, negative }
            }
            Operand::IndirectBaseReg { base, index } => Operand::IndirectBaseReg { base, index },
            Operand::IndirectBaseScaled { base, index, scale } => {
                Operand::IndirectBaseScaled { base, index, scale }
            }
        })
    }
}

/// Operand shape, independent of concrete values. Bare labels and literal
/// addresses are distinct shapes because only the latter may be written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    Register,
    Immediate,
    DirectAddress,
    DirectLabel,
    IndirectMemory,
    IndirectBase,
    IndirectBaseOffset,
    IndirectBaseReg,
    IndirectBaseScaled,
}

impl OperandKind {
    pub const ALL: [OperandKind; 9] = [
        OperandKind::Register,
        OperandKind::Immediate,
        OperandKind::DirectAddress,
        OperandKind::DirectLabel,
        OperandKind::IndirectMemory,
        OperandKind::IndirectBase,
        OperandKind::IndirectBaseOffset,
        OperandKind::IndirectBaseReg,
        OperandKind::IndirectBaseScaled,
    ];

    pub fn is_memory(self) -> bool {
        !matches!(self, OperandKind::Register | OperandKind::Immediate)
    }
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperandKind::Register => "register",
            OperandKind::Immediate => "immediate",
            OperandKind::DirectAddress => "direct address",
            OperandKind::DirectLabel => "bare label",
            OperandKind::IndirectMemory => "indirect memory",
            OperandKind::IndirectBase => "register indirect",
            OperandKind::IndirectBaseOffset => "register indirect with offset",
            OperandKind::IndirectBaseReg => "register indirect with index",
            OperandKind::IndirectBaseScaled => "register indirect with scaled index",
        };
        f.write_str(s)
    }
}

impl Operand<Value> {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Register(_) => OperandKind::Register,
            Operand::Immediate(_) => OperandKind::Immediate,
            Operand::Direct(Value::Literal(_)) => OperandKind::DirectAddress,
            Operand::Direct(Value::Symbol(_)) => OperandKind::DirectLabel,
            Operand::IndirectMemory(_) => OperandKind::IndirectMemory,
            Operand::IndirectBase(_) => OperandKind::IndirectBase,
            Operand::IndirectBaseOffset { .. } => OperandKind::IndirectBaseOffset,
            Operand::IndirectBaseReg { .. } => OperandKind::IndirectBaseReg,
            Operand::IndirectBaseScaled { .. } => OperandKind::IndirectBaseScaled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub desc: &'static InstrDesc,
    pub dst: Option<Operand>,
    pub src: Option<Operand>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataDirective {
    Word(Vec<Value>),
    Byte(Vec<Value>),
    Ascii(String),
    Resb(u16),
    Resw(u16),
}

impl DataDirective {
    /// Byte length, from the directive's shape alone.
    pub fn size(&self) -> u32 {
        match self {
            DataDirective::Word(vs) => 2 * vs.len() as u32,
            DataDirective::Byte(vs) => vs.len() as u32,
            DataDirective::Ascii(s) => s.len() as u32,
            DataDirective::Resb(n) => *n as u32,
            DataDirective::Resw(n) => 2 * *n as u32,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Item {
    Label { symbol: SymbolId, pos: SourcePos },
    Instruction(Instruction),
    Data { directive: DataDirective, pos: SourcePos },
    Origin { address: u16, pos: SourcePos },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionKind {
    Data,
    Text,
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionKind::Data => f.write_str(".data"),
            SectionKind::Text => f.write_str(".text"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Section {
    pub kind: SectionKind,
    pub origin: Option<u16>,
    pub items: Vec<Item>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub sections: Vec<Section>,
    pub symbols: SymbolTable,
}
