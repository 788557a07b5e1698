use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ast::{DataDirective, Item, Operand, Program, SymbolId, Value};
use crate::encoder::{encode_data, encode_instruction, instruction_len};
use crate::error::{AsmError, Diagnostic, Diagnostics, SourcePos};
use crate::image::{Image, ImageWriter, Run};

const ADDRESS_LIMIT: u32 = 0x1_0000;

/// One defined label and its final address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub name: String,
    pub address: u16,
}

/// Pass-1 result: an address for every label and every emitting node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Indexed by `SymbolId`; `None` for names that are only referenced.
    pub symbols: Vec<Option<(u16, SourcePos)>>,
    /// Start address of each item, parallel to `Program::sections[..].items`.
    pub items: Vec<Vec<u16>>,
}

impl Layout {
    pub fn address(&self, id: SymbolId) -> Option<u16> {
        self.symbols.get(id.0 as usize)?.as_ref().map(|(a, _)| *a)
    }
}

/// A program with addresses assigned but symbols not yet substituted.
#[derive(Debug)]
pub struct Addressed<'p> {
    program: &'p Program,
    layout: Layout,
}

/// Fully encoded program: byte runs at absolute addresses plus the symbol list.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub runs: Vec<Run>,
    pub symbols: Vec<SymbolEntry>,
}

impl Program {
    /// Pass 1. Pure: running it twice gives the same layout.
    pub fn assign_addresses(&self) -> Result<Addressed<'_>, Diagnostics> {
        let mut symbols: Vec<Option<(u16, SourcePos)>> = vec![None; self.symbols.len()];
        let mut items = Vec::with_capacity(self.sections.len());
        let mut errors = Vec::new();
        let mut cursor: u32 = 0;

        for section in &self.sections {
            if let Some(origin) = section.origin {
                cursor = origin as u32;
            }
            let mut addrs = Vec::with_capacity(section.items.len());
            for item in &section.items {
                // Addresses past the end are only recorded as errors.
                addrs.push(cursor.min(0xFFFF) as u16);
                match item {
                    Item::Label { symbol, pos } => {
                        let name = self.symbols.name(*symbol);
                        if cursor >= ADDRESS_LIMIT {
                            let msg = format!("label `{name}` lies past $FFFF");
                            errors.push(AsmError::AddressOverflow(msg).at(pos));
                        } else if let Some((_, first)) = &symbols[symbol.0 as usize] {
                            let err = AsmError::DuplicateLabel {
                                name: name.to_string(),
                                first: first.clone(),
                            };
                            errors.push(err.at(pos));
                        } else {
                            symbols[symbol.0 as usize] = Some((cursor as u16, pos.clone()));
                        }
                    }
                    Item::Origin { address, .. } => cursor = *address as u32,
                    Item::Instruction(insn) => {
                        let len =
                            instruction_len(insn.desc, insn.dst.as_ref(), insn.src.as_ref());
                        cursor = advance(cursor, len, &insn.pos, &mut errors);
                    }
                    Item::Data { directive, pos } => {
                        cursor = advance(cursor, directive.size(), pos, &mut errors);
                    }
                }
            }
            debug!(section = %section.kind, end = cursor, "section laid out");
            items.push(addrs);
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }
        debug!(symbols = symbols.iter().flatten().count(), "pass 1 done");
        Ok(Addressed { program: self, layout: Layout { symbols, items } })
    }
}

fn advance(cursor: u32, len: u32, pos: &SourcePos, errors: &mut Vec<Diagnostic>) -> u32 {
    let end = cursor + len;
    // Report only the node that first crosses the limit.
    if end > ADDRESS_LIMIT && cursor < ADDRESS_LIMIT {
        let msg = format!("emission at ${cursor:04X} runs past $FFFF");
        errors.push(AsmError::AddressOverflow(msg).at(pos));
    }
    end
}

impl<'p> Addressed<'p> {
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    fn lookup(&self, value: Value, pos: &SourcePos) -> Result<u16, Diagnostic> {
        match value {
            Value::Literal(v) => Ok(v),
            Value::Symbol(id) => self.layout.address(id).ok_or_else(|| {
                AsmError::UndefinedSymbol(self.program.symbols.name(id).to_string()).at(pos)
            }),
        }
    }

    /// Pass 2: substitute addresses and encode every node. Errors from all
    /// nodes are collected.
    pub fn resolve(&self) -> Result<Resolved, Diagnostics> {
        let mut runs = Vec::new();
        let mut errors = Vec::new();

        for (section, addrs) in self.program.sections.iter().zip(&self.layout.items) {
            for (item, &address) in section.items.iter().zip(addrs) {
                let (bytes, pos) = match item {
                    Item::Instruction(insn) => {
                        let lookup = |op: Operand| op.try_map(|v| self.lookup(v, &insn.pos));
                        let dst = insn.dst.map(lookup).transpose();
                        let src = insn.src.map(lookup).transpose();
                        let (dst, src) = match (dst, src) {
                            (Ok(dst), Ok(src)) => (dst, src),
                            (dst, src) => {
                                errors.extend(dst.err());
                                errors.extend(src.err());
                                continue;
                            }
                        };
                        let bytes = encode_instruction(insn.desc, dst.as_ref(), src.as_ref())
                            .map_err(|e| e.at(&insn.pos));
                        (bytes, &insn.pos)
                    }
                    Item::Data { directive, pos } => {
                        let values: &[Value] = match directive {
                            DataDirective::Word(vs) | DataDirective::Byte(vs) => vs,
                            _ => &[],
                        };
                        let resolved: Result<Vec<u16>, Diagnostic> =
                            values.iter().map(|v| self.lookup(*v, pos)).collect();
                        let bytes = resolved
                            .and_then(|vals| encode_data(directive, &vals).map_err(|e| e.at(pos)));
                        (bytes, pos)
                    }
                    Item::Label { .. } | Item::Origin { .. } => continue,
                };
                match bytes {
                    Ok(bytes) => runs.push(Run { address, bytes, pos: pos.clone() }),
                    Err(e) => errors.push(e),
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        let mut symbols: Vec<SymbolEntry> = self
            .program
            .symbols
            .iter()
            .filter_map(|(id, sym)| {
                let address = self.layout.address(id)?;
                Some(SymbolEntry { name: sym.name.clone(), address })
            })
            .collect();
        symbols.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.name.cmp(&b.name)));
        debug!(runs = runs.len(), "pass 2 done");
        Ok(Resolved { runs, symbols })
    }
}

impl Resolved {
    /// Lay the runs out into one image. Layout errors are fatal.
    pub fn image(&self) -> Result<Image, Diagnostics> {
        ImageWriter::write(self.runs.iter().cloned()).map_err(Diagnostics::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::loader::MemoryLoader;
    use crate::parser::parse;
    use crate::preprocess::{Preprocessor, DEFAULT_MAX_DEPTH};
    use pretty_assertions::assert_eq;

    fn program(src: &str) -> Program {
        let loader = MemoryLoader::new();
        let toks = Preprocessor::new(&loader, DEFAULT_MAX_DEPTH).run_source("t.asm", src).unwrap();
        parse(&toks).unwrap()
    }

    fn addr(layout: &Layout, prog: &Program, name: &str) -> Option<u16> {
        layout.address(prog.symbols.lookup(name)?)
    }

    #[test]
    fn pass_one_is_idempotent() {
        let prog = program(".data\nmsg: .ascii \"hey\"\n.text\nstart: mov %ax, msg\njmp start\n");
        let a = prog.assign_addresses().unwrap().layout().clone();
        let b = prog.assign_addresses().unwrap().layout().clone();
        assert_eq!(a, b);
        assert_eq!(addr(&a, &prog, "msg"), Some(0));
        assert_eq!(addr(&a, &prog, "start"), Some(3));
    }

    #[test]
    fn sections_continue_unless_origin() {
        let prog = program(
            ".text\nnop\nnop\n.data\nd1: .word 1\n@org $0100\nd2: .word 2\n.text\nt2: ret\n",
        );
        let layout = prog.assign_addresses().unwrap().layout().clone();
        assert_eq!(addr(&layout, &prog, "d1"), Some(2));
        assert_eq!(addr(&layout, &prog, "d2"), Some(0x100));
        assert_eq!(addr(&layout, &prog, "t2"), Some(0x102));
    }

    #[test]
    fn duplicate_label_aborts_pass_one() {
        let prog = program(".text\nx: nop\nx: nop\n");
        let err = prog.assign_addresses().unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::DuplicateLabel]);
        match &err.0[0].error {
            AsmError::DuplicateLabel { first, .. } => assert_eq!(first.line, 2),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn overflow_past_address_space() {
        let prog = program(".data\n@org $FFFE\n.resw 2\nend:\n");
        let kinds = prog.assign_addresses().unwrap_err().kinds();
        assert_eq!(kinds, vec![ErrorKind::AddressOverflow, ErrorKind::AddressOverflow]);
    }

    #[test]
    fn filling_to_the_last_byte_is_fine() {
        let prog = program(".data\n@org $FFFE\n.word $BEEF\n");
        let img = prog.assign_addresses().unwrap().resolve().unwrap().image().unwrap();
        assert_eq!((img.base, img.to_bytes()), (0xFFFE, vec![0xEF, 0xBE]));
    }

    #[test]
    fn undefined_symbols_accumulate() {
        let prog = program(".text\njmp nowhere\nmov %ax, #missing\nnop\n");
        let addressed = prog.assign_addresses().unwrap();
        let err = addressed.resolve().unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::UndefinedSymbol, ErrorKind::UndefinedSymbol]);
    }

    #[test]
    fn forward_and_backward_references_agree() {
        let prog = program(".text\njmp fwd\nback: nop\nfwd: jmp back\njmp fwd\n");
        let resolved = prog.assign_addresses().unwrap().resolve().unwrap();
        // jmp = 10 F2 lo hi, nop = 00
        assert_eq!(resolved.runs[0].bytes, vec![0x10, 0xF2, 0x05, 0x00]);
        assert_eq!(resolved.runs[2].bytes, vec![0x10, 0xF2, 0x04, 0x00]);
        assert_eq!(resolved.runs[3].bytes, resolved.runs[0].bytes);
    }

    #[test]
    fn symbol_listing_sorted_by_address() {
        let prog = program(".text\njmp b\nb: nop\na: nop\n");
        let resolved = prog.assign_addresses().unwrap().resolve().unwrap();
        assert_eq!(
            resolved.symbols,
            vec![
                SymbolEntry { name: "b".into(), address: 4 },
                SymbolEntry { name: "a".into(), address: 5 },
            ]
        );
    }
}
