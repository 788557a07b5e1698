use tracing::debug;

use crate::ast::{
    DataDirective, Instruction, Item, Operand, OperandKind, Program, Section, SectionKind, Value,
};
use crate::error::{AsmError, Diagnostic, Diagnostics, SourcePos};
use crate::instructions::{lookup, InstrDesc};
use crate::isa::sis16::{Register, Width};
use crate::token::{parse_number, Token, TokenKind};

/// Shape legality of a destination/source pair, independent of mnemonic.
/// Defined for every combination, including absent operands.
pub fn check_pair(
    dst: Option<OperandKind>,
    src: Option<OperandKind>,
) -> Result<(), &'static str> {
    match (dst, src) {
        (Some(OperandKind::Immediate), _) => Err("an immediate cannot be a destination"),
        (Some(OperandKind::DirectLabel), _) => {
            Err("a bare label cannot be a destination; write through `[label]` instead")
        }
        (Some(d), Some(s)) if d.is_memory() && s.is_memory() => {
            Err("both operands address memory")
        }
        _ => Ok(()),
    }
}

/// Full legality check for one instruction: pair shape, then the operand
/// classes the mnemonic accepts.
pub fn check_operands(
    desc: &InstrDesc,
    dst: Option<OperandKind>,
    src: Option<OperandKind>,
) -> Result<(), AsmError> {
    check_pair(dst, src).map_err(AsmError::shape)?;
    for (slot, class, kind) in [("destination", desc.dst, dst), ("source", desc.src, src)] {
        if let Some(kind) = kind {
            if !class.admits(kind) {
                let msg = format!("`{}` does not accept a {kind} {slot}", desc.mnemonic);
                return Err(AsmError::shape(msg));
            }
        }
    }
    Ok(())
}

fn number(tok: &Token, max: u32) -> Result<u32, Diagnostic> {
    match &tok.kind {
        TokenKind::Number { digits, radix } => parse_number(digits, *radix, max).ok_or_else(|| {
            let err = if max == 0xFFFF {
                AsmError::AddressOverflow(format!(
                    "literal `{}` is larger than a 16-bit word (max is $FFFF)",
                    tok.text
                ))
            } else {
                AsmError::Syntax(format!("literal `{}` is larger than ${max:X}", tok.text))
            };
            err.at(&tok.pos)
        }),
        _ => Err(AsmError::Syntax(format!("expected a number, found {tok}")).at(&tok.pos)),
    }
}

fn split_commas(toks: &[Token]) -> Vec<&[Token]> {
    if toks.is_empty() {
        return Vec::new();
    }
    toks.split(|t| t.kind == TokenKind::Comma).collect()
}

struct Parser {
    program: Program,
    pending_origin: Option<u16>,
    errors: Vec<Diagnostic>,
}

impl Parser {
    fn value(&mut self, tok: &Token, max: u32) -> Result<Value, Diagnostic> {
        match &tok.kind {
            TokenKind::Ident(name) => Ok(Value::Symbol(self.program.symbols.intern(name))),
            TokenKind::Number { .. } => Ok(Value::Literal(number(tok, max)? as u16)),
            _ => {
                let msg = format!("expected a number or label, found {tok}");
                Err(AsmError::Syntax(msg).at(&tok.pos))
            }
        }
    }

    fn section(&mut self, pos: &SourcePos, what: &str) -> Result<&mut Section, Diagnostic> {
        self.program.sections.last_mut().ok_or_else(|| {
            AsmError::Syntax(format!("{what} before the first `.text` or `.data`")).at(pos)
        })
    }

    fn push(&mut self, item: Item, pos: &SourcePos, what: &str) -> Result<(), Diagnostic> {
        self.section(pos, what)?.items.push(item);
        Ok(())
    }

    fn line(&mut self, line: &[Token]) -> Result<(), Diagnostic> {
        let Some(first) = line.first() else {
            return Ok(());
        };

        if let TokenKind::Origin(address) = first.kind {
            expect_end(&line[1..])?;
            if self.program.sections.is_empty() {
                self.pending_origin = Some(address);
            } else {
                let item = Item::Origin { address, pos: first.pos.clone() };
                self.push(item, &first.pos, "origin")?;
            }
            return Ok(());
        }

        let (label, rest) = match &first.kind {
            TokenKind::Label(name) => (Some((name.as_str(), &first.pos)), &line[1..]),
            _ => (None, line),
        };

        // A section header takes effect before a label on the same line.
        if let Some(Token { kind: TokenKind::Directive(d), pos, .. }) = rest.first() {
            let kind = match d.as_str() {
                "text" => Some(SectionKind::Text),
                "data" => Some(SectionKind::Data),
                _ => None,
            };
            if let Some(kind) = kind {
                expect_end(&rest[1..])?;
                self.program.sections.push(Section {
                    kind,
                    origin: self.pending_origin.take(),
                    items: Vec::new(),
                    pos: pos.clone(),
                });
            }
        }

        if let Some((name, pos)) = label {
            let symbol = self.program.symbols.intern(name);
            self.push(Item::Label { symbol, pos: pos.clone() }, pos, "label")?;
        }

        let Some(head) = rest.first() else {
            return Ok(());
        };
        match &head.kind {
            TokenKind::Directive(d) if d == "text" || d == "data" => Ok(()),
            TokenKind::Directive(d) => {
                let directive = self.data(d, head, &rest[1..])?;
                let item = Item::Data { directive, pos: head.pos.clone() };
                self.push(item, &head.pos, &format!("`.{d}`"))
            }
            TokenKind::Ident(m) => {
                let insn = self.instruction(m, head, &rest[1..])?;
                self.push(Item::Instruction(insn), &head.pos, "instruction")
            }
            _ => {
                let msg = format!("expected a mnemonic or directive, found {head}");
                Err(AsmError::Syntax(msg).at(&head.pos))
            }
        }
    }

    fn data(
        &mut self,
        name: &str,
        head: &Token,
        args: &[Token],
    ) -> Result<DataDirective, Diagnostic> {
        match name {
            "word" | "byte" => {
                let max = if name == "word" { 0xFFFF } else { 0xFF };
                let mut values = Vec::new();
                for group in split_commas(args) {
                    match group {
                        [tok] => values.push(self.value(tok, max)?),
                        [] => {
                            let msg = format!("empty value in `.{name}`");
                            return Err(AsmError::Syntax(msg).at(&head.pos));
                        }
                        [_, extra, ..] => {
                            let msg = format!("unexpected {extra} in `.{name}`");
                            return Err(AsmError::Syntax(msg).at(&extra.pos));
                        }
                    }
                }
                if values.is_empty() {
                    let msg = format!("`.{name}` needs at least one value");
                    return Err(AsmError::Syntax(msg).at(&head.pos));
                }
                Ok(if name == "word" {
                    DataDirective::Word(values)
                } else {
                    DataDirective::Byte(values)
                })
            }
            "ascii" => match args {
                [Token { kind: TokenKind::Str(s), .. }] => Ok(DataDirective::Ascii(s.clone())),
                _ => {
                    Err(AsmError::Syntax("`.ascii` takes one string literal".into()).at(&head.pos))
                }
            },
            "resb" | "resw" => match args {
                [tok] => {
                    let n = number(tok, 0xFFFF)? as u16;
                    Ok(if name == "resb" { DataDirective::Resb(n) } else { DataDirective::Resw(n) })
                }
                _ => Err(AsmError::Syntax(format!("`.{name}` takes one count")).at(&head.pos)),
            },
            other => Err(AsmError::Syntax(format!("unknown directive `.{other}`")).at(&head.pos)),
        }
    }

    fn instruction(
        &mut self,
        mnemonic: &str,
        head: &Token,
        args: &[Token],
    ) -> Result<Instruction, Diagnostic> {
        let desc = lookup(mnemonic)
            .ok_or_else(|| AsmError::UnknownMnemonic(mnemonic.to_string()).at(&head.pos))?;

        let groups = split_commas(args);
        if groups.len() != desc.arity() {
            return Err(AsmError::Syntax(format!(
                "`{}` takes {} operand(s), found {}",
                desc.mnemonic,
                desc.arity(),
                groups.len()
            ))
            .at(&head.pos));
        }
        let mut operands = Vec::with_capacity(groups.len());
        for group in groups {
            operands.push(self.operand(group, desc, &head.pos)?);
        }

        let mut it = operands.into_iter();
        let dst = if desc.dst.is_empty() { None } else { it.next() };
        let src = if desc.src.is_empty() { None } else { it.next() };

        check_operands(desc, dst.map(|o| o.kind()), src.map(|o| o.kind()))
            .map_err(|e| e.at(&head.pos))?;
        Ok(Instruction { desc, dst, src, pos: head.pos.clone() })
    }

    fn operand(
        &mut self,
        toks: &[Token],
        desc: &InstrDesc,
        at: &SourcePos,
    ) -> Result<Operand, Diagnostic> {
        use TokenKind as K;
        let Some(first) = toks.first() else {
            return Err(AsmError::Syntax("empty operand".into()).at(at));
        };

        match toks {
            // 8-bit immediates are range-checked by the encoder.
            [Token { kind: K::Hash, .. }, v] => Ok(Operand::Immediate(self.value(v, 0xFFFF)?)),
            [Token { kind: K::Register(name), pos, .. }] => {
                Ok(Operand::Register(register(name, desc, pos)?))
            }
            [v @ Token { kind: K::Number { .. } | K::Ident(_), .. }] => {
                Ok(Operand::Direct(self.value(v, 0xFFFF)?))
            }
            [Token { kind: K::LBracket, .. }, inner @ .., Token { kind: K::RBracket, .. }] => {
                self.memory(inner, first)
            }
            _ => {
                let msg = format!("malformed operand starting at {first}");
                Err(AsmError::Syntax(msg).at(&first.pos))
            }
        }
    }

    fn memory(&mut self, inner: &[Token], open: &Token) -> Result<Operand, Diagnostic> {
        use TokenKind as K;
        match inner {
            [Token { kind: K::Hash, pos, .. }, ..] => {
                Err(AsmError::shape("an immediate cannot be dereferenced").at(pos))
            }
            [v @ Token { kind: K::Number { .. } | K::Ident(_), .. }] => {
                Ok(Operand::IndirectMemory(self.value(v, 0xFFFF)?))
            }
            [Token { kind: K::Register(b), pos, .. }] => {
                Ok(Operand::IndirectBase(address_register(b, pos)?))
            }
            [
                Token { kind: K::Register(b), pos, .. },
                sign @ Token { kind: K::Plus | K::Minus, .. },
                n @ Token { kind: K::Number { .. }, .. },
            ] => Ok(Operand::IndirectBaseOffset {
                base: address_register(b, pos)?,
                offset: number(n, 0xFFFF)? as u16,
                negative: sign.kind == K::Minus,
            }),
            [
                Token { kind: K::Register(b), pos: bp, .. },
                Token { kind: K::Plus, .. },
                Token { kind: K::Register(i), pos: ip, .. },
            ] => Ok(Operand::IndirectBaseReg {
                base: address_register(b, bp)?,
                index: address_register(i, ip)?,
            }),
            [
                Token { kind: K::Register(b), pos: bp, .. },
                Token { kind: K::Plus, .. },
                Token { kind: K::Register(i), pos: ip, .. },
                Token { kind: K::Star, .. },
                n @ Token { kind: K::Number { .. }, .. },
            ] => {
                Ok(Operand::IndirectBaseScaled {
                    base: address_register(b, bp)?,
                    index: address_register(i, ip)?,
                    scale: number(n, 0xFFFF)? as u16,
                })
            }
            _ => Err(AsmError::Syntax("malformed memory operand".into()).at(&open.pos)),
        }
    }
}

fn register(name: &str, desc: &InstrDesc, pos: &SourcePos) -> Result<Register, Diagnostic> {
    if let Some(r) = Register::parse(name, desc.width) {
        return Ok(r);
    }
    let err = match Register::width_of(name) {
        Some(w) => AsmError::Syntax(format!(
            "`%{name}` is a {w} register but `{}` takes {} operands",
            desc.mnemonic, desc.width
        )),
        None => AsmError::Syntax(format!("unknown register `%{name}`")),
    };
    Err(err.at(pos))
}

/// Registers inside brackets hold addresses and are always 16-bit.
fn address_register(name: &str, pos: &SourcePos) -> Result<Register, Diagnostic> {
    Register::parse(name, Width::W16).ok_or_else(|| {
        let err = match Register::width_of(name) {
            Some(_) => AsmError::Syntax(format!(
                "`%{name}` cannot hold an address; use a 16-bit register"
            )),
            None => AsmError::Syntax(format!("unknown register `%{name}`")),
        };
        err.at(pos)
    })
}

fn expect_end(rest: &[Token]) -> Result<(), Diagnostic> {
    match rest.first() {
        Some(t) => Err(AsmError::Syntax(format!("unexpected {t}")).at(&t.pos)),
        None => Ok(()),
    }
}

/// Parse an expanded token stream. Bad lines are recorded and skipped so
/// that every syntax error in the file is reported.
pub fn parse(tokens: &[Token]) -> Result<Program, Diagnostics> {
    let mut p = Parser { program: Program::default(), pending_origin: None, errors: Vec::new() };

    for line in tokens.split(Token::is_newline) {
        if let Err(e) = p.line(line) {
            p.errors.push(e);
        }
    }
    if p.pending_origin.is_some() && p.program.sections.is_empty() {
        if let Some(t) = tokens.first() {
            let err = AsmError::Syntax("origin without a following section".into());
            p.errors.push(err.at(&t.pos));
        }
    }

    if !p.errors.is_empty() {
        return Err(p.errors.into());
    }
    debug!(sections = p.program.sections.len(), symbols = p.program.symbols.len(), "parsed");
    Ok(p.program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ModeStage};
    use crate::loader::MemoryLoader;
    use crate::preprocess::{Preprocessor, DEFAULT_MAX_DEPTH};
    use pretty_assertions::assert_eq;

    fn parse_src(src: &str) -> Result<Program, Diagnostics> {
        let loader = MemoryLoader::new();
        let toks = Preprocessor::new(&loader, DEFAULT_MAX_DEPTH).run_source("t.asm", src)?;
        parse(&toks)
    }

    fn only_instruction(src: &str) -> Instruction {
        let prog = parse_src(&format!(".text\n{src}\n")).unwrap();
        match &prog.sections[0].items[..] {
            [Item::Instruction(i)] => i.clone(),
            other => panic!("unexpected items {other:?}"),
        }
    }

    fn first_kind(src: &str) -> ErrorKind {
        parse_src(&format!(".text\n{src}\n")).unwrap_err().0[0].kind()
    }

    fn reg(name: &str) -> Register {
        Register::parse(name, Width::W16).unwrap()
    }

    #[test]
    fn scaled_destination_and_immediate_source() {
        let i = only_instruction("mov [%sp + %ax * 2], #$F354");
        assert_eq!(i.desc.opcode, 0x01);
        let dst = Operand::IndirectBaseScaled { base: reg("sp"), index: reg("ax"), scale: 2 };
        assert_eq!(i.dst, Some(dst));
        assert_eq!(i.src, Some(Operand::Immediate(Value::Literal(0xF354))));
    }

    #[test]
    fn every_operand_form() {
        let cases = [
            ("push %bx", Operand::Register(reg("bx"))),
            ("push #10", Operand::Immediate(Value::Literal(10))),
            ("push $1234", Operand::Direct(Value::Literal(0x1234))),
            ("push [$1234]", Operand::IndirectMemory(Value::Literal(0x1234))),
            ("push [%bp]", Operand::IndirectBase(reg("bp"))),
            (
                "push [%bp + 4]",
                Operand::IndirectBaseOffset { base: reg("bp"), offset: 4, negative: false },
            ),
            (
                "push [%bp - %110]",
                Operand::IndirectBaseOffset { base: reg("bp"), offset: 6, negative: true },
            ),
            (
                "push [%bp + %cx]",
                Operand::IndirectBaseReg { base: reg("bp"), index: reg("cx") },
            ),
        ];
        for (src, want) in cases {
            assert_eq!(only_instruction(src).src, Some(want), "{src}");
        }
    }

    #[test]
    fn labels_are_interned_once() {
        let prog = parse_src(".text\nstart: jmp start\njmp [start]\n").unwrap();
        assert_eq!(prog.symbols.len(), 1);
        let id = prog.symbols.lookup("start").unwrap();
        let Item::Instruction(i) = &prog.sections[0].items[1] else { panic!() };
        assert_eq!(i.src, Some(Operand::Direct(Value::Symbol(id))));
    }

    #[test]
    fn byte_width_uses_eight_bit_registers() {
        let i = only_instruction("movb %ah, [%bx]");
        assert_eq!(i.dst, Some(Operand::Register(Register::parse("ah", Width::W8).unwrap())));
        assert_eq!(first_kind("mov %al, #1"), ErrorKind::Syntax);
        assert_eq!(first_kind("movb %ax, #1"), ErrorKind::Syntax);
        assert_eq!(first_kind("movb %al, [%al]"), ErrorKind::Syntax);
    }

    #[test]
    fn shape_violations() {
        for src in [
            "mov [$10], [$20]",
            "mov $10, [%bx]",
            "mov #1, %ax",
            "mov target, %ax",
            "mov %ax, [#1]",
            "ssc [%bx]",
            "pop #1",
        ] {
            let err = parse_src(&format!(".text\n{src}\n")).unwrap_err();
            match &err.0[0].error {
                AsmError::IllegalAddressingMode { stage, .. } => {
                    assert_eq!(*stage, ModeStage::Shape, "{src}")
                }
                other => panic!("{src}: {other:?}"),
            }
        }
    }

    #[test]
    fn label_destination_through_brackets_is_fine() {
        let i = only_instruction("mov [counter], %ax");
        assert!(matches!(i.dst, Some(Operand::IndirectMemory(Value::Symbol(_)))));
    }

    #[test]
    fn classification_errors() {
        assert_eq!(first_kind("mul %ax, %bx"), ErrorKind::UnknownMnemonic);
        assert_eq!(first_kind("mov %ax"), ErrorKind::Syntax);
        assert_eq!(first_kind("ret %ax"), ErrorKind::Syntax);
        assert_eq!(first_kind("mov %ax, #$10000"), ErrorKind::AddressOverflow);
        assert_eq!(first_kind("mov %xx, #1"), ErrorKind::Syntax);
    }

    #[test]
    fn errors_accumulate_per_line() {
        let err = parse_src(".text\nmul\nmov %ax\nnop\nfoo %bx\n").unwrap_err();
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::UnknownMnemonic, ErrorKind::Syntax, ErrorKind::UnknownMnemonic]
        );
        assert_eq!(err.0[1].pos.as_ref().map(|p| p.line), Some(3));
    }

    #[test]
    fn items_before_section_are_rejected() {
        assert_eq!(parse_src("nop\n").unwrap_err().kinds(), vec![ErrorKind::Syntax]);
    }

    #[test]
    fn origin_before_header_applies_to_section() {
        let src = "@org $0200\n.data\nmsg: .ascii \"hi\"\n.text\n@org $0400\nnop\n";
        let prog = parse_src(src).unwrap();
        assert_eq!(prog.sections[0].origin, Some(0x200));
        assert_eq!(prog.sections[1].origin, None);
        assert!(matches!(prog.sections[1].items[0], Item::Origin { address: 0x400, .. }));
    }

    #[test]
    fn data_directives() {
        let src = ".data\n.word 1, $FFFF, tbl\n.byte 7, %11\n\
                   .ascii \"ok\"\n.resb 64\n.resw 16\ntbl:\n";
        let prog = parse_src(src).unwrap();
        let sizes: Vec<u32> = prog.sections[0]
            .items
            .iter()
            .filter_map(|i| match i {
                Item::Data { directive, .. } => Some(directive.size()),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![6, 2, 2, 64, 32]);
        let err = parse_src(".data\n.byte $100\n").unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::Syntax]);
    }

    #[test]
    fn legality_is_total() {
        let mut kinds: Vec<Option<OperandKind>> = vec![None];
        kinds.extend(OperandKind::ALL.iter().copied().map(Some));
        let mut legal = 0;
        for d in &kinds {
            for s in &kinds {
                if check_pair(*d, *s).is_ok() {
                    legal += 1;
                }
            }
        }
        // 8 admissible destinations (incl. none) x 10 sources, minus 6 x 7 memory/memory pairs
        assert_eq!(legal, 8 * 10 - 6 * 7);
    }
}
