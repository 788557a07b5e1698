use crate::ast::{DataDirective, Operand};
use crate::error::AsmError;
use crate::instructions::InstrDesc;
use crate::isa::sis16::{AddressingMode, Width, NO_OPERAND};

pub fn addressing_mode<V>(op: &Operand<V>) -> AddressingMode {
    match op {
        Operand::Register(_) => AddressingMode::Register,
        Operand::Immediate(_) => AddressingMode::Immediate,
        Operand::Direct(_) => AddressingMode::Direct,
        Operand::IndirectMemory(_) => AddressingMode::IndirectMemory,
        Operand::IndirectBase(_) => AddressingMode::IndirectBase,
        Operand::IndirectBaseOffset { negative: false, .. } => AddressingMode::IndirectBasePlus,
        Operand::IndirectBaseOffset { negative: true, .. } => AddressingMode::IndirectBaseMinus,
        Operand::IndirectBaseReg { .. } => AddressingMode::IndirectBaseReg,
        Operand::IndirectBaseScaled { .. } => AddressingMode::IndirectBaseScaled,
    }
}

/// Encoded size in bytes, known from operand shapes alone.
pub fn instruction_len<V>(
    desc: &InstrDesc,
    dst: Option<&Operand<V>>,
    src: Option<&Operand<V>>,
) -> u32 {
    if desc.arity() == 0 {
        return 1;
    }
    let data: u32 = [dst, src]
        .into_iter()
        .flatten()
        .map(|op| addressing_mode(op).data_len(desc.width))
        .sum();
    2 + data
}

fn nibble(op: Option<&Operand<u16>>, width: Width) -> u8 {
    op.map_or(NO_OPERAND, |op| addressing_mode(op).nibble(width))
}

fn operand_data(op: &Operand<u16>, width: Width, out: &mut Vec<u8>) -> Result<(), AsmError> {
    match *op {
        Operand::Register(r) => out.push(r.index),
        Operand::Immediate(v) => match width {
            Width::W16 => out.extend_from_slice(&v.to_le_bytes()),
            Width::W8 => {
                let b = u8::try_from(v).map_err(|_| {
                    AsmError::value(format!("immediate ${v:X} does not fit in 8 bits"))
                })?;
                out.push(b);
            }
        },
        Operand::Direct(addr) | Operand::IndirectMemory(addr) => {
            out.extend_from_slice(&addr.to_le_bytes())
        }
        Operand::IndirectBase(base) => out.push(base.index),
        Operand::IndirectBaseOffset { base, offset, .. } => {
            out.push(base.index);
            out.extend_from_slice(&offset.to_le_bytes());
        }
        Operand::IndirectBaseReg { base, index } => out.push(base.index << 4 | index.index),
        Operand::IndirectBaseScaled { base, index, scale } => {
            let s = u8::try_from(scale)
                .ok()
                .filter(|s| *s != 0)
                .ok_or_else(|| AsmError::value(format!("scale {scale} outside 1..=255")))?;
            out.push(base.index << 4 | index.index);
            out.push(s);
        }
    }
    Ok(())
}

/// Encode one instruction whose operands carry concrete values.
pub fn encode_instruction(
    desc: &InstrDesc,
    dst: Option<&Operand<u16>>,
    src: Option<&Operand<u16>>,
) -> Result<Vec<u8>, AsmError> {
    let mut out = Vec::with_capacity(instruction_len(desc, dst, src) as usize);
    out.push(desc.opcode);
    if desc.arity() == 0 {
        return Ok(out);
    }
    out.push(nibble(dst, desc.width) << 4 | nibble(src, desc.width));
    for op in [dst, src].into_iter().flatten() {
        operand_data(op, desc.width, &mut out)?;
    }
    Ok(out)
}

/// Encode a data directive. `values` are the resolved `.word`/`.byte`
/// entries, in order; other directives ignore them.
pub fn encode_data(directive: &DataDirective, values: &[u16]) -> Result<Vec<u8>, AsmError> {
    Ok(match directive {
        DataDirective::Word(_) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        DataDirective::Byte(_) => values
            .iter()
            .map(|v| {
                u8::try_from(*v).map_err(|_| {
                    AsmError::AddressOverflow(format!("value ${v:X} does not fit in a byte"))
                })
            })
            .collect::<Result<_, _>>()?,
        DataDirective::Ascii(s) => s.as_bytes().to_vec(),
        DataDirective::Resb(_) | DataDirective::Resw(_) => vec![0; directive.size() as usize],
    })
}
