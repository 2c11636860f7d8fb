/// Bytecode disassembler for compiled prototypes.
use std::fmt::Write;

use crate::opcode::{Op, OperandKind};
use crate::proto::{Constant, Proto};
use vesper_core::string::StringInterner;

/// Disassemble a prototype (and its nested prototypes) into a
/// human-readable string.
pub fn disassemble(proto: &Proto, strings: &StringInterner) -> String {
    let mut out = String::new();
    disassemble_proto(&mut out, proto, strings, 0);
    out
}

fn disassemble_proto(out: &mut String, proto: &Proto, strings: &StringInterner, level: usize) {
    let indent = "  ".repeat(level);

    writeln!(
        out,
        "{indent}{} ({} params, {} upvalues, {} constants, {} bytes)",
        proto.name,
        proto.param_count,
        proto.upvalues.len(),
        proto.constants.len(),
        proto.code.len(),
    )
    .unwrap();

    let mut offset = 0;
    while offset < proto.code.len() {
        offset = disasm_instruction(out, proto, strings, offset, &indent);
    }

    if !proto.upvalues.is_empty() {
        writeln!(out, "{indent}upvalues ({}):", proto.upvalues.len()).unwrap();
        for (i, up) in proto.upvalues.iter().enumerate() {
            let source = if up.from_parent_local { "local" } else { "upvalue" };
            writeln!(
                out,
                "{indent}\t{i}\t{}\tparent {source} {}",
                strings.get(up.name),
                up.index
            )
            .unwrap();
        }
    }

    // Nested prototypes live in the constant pool.
    for k in &proto.constants {
        if let Constant::Proto(p) = k {
            disassemble_proto(out, p, strings, level + 1);
        }
    }
}

/// Disassemble the instruction starting at `offset`; returns the offset of
/// the next instruction.
fn disasm_instruction(
    out: &mut String,
    proto: &Proto,
    strings: &StringInterner,
    offset: usize,
    indent: &str,
) -> usize {
    let line = proto.line_at(offset);
    write!(out, "{indent}\t{offset:>4}\t[{line}]\t").unwrap();

    let op = match Op::from_u8(proto.code[offset]) {
        Some(op) => op,
        None => {
            writeln!(out, "?? {:#04x}", proto.code[offset]).unwrap();
            return offset + 1;
        }
    };
    write!(out, "{:<16}", op.name()).unwrap();

    let next = match op.operand_kind() {
        OperandKind::None => offset + 1,
        OperandKind::Byte => {
            let arg = proto.code[offset + 1];
            write!(out, "{arg}").unwrap();
            annotate(out, proto, strings, op, arg as usize);
            offset + 2
        }
        OperandKind::Short => {
            let raw = u16::from_be_bytes([proto.code[offset + 1], proto.code[offset + 2]]);
            match op {
                Op::Jump | Op::JumpIfFalse | Op::JumpIfTrue => {
                    let rel = raw as i16;
                    let target = (offset as i64 + 3 + rel as i64) as usize;
                    write!(out, "{rel}\t; to {target}").unwrap();
                }
                _ => {
                    write!(out, "{raw}").unwrap();
                    annotate(out, proto, strings, op, raw as usize);
                }
            }
            offset + 3
        }
    };
    writeln!(out).unwrap();
    next
}

fn annotate(out: &mut String, proto: &Proto, strings: &StringInterner, op: Op, arg: usize) {
    match op {
        Op::Constant | Op::BigConstant => {
            if let Some(k) = proto.constants.get(arg) {
                write!(out, "\t; ").unwrap();
                format_constant(out, k, strings);
            }
        }
        Op::LoadGlobal | Op::BigLoadGlobal | Op::SetGlobal | Op::BigSetGlobal => {
            if let Some(Constant::Str(id)) = proto.constants.get(arg) {
                write!(out, "\t; {}", strings.get(*id)).unwrap();
            }
        }
        _ => {}
    }
}

fn format_constant(out: &mut String, k: &Constant, strings: &StringInterner) {
    match k {
        Constant::Bool(b) => write!(out, "{b}").unwrap(),
        Constant::Num(n) => write!(out, "{n}").unwrap(),
        Constant::Str(id) => write!(out, "\"{}\"", strings.get(*id)).unwrap(),
        Constant::Proto(p) => write!(out, "{}", p.name).unwrap(),
    }
}
