use miette::{miette, LabeledSpan, Report, Severity};

use crate::{lexer::Token, symbol::Span};

// Lexer errors

pub fn lex_unknown_char(span: Span, line: u32, c: char, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "lex::unknown_char",
        help = "see the documentation for the list of characters allowed in assembly source.",
        labels = vec![LabeledSpan::at(span, "unexpected character")],
        "Unexpected character on line {line}: {c:?}",
    )
    .with_source_code(src.to_string())
}

// Resolver errors

pub fn resolve_duplicate_label(tok: &Token, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "resolve::duplicate_label",
        help = "each label may only be declared once per file.",
        labels = vec![LabeledSpan::at(tok.span, "duplicate label")],
        "Duplicate label on line {}: {}",
        tok.line,
        tok.val.trim_matches(':'),
    )
    .with_source_code(src.to_string())
}

pub fn resolve_duplicate_def(tok: &Token, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "resolve::duplicate_def",
        help = "each definition name may only be declared once per file.",
        labels = vec![LabeledSpan::at(tok.span, "duplicate definition")],
        "Duplicate definition on line {}: {}",
        tok.line,
        tok.val,
    )
    .with_source_code(src.to_string())
}

pub fn resolve_def_expected(expected: &str, found: &Token, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "resolve::def",
        help = "definitions take the form `def NAME \"text\"`.",
        labels = vec![LabeledSpan::at(found.span, "unexpected token")],
        "Expected token of type {expected} on line {}, found {}",
        found.line,
        found.kind,
    )
    .with_source_code(src.to_string())
}

pub fn resolve_def_eof(def: &Token, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "resolve::def",
        help = "definitions take the form `def NAME \"text\"`.",
        labels = vec![LabeledSpan::at(def.span, "incomplete definition")],
        "Unexpected end of file inside definition on line {}",
        def.line,
    )
    .with_source_code(src.to_string())
}

pub fn resolve_reserved_symbol(tok: &Token, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "resolve::reserved",
        help = "labels and definitions may not shadow instruction mnemonics; rename the symbol.",
        labels = vec![LabeledSpan::at(tok.span, "unresolvable symbol")],
        "Unresolvable symbol on line {}: {} is a reserved mnemonic",
        tok.line,
        tok.val,
    )
    .with_source_code(src.to_string())
}

// Code generation errors

pub fn gen_unknown_instr(tok: &Token, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "gen::unknown_instr",
        help = "this is not an instruction mnemonic, nor a label or definition declared in this file.",
        labels = vec![LabeledSpan::at(tok.span, "unknown instruction")],
        "Unknown instruction on line {}: {}",
        tok.line,
        tok.val,
    )
    .with_source_code(src.to_string())
}

pub fn gen_expected(expected: &str, found: &Token, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "gen::unexpected_token",
        help = "check the operands for this instruction.",
        labels = vec![LabeledSpan::at(found.span, "unexpected token")],
        "Expected token of type {expected} on line {}, found {}",
        found.line,
        found.kind,
    )
    .with_source_code(src.to_string())
}

pub fn gen_bad_operands(instr: &Token, found: &str, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "gen::bad_operands",
        help = "check the operand combinations allowed for this instruction.",
        labels = vec![LabeledSpan::at(instr.span, "unsupported operands")],
        "Instruction {} does not take {} operands on line {}",
        instr.val,
        found,
        instr.line,
    )
    .with_source_code(src.to_string())
}

pub fn gen_bad_literal(tok: &Token, src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "gen::bad_literal",
        help = "literals must fit in 32 bits; only the relative jump accepts a negative value.",
        labels = vec![LabeledSpan::at(tok.span, "invalid literal")],
        "Invalid numeric literal on line {}: {}",
        tok.line,
        tok.val,
    )
    .with_source_code(src.to_string())
}

pub fn gen_eof(src: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "gen::unexpected_eof",
        help = "you may be missing operands in your last statement.",
        labels = vec![LabeledSpan::at_offset(src.len().saturating_sub(1), "unexpected end")],
        "Unexpected end of file",
    )
    .with_source_code(src.to_string())
}

// Binary image errors

pub fn image_truncated(len: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "image::truncated",
        help = "a valid image starts with a 4-byte memory size field and ends its header with four 0x1d bytes.",
        "Binary image is truncated: {len} bytes is too short for a header",
    )
}

pub fn image_no_terminator() -> Report {
    miette!(
        severity = Severity::Error,
        code = "image::no_terminator",
        help = "the header's data segment must be terminated by four consecutive 0x1d bytes.",
        "Binary image header is missing its terminator",
    )
}

pub fn image_mem_too_large(cells: u32, limit: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "image::mem_too_large",
        help = "the memory size field of this image exceeds what the interpreter will allocate.",
        "Image requests {cells} memory cells, limit is {limit}",
    )
}

// Runtime faults. The interpreter reports the offset of the faulting
// instruction rather than the program counter's resting position.

pub fn rt_divide_by_zero(at: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "runtime::divide_by_zero",
        "Division by zero at code offset {at:#06x}",
    )
}

pub fn rt_bad_register(at: usize, id: u8) -> Report {
    miette!(
        severity = Severity::Error,
        code = "runtime::bad_register",
        help = "valid register ids are 0 through 3.",
        "Out-of-range register id {id} at code offset {at:#06x}",
    )
}

pub fn rt_bad_memory(at: usize, addr: u32, cells: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "runtime::bad_memory",
        help = "memory is addressed by cell index, starting at zero.",
        "Out-of-range memory address {addr} at code offset {at:#06x} (memory holds {cells} cells)",
    )
}

pub fn rt_negative_target(at: usize, raw: u32) -> Report {
    miette!(
        severity = Severity::Error,
        code = "runtime::negative_target",
        help = "jump targets are offsets from the first byte after the image header.",
        "Jump at code offset {at:#06x} decodes to a negative target ({raw:#010x})",
    )
}

pub fn rt_unknown_opcode(at: usize, byte: u8) -> Report {
    miette!(
        severity = Severity::Error,
        code = "runtime::unknown_opcode",
        help = "the image may be corrupt, or execution may have jumped into operand data.",
        "Unknown opcode {byte:#04x} at code offset {at:#06x}",
    )
}

pub fn rt_stack_underflow(at: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "runtime::stack_underflow",
        "Operand stack underflow at code offset {at:#06x}",
    )
}

pub fn rt_code_overrun(at: usize, len: usize) -> Report {
    miette!(
        severity = Severity::Error,
        code = "runtime::code_overrun",
        help = "the program ran past the end of its code without executing `stp`.",
        "Fetch past the end of the {len}-byte code segment at code offset {at:#06x}",
    )
}
