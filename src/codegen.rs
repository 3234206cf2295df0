use std::str::FromStr;

use miette::Result;

use crate::{
    error,
    lexer::{Token, TokenKind},
    mc::{self, op, Image},
    resolver::SymbolTables,
    symbol::Register,
};

/// Emit a binary image from a fully resolved token sequence. The input must
/// contain only `Opcode`, `Literal`, `Register`, `Address` and `Comma`
/// tokens; anything else is a generation error.
pub fn generate(toks: &[Token], tables: &SymbolTables, src: &str) -> Result<Image> {
    let data = tables
        .defs
        .values()
        .flat_map(|(_, content)| content.bytes())
        .collect();
    let code = CodeGen {
        src,
        toks,
        pos: 0,
        code: Vec::new(),
    }
    .emit()?;

    Ok(Image {
        mem_cells: mc::MEM_CELLS,
        data,
        code,
    })
}

struct CodeGen<'a> {
    src: &'a str,
    toks: &'a [Token],
    pos: usize,
    code: Vec<u8>,
}

impl<'a> CodeGen<'a> {
    fn emit(mut self) -> Result<Vec<u8>> {
        while self.pos < self.toks.len() {
            let tok = &self.toks[self.pos];
            self.pos += 1;
            if tok.kind != TokenKind::Opcode {
                return Err(error::gen_expected("opcode", tok, self.src));
            }

            match tok.val.as_str() {
                "stp" => self.code.push(op::STP),
                "psh" => match self.peek_kind() {
                    Some(TokenKind::Literal) => {
                        self.code.push(op::PSH_LIT);
                        self.put_lit()?;
                    }
                    Some(TokenKind::Register) => {
                        self.code.push(op::PSH_REG);
                        self.put_reg()?;
                    }
                    _ => return Err(self.bad_operands(tok)),
                },
                "pop" => match self.peek_kind() {
                    Some(TokenKind::Register) => {
                        self.code.push(op::POP_REG);
                        self.put_reg()?;
                    }
                    Some(TokenKind::Address) => {
                        self.code.push(op::POP_MEM);
                        self.put_addr()?;
                    }
                    _ => return Err(self.bad_operands(tok)),
                },
                "dup" => self.code.push(op::DUP),
                "mov" => self.emit_mov(tok)?,
                "add" => self.emit_alu(tok, op::ADD_REG, op::ADD_STACK)?,
                "sub" => self.emit_alu(tok, op::SUB_REG, op::SUB_STACK)?,
                "mul" => self.emit_alu(tok, op::MUL_REG, op::MUL_STACK)?,
                "div" => self.emit_alu(tok, op::DIV_REG, op::DIV_STACK)?,
                "and" => self.emit_alu(tok, op::AND_REG, op::AND_STACK)?,
                "or" => self.emit_alu(tok, op::OR_REG, op::OR_STACK)?,
                "xor" => self.emit_alu(tok, op::XOR_REG, op::XOR_STACK)?,
                "not" => self.emit_not(tok)?,
                "cmp" => self.emit_cmp(tok)?,
                "jmpa" => self.emit_jump(op::JMPA)?,
                "jmpr" => {
                    self.code.push(op::JMPR);
                    self.put_lit_signed()?;
                }
                "je" => self.emit_jump(op::JE)?,
                "jne" => self.emit_jump(op::JNE)?,
                "jg" => self.emit_jump(op::JG)?,
                "js" => self.emit_jump(op::JS)?,
                "jo" => self.emit_jump(op::JO)?,
                "cal" => self.emit_jump(op::CAL)?,
                "ret" => self.code.push(op::RET),
                "frs" => self.code.push(op::FRS),
                "syscall" => self.code.push(op::SYSCALL),
                _ => return Err(error::gen_unknown_instr(tok, self.src)),
            }
        }
        Ok(self.code)
    }

    /// Arithmetic/logic mnemonics share two encodings: a register-pair form
    /// when a register operand follows, and a stack-pair form when the next
    /// token is already the next instruction (or the stream ends).
    fn emit_alu(&mut self, instr: &Token, reg_op: u8, stack_op: u8) -> Result<()> {
        match self.peek_kind() {
            Some(TokenKind::Register) => {
                self.code.push(reg_op);
                self.put_reg()?;
                self.expect_comma()?;
                self.put_reg()?;
                Ok(())
            }
            None | Some(TokenKind::Opcode) => {
                self.code.push(stack_op);
                Ok(())
            }
            Some(_) => Err(self.bad_operands(instr)),
        }
    }

    /// `not` is unary: one register operand, or the stack form.
    fn emit_not(&mut self, instr: &Token) -> Result<()> {
        match self.peek_kind() {
            Some(TokenKind::Register) => {
                self.code.push(op::NOT_REG);
                self.put_reg()
            }
            None | Some(TokenKind::Opcode) => {
                self.code.push(op::NOT_STACK);
                Ok(())
            }
            Some(_) => Err(self.bad_operands(instr)),
        }
    }

    fn emit_mov(&mut self, instr: &Token) -> Result<()> {
        let dst = self.peek_kind();
        let src_kind = self.toks.get(self.pos + 2).map(|t| t.kind);
        match (dst, src_kind) {
            (Some(TokenKind::Register), Some(TokenKind::Literal)) => {
                self.code.push(op::MOV_REG_LIT);
                self.put_reg()?;
                self.expect_comma()?;
                self.put_lit()
            }
            (Some(TokenKind::Address), Some(TokenKind::Literal)) => {
                self.code.push(op::MOV_MEM_LIT);
                self.put_addr()?;
                self.expect_comma()?;
                self.put_lit()
            }
            (Some(TokenKind::Register), Some(TokenKind::Address)) => {
                self.code.push(op::MOV_REG_MEM);
                self.put_reg()?;
                self.expect_comma()?;
                self.put_addr()
            }
            (Some(TokenKind::Address), Some(TokenKind::Register)) => {
                self.code.push(op::MOV_MEM_REG);
                self.put_addr()?;
                self.expect_comma()?;
                self.put_reg()
            }
            _ => Err(self.bad_operands(instr)),
        }
    }

    fn emit_cmp(&mut self, instr: &Token) -> Result<()> {
        match self.peek_kind() {
            Some(TokenKind::Register) => {
                let rhs = self.toks.get(self.pos + 2).map(|t| t.kind);
                match rhs {
                    Some(TokenKind::Register) => {
                        self.code.push(op::CMP_REG_REG);
                        self.put_reg()?;
                        self.expect_comma()?;
                        self.put_reg()
                    }
                    Some(TokenKind::Literal) => {
                        self.code.push(op::CMP_REG_LIT);
                        self.put_reg()?;
                        self.expect_comma()?;
                        self.put_lit()
                    }
                    _ => Err(self.bad_operands(instr)),
                }
            }
            Some(TokenKind::Literal) => {
                self.code.push(op::CMP_STACK_LIT);
                self.put_lit()
            }
            _ => Err(self.bad_operands(instr)),
        }
    }

    /// Jumps and calls take a single unsigned literal: a code offset,
    /// usually produced by resolving a label.
    fn emit_jump(&mut self, opcode: u8) -> Result<()> {
        self.code.push(opcode);
        self.put_lit()
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.toks.get(self.pos).map(|t| t.kind)
    }

    fn next(&mut self) -> Result<&'a Token> {
        let tok = self
            .toks
            .get(self.pos)
            .ok_or_else(|| error::gen_eof(self.src))?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<&'a Token> {
        let tok = self.next()?;
        if tok.kind == kind {
            Ok(tok)
        } else {
            Err(error::gen_expected(expected, tok, self.src))
        }
    }

    fn expect_comma(&mut self) -> Result<()> {
        self.expect(TokenKind::Comma, "comma")?;
        Ok(())
    }

    fn put_reg(&mut self) -> Result<()> {
        let tok = self.expect(TokenKind::Register, "register")?;
        match Register::from_str(&tok.val) {
            Ok(reg) => {
                self.code.push(reg.id());
                Ok(())
            }
            Err(()) => unreachable!("lexer only classifies a-d as registers"),
        }
    }

    fn put_lit(&mut self) -> Result<()> {
        let tok = self.expect(TokenKind::Literal, "literal")?;
        let val: u32 = tok
            .val
            .parse()
            .map_err(|_| error::gen_bad_literal(tok, self.src))?;
        self.code.extend_from_slice(&val.to_be_bytes());
        Ok(())
    }

    /// The relative jump's operand is the only signed encoding.
    fn put_lit_signed(&mut self) -> Result<()> {
        let tok = self.expect(TokenKind::Literal, "literal")?;
        let val: i32 = tok
            .val
            .parse()
            .map_err(|_| error::gen_bad_literal(tok, self.src))?;
        self.code.extend_from_slice(&val.to_be_bytes());
        Ok(())
    }

    fn put_addr(&mut self) -> Result<()> {
        let tok = self.expect(TokenKind::Address, "address")?;
        let val: u32 = tok
            .val
            .parse()
            .map_err(|_| error::gen_bad_literal(tok, self.src))?;
        self.code.extend_from_slice(&val.to_be_bytes());
        Ok(())
    }

    fn bad_operands(&self, instr: &Token) -> miette::Report {
        let found = match self.peek_kind() {
            Some(kind) => kind.to_string(),
            None => "no".to_string(),
        };
        error::gen_bad_operands(instr, &found, self.src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble;

    fn code(src: &str) -> Vec<u8> {
        assemble(src).unwrap().code
    }

    #[test]
    fn header_layout_with_defs() {
        let image = assemble("def first \"AB\"\ndef second \"CD\"\nstp").unwrap();
        assert_eq!(
            image.to_bytes(),
            vec![0x00, 0x00, 0x0e, 0x38, b'A', b'B', b'C', b'D', 0x1d, 0x1d, 0x1d, 0x1d, 0x00]
        );
    }

    #[test]
    fn push_encodings() {
        assert_eq!(code("psh 258"), vec![op::PSH_LIT, 0, 0, 1, 2]);
        assert_eq!(code("psh c"), vec![op::PSH_REG, 2]);
    }

    #[test]
    fn pop_encodings() {
        assert_eq!(code("pop b"), vec![op::POP_REG, 1]);
        assert_eq!(code("pop &9"), vec![op::POP_MEM, 0, 0, 0, 9]);
    }

    #[test]
    fn mov_encodings() {
        assert_eq!(code("mov a, 5"), vec![op::MOV_REG_LIT, 0, 0, 0, 0, 5]);
        assert_eq!(
            code("mov &7, 5"),
            vec![op::MOV_MEM_LIT, 0, 0, 0, 7, 0, 0, 0, 5]
        );
        assert_eq!(code("mov a, &7"), vec![op::MOV_REG_MEM, 0, 0, 0, 0, 7]);
        assert_eq!(code("mov &7, d"), vec![op::MOV_MEM_REG, 0, 0, 0, 7, 3]);
    }

    #[test]
    fn alu_selects_register_or_stack_form() {
        assert_eq!(
            code("add a, b\nadd\nstp"),
            vec![op::ADD_REG, 0, 1, op::ADD_STACK, op::STP]
        );
        assert_eq!(code("sub d, c"), vec![op::SUB_REG, 3, 2]);
        assert_eq!(code("xor\nstp"), vec![op::XOR_STACK, op::STP]);
    }

    #[test]
    fn alu_stack_form_at_end_of_stream() {
        assert_eq!(code("psh 1\npsh 2\nadd"), vec![op::PSH_LIT, 0, 0, 0, 1, op::PSH_LIT, 0, 0, 0, 2, op::ADD_STACK]);
    }

    #[test]
    fn not_is_unary() {
        assert_eq!(code("not a\nnot\nstp"), vec![op::NOT_REG, 0, op::NOT_STACK, op::STP]);
    }

    #[test]
    fn cmp_encodings() {
        assert_eq!(code("cmp a, b"), vec![op::CMP_REG_REG, 0, 1]);
        assert_eq!(code("cmp a, 7"), vec![op::CMP_REG_LIT, 0, 0, 0, 0, 7]);
        assert_eq!(code("cmp 7"), vec![op::CMP_STACK_LIT, 0, 0, 0, 7]);
    }

    #[test]
    fn relative_jump_is_signed() {
        assert_eq!(code("jmpr -5"), vec![op::JMPR, 0xff, 0xff, 0xff, 0xfb]);
    }

    #[test]
    fn forward_label_resolves_to_exact_offset() {
        assert_eq!(
            code("jmpa end\npsh 1\nend: stp"),
            vec![op::JMPA, 0, 0, 0, 10, op::PSH_LIT, 0, 0, 0, 1, op::STP]
        );
    }

    #[test]
    fn call_and_return() {
        assert_eq!(code("cal 9\nret"), vec![op::CAL, 0, 0, 0, 9, op::RET]);
    }

    #[test]
    fn conditional_jumps() {
        assert_eq!(code("je 1\njo 2"), vec![op::JE, 0, 0, 0, 1, op::JO, 0, 0, 0, 2]);
    }

    #[test]
    fn bad_operand_combination_is_fatal() {
        assert!(assemble("add 5, 6").is_err());
        assert!(assemble("mov 5, a").is_err());
        assert!(assemble("psh &1").is_err());
    }

    #[test]
    fn unknown_symbol_is_fatal() {
        assert!(assemble("jmpa nowhere").is_err());
        assert!(assemble("bogus").is_err());
    }

    #[test]
    fn negative_unsigned_literal_is_fatal() {
        assert!(assemble("psh -1").is_err());
    }

    #[test]
    fn missing_comma_is_fatal() {
        assert!(assemble("add a b").is_err());
    }
}
