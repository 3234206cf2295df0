use std::io::{stdin, stdout, Write};

use colored::Colorize;
use miette::{IntoDiagnostic, Result};

use crate::error;
use crate::mc::{op, Image};

/// Interpreter memory is bounded regardless of what an image's header
/// requests, 16Mi cells at most.
const MEM_LIMIT: usize = 1 << 24;

/// How many memory cells a debug dump shows.
const DUMP_CELLS: usize = 16;

/// Represents complete program state during runtime.
pub struct RunState {
    /// Opcode stream with the header stripped, so that code offset 0 is the
    /// first executable byte and jump targets apply verbatim
    code: Vec<u8>,
    /// Operand stack
    stack: Vec<u32>,
    /// Linear memory, one 32-bit cell per address
    mem: Box<[u32]>,
    /// General purpose registers a-d
    reg: [u32; 4],
    flags: Flags,
    /// Byte index of the next fetch within `code`
    pc: usize,
    /// Start of the currently executing instruction, reported on faults
    op_pc: usize,
    /// Operand-stack depth recorded at the most recent call
    frame_base: usize,
}

/// Condition bits set by comparisons and arithmetic. Comparisons accumulate
/// into these without clearing prior state; only `frs` resets them.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Flags {
    pub equal: bool,
    pub not_equal: bool,
    pub greater: bool,
    pub smaller: bool,
    pub overflow: bool,
    pub stop: bool,
}

impl Flags {
    /// Clear every flag except `stop`.
    fn reset(&mut self) {
        *self = Flags {
            stop: self.stop,
            ..Flags::default()
        };
    }
}

impl RunState {
    /// Load an image: definition bytes land in low memory one byte per cell,
    /// so that their header offsets double as memory addresses.
    pub fn try_from(image: Image) -> Result<RunState> {
        let cells = (image.mem_cells as usize).max(image.data.len());
        if cells > MEM_LIMIT {
            return Err(error::image_mem_too_large(image.mem_cells, MEM_LIMIT));
        }

        let mut mem = vec![0u32; cells].into_boxed_slice();
        for (cell, byte) in mem.iter_mut().zip(&image.data) {
            *cell = *byte as u32;
        }

        Ok(RunState {
            code: image.code,
            stack: Vec::new(),
            mem,
            reg: [0; 4],
            flags: Flags::default(),
            pc: 0,
            op_pc: 0,
            frame_base: 0,
        })
    }

    /// Fetch-decode-execute until the stop flag is raised.
    pub fn run(&mut self) -> Result<()> {
        while !self.flags.stop {
            self.step()?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        self.op_pc = self.pc;
        let instr = self.fetch8()?;
        match instr {
            op::STP => self.flags.stop = true,
            op::PSH_LIT => {
                let val = self.fetch32()?;
                self.stack.push(val);
            }
            op::PSH_REG => {
                let reg = self.fetch_reg()?;
                self.stack.push(self.reg[reg]);
            }
            op::POP_REG => {
                let reg = self.fetch_reg()?;
                self.reg[reg] = self.pop()?;
            }
            op::POP_MEM => {
                let addr = self.fetch32()?;
                let val = self.pop()?;
                self.set_mem(addr, val)?;
            }
            op::DUP => {
                let top = self.peek()?;
                self.stack.push(top);
            }
            op::MOV_REG_LIT => {
                let reg = self.fetch_reg()?;
                self.reg[reg] = self.fetch32()?;
            }
            op::MOV_MEM_LIT => {
                let addr = self.fetch32()?;
                let val = self.fetch32()?;
                self.set_mem(addr, val)?;
            }
            op::MOV_REG_MEM => {
                let reg = self.fetch_reg()?;
                let addr = self.fetch32()?;
                self.reg[reg] = self.get_mem(addr)?;
            }
            op::MOV_MEM_REG => {
                let addr = self.fetch32()?;
                let reg = self.fetch_reg()?;
                self.set_mem(addr, self.reg[reg])?;
            }
            op::ADD_REG => self.alu_reg(u32::wrapping_add, |a, b| a.checked_add(b).is_none())?,
            op::ADD_STACK => self.alu_stack(u32::wrapping_add, |a, b| a.checked_add(b).is_none())?,
            // The right-hand operand is the subtrahend; on the stack form it
            // is the first value popped
            op::SUB_REG => self.alu_reg(u32::wrapping_sub, |a, b| b > a)?,
            op::SUB_STACK => self.alu_stack(u32::wrapping_sub, |a, b| b > a)?,
            op::MUL_REG => self.alu_reg(u32::wrapping_mul, |a, b| a.checked_mul(b).is_none())?,
            op::MUL_STACK => self.alu_stack(u32::wrapping_mul, |a, b| a.checked_mul(b).is_none())?,
            op::DIV_REG => {
                let acc = self.fetch_reg()?;
                let rhs = self.fetch_reg()?;
                let divisor = self.reg[rhs];
                if divisor == 0 {
                    return Err(error::rt_divide_by_zero(self.op_pc));
                }
                self.reg[acc] /= divisor;
            }
            op::DIV_STACK => {
                let divisor = self.pop()?;
                let lhs = self.pop()?;
                if divisor == 0 {
                    return Err(error::rt_divide_by_zero(self.op_pc));
                }
                self.stack.push(lhs / divisor);
            }
            op::NOT_REG => {
                let reg = self.fetch_reg()?;
                self.reg[reg] = !self.reg[reg];
            }
            op::NOT_STACK => {
                let val = self.pop()?;
                self.stack.push(!val);
            }
            op::AND_REG => self.alu_reg(|a, b| a & b, |_, _| false)?,
            op::AND_STACK => self.alu_stack(|a, b| a & b, |_, _| false)?,
            op::OR_REG => self.alu_reg(|a, b| a | b, |_, _| false)?,
            op::OR_STACK => self.alu_stack(|a, b| a | b, |_, _| false)?,
            op::XOR_REG => self.alu_reg(|a, b| a ^ b, |_, _| false)?,
            op::XOR_STACK => self.alu_stack(|a, b| a ^ b, |_, _| false)?,
            op::CMP_REG_REG => {
                let lhs = self.reg[self.fetch_reg()?];
                let rhs = self.reg[self.fetch_reg()?];
                self.compare(lhs, rhs);
            }
            op::CMP_REG_LIT => {
                let lhs = self.reg[self.fetch_reg()?];
                let rhs = self.fetch32()?;
                self.compare(lhs, rhs);
            }
            op::CMP_STACK_LIT => {
                let lhs = self.peek()?;
                let rhs = self.fetch32()?;
                self.compare(lhs, rhs);
            }
            op::JMPA => self.jump_absolute()?,
            op::JMPR => {
                let offs = self.fetch32()? as i32;
                // The operand is relative to the start of this instruction,
                // which spans 5 bytes
                let target = self.op_pc as i64 + offs as i64;
                if target < 0 {
                    return Err(error::rt_negative_target(self.op_pc, offs as u32));
                }
                self.pc = target as usize;
            }
            op::JE => self.jump_if(self.flags.equal)?,
            op::JNE => self.jump_if(self.flags.not_equal)?,
            op::JG => self.jump_if(self.flags.greater)?,
            op::JS => self.jump_if(self.flags.smaller)?,
            op::JO => self.jump_if(self.flags.overflow)?,
            op::CAL => {
                let target = self.fetch_target()?;
                for reg in self.reg {
                    self.stack.push(reg);
                }
                self.stack.push(self.pc as u32);
                self.frame_base = self.stack.len();
                self.pc = target;
            }
            op::RET => {
                // Anything the callee left above the frame base is discarded
                // before unwinding, protecting the caller from stack leaks
                self.stack.truncate(self.frame_base);
                let ret = self.pop()?;
                for reg in (0..self.reg.len()).rev() {
                    self.reg[reg] = self.pop()?;
                }
                self.frame_base = self.stack.len();
                self.pc = ret as usize;
            }
            op::FRS => self.flags.reset(),
            op::SYSCALL => self.syscall()?,
            unknown => return Err(error::rt_unknown_opcode(self.op_pc, unknown)),
        }
        Ok(())
    }

    /// Shared big-endian fetch-and-advance used by every 4-byte operand.
    fn fetch32(&mut self) -> Result<u32> {
        let bytes = self
            .code
            .get(self.pc..self.pc + 4)
            .ok_or_else(|| error::rt_code_overrun(self.op_pc, self.code.len()))?;
        let val = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.pc += 4;
        Ok(val)
    }

    fn fetch8(&mut self) -> Result<u8> {
        let byte = *self
            .code
            .get(self.pc)
            .ok_or_else(|| error::rt_code_overrun(self.op_pc, self.code.len()))?;
        self.pc += 1;
        Ok(byte)
    }

    fn fetch_reg(&mut self) -> Result<usize> {
        let id = self.fetch8()?;
        if id as usize >= self.reg.len() {
            return Err(error::rt_bad_register(self.op_pc, id));
        }
        Ok(id as usize)
    }

    /// Fetch an absolute code offset, rejecting values whose sign bit is set.
    fn fetch_target(&mut self) -> Result<usize> {
        let raw = self.fetch32()?;
        if raw & 0x8000_0000 != 0 {
            return Err(error::rt_negative_target(self.op_pc, raw));
        }
        Ok(raw as usize)
    }

    fn pop(&mut self) -> Result<u32> {
        self.stack
            .pop()
            .ok_or_else(|| error::rt_stack_underflow(self.op_pc))
    }

    fn peek(&self) -> Result<u32> {
        self.stack
            .last()
            .copied()
            .ok_or_else(|| error::rt_stack_underflow(self.op_pc))
    }

    fn get_mem(&self, addr: u32) -> Result<u32> {
        self.mem
            .get(addr as usize)
            .copied()
            .ok_or_else(|| error::rt_bad_memory(self.op_pc, addr, self.mem.len()))
    }

    fn set_mem(&mut self, addr: u32, val: u32) -> Result<()> {
        let cells = self.mem.len();
        let cell = self
            .mem
            .get_mut(addr as usize)
            .ok_or_else(|| error::rt_bad_memory(self.op_pc, addr, cells))?;
        *cell = val;
        Ok(())
    }

    fn alu_reg(&mut self, apply: fn(u32, u32) -> u32, overflows: fn(u32, u32) -> bool) -> Result<()> {
        let acc = self.fetch_reg()?;
        let rhs = self.fetch_reg()?;
        let (a, b) = (self.reg[acc], self.reg[rhs]);
        if overflows(a, b) {
            self.flags.overflow = true;
        }
        self.reg[acc] = apply(a, b);
        Ok(())
    }

    fn alu_stack(&mut self, apply: fn(u32, u32) -> u32, overflows: fn(u32, u32) -> bool) -> Result<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        if overflows(lhs, rhs) {
            self.flags.overflow = true;
        }
        self.stack.push(apply(lhs, rhs));
        Ok(())
    }

    /// Comparison flags accumulate until the next `frs`.
    fn compare(&mut self, lhs: u32, rhs: u32) {
        if lhs == rhs {
            self.flags.equal = true;
        } else {
            self.flags.not_equal = true;
        }
        if lhs > rhs {
            self.flags.greater = true;
        }
        if lhs < rhs {
            self.flags.smaller = true;
        }
    }

    fn jump_absolute(&mut self) -> Result<()> {
        self.pc = self.fetch_target()?;
        Ok(())
    }

    /// Conditional jumps skip exactly their 4 operand bytes when untaken.
    fn jump_if(&mut self, flag: bool) -> Result<()> {
        if flag {
            self.jump_absolute()
        } else {
            self.pc += 4;
            Ok(())
        }
    }

    /// Dispatch on register a. Unknown call numbers are ignored.
    fn syscall(&mut self) -> Result<()> {
        match self.reg[0] {
            // Write `c` characters from memory starting at cell `b`
            0 => {
                let base = self.reg[1];
                let count = self.reg[2];
                let mut out = String::with_capacity(count as usize);
                for i in 0..count {
                    let cell = self.get_mem(base.wrapping_add(i))?;
                    out.push((cell & 0xff) as u8 as char);
                }
                print!("{out}");
                stdout().flush().into_diagnostic()?;
            }
            // Read one line of input into memory starting at cell `b`,
            // followed by a single zero cell
            1 => {
                let mut line = String::new();
                stdin().read_line(&mut line).into_diagnostic()?;
                let line = line.trim_end_matches(['\n', '\r']);
                let base = self.reg[1];
                let mut cursor = 0u32;
                for c in line.chars() {
                    self.set_mem(base.wrapping_add(cursor), c as u32)?;
                    cursor += 1;
                }
                self.set_mem(base.wrapping_add(cursor), 0)?;
            }
            // Clear the display
            2 => {
                print!("\x1B[2J\x1B[1;1H");
                stdout().flush().into_diagnostic()?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Report machine state, either after a completed run or at the point of
    /// a fault.
    pub fn dump(&self) {
        println!("\n{}", "------ Registers ------".cyan());
        for (name, val) in ["a", "b", "c", "d"].iter().zip(self.reg) {
            println!(" {name}: {val:#010x} ({val})");
        }

        println!("{}", "-------- Stack --------".cyan());
        if self.stack.is_empty() {
            println!(" (empty)");
        }
        for (depth, val) in self.stack.iter().enumerate().rev() {
            println!(" [{depth}]: {val}");
        }

        println!("{}", "-------- Memory -------".cyan());
        for (addr, val) in self.mem.iter().take(DUMP_CELLS).enumerate() {
            println!(" {addr:#06x}: {val:#010x}");
        }

        println!("{}", "-------- Flags --------".cyan());
        println!(
            " eq={} ne={} gt={} sm={} of={} stop={}",
            self.flags.equal,
            self.flags.not_equal,
            self.flags.greater,
            self.flags.smaller,
            self.flags.overflow,
            self.flags.stop
        );
        println!("{}", "-----------------------".cyan());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble;
    use crate::mc::MEM_CELLS;

    /// Assemble and run a source program to completion.
    fn run_asm(src: &str) -> RunState {
        let image = assemble(src).unwrap();
        let mut state = RunState::try_from(image).unwrap();
        state.run().unwrap();
        state
    }

    fn run_asm_err(src: &str) -> miette::Report {
        let image = assemble(src).unwrap();
        let mut state = RunState::try_from(image).unwrap();
        state.run().unwrap_err()
    }

    fn run_raw_err(code: Vec<u8>) -> miette::Report {
        let mut state = RunState::try_from(Image {
            mem_cells: 64,
            data: Vec::new(),
            code,
        })
        .unwrap();
        state.run().unwrap_err()
    }

    #[test]
    fn stack_add_sums_modulo_and_flags_overflow() {
        let state = run_asm("psh 4294967295\npsh 1\nadd\nstp");
        assert_eq!(state.stack, vec![0]);
        assert!(state.flags.overflow);

        let state = run_asm("psh 2\npsh 3\nadd\nstp");
        assert_eq!(state.stack, vec![5]);
        assert!(!state.flags.overflow);
    }

    #[test]
    fn stack_sub_first_pop_is_subtrahend() {
        let state = run_asm("psh 5\npsh 3\nsub\nstp");
        assert_eq!(state.stack, vec![2]);
        assert!(!state.flags.overflow);

        let state = run_asm("psh 3\npsh 5\nsub\nstp");
        assert_eq!(state.stack, vec![3u32.wrapping_sub(5)]);
        assert!(state.flags.overflow);
    }

    #[test]
    fn register_arithmetic() {
        let state = run_asm("mov a, 6\nmov b, 7\nmul a, b\nstp");
        assert_eq!(state.reg, [42, 7, 0, 0]);

        let state = run_asm("mov c, 12\nmov d, 4\ndiv c, d\nstp");
        assert_eq!(state.reg[2], 3);
    }

    #[test]
    fn bitwise_ops() {
        let state = run_asm("psh 12\npsh 10\nand\nstp");
        assert_eq!(state.stack, vec![8]);

        let state = run_asm("mov a, 12\nmov b, 10\nxor a, b\nstp");
        assert_eq!(state.reg[0], 6);

        let state = run_asm("mov a, 0\nnot a\nstp");
        assert_eq!(state.reg[0], u32::MAX);
    }

    #[test]
    fn dup_duplicates_top() {
        let state = run_asm("psh 3\ndup\nadd\nstp");
        assert_eq!(state.stack, vec![6]);
    }

    #[test]
    fn divide_by_zero_faults() {
        let err = run_asm_err("mov a, 4\nmov b, 0\ndiv a, b\nstp");
        assert!(err.to_string().contains("Division by zero"));

        let err = run_asm_err("psh 4\npsh 0\ndiv\nstp");
        assert!(err.to_string().contains("Division by zero"));
    }

    #[test]
    fn memory_moves_are_cell_addressed() {
        let state = run_asm("mov &3, 7\nmov a, &3\nstp");
        assert_eq!(state.reg[0], 7);
        assert_eq!(state.mem[3], 7);

        let state = run_asm("psh 9\npop &2\nstp");
        assert_eq!(state.mem[2], 9);
        assert!(state.stack.is_empty());
    }

    #[test]
    fn cmp_accumulates_until_frs() {
        let state = run_asm("mov a, 1\nmov b, 2\ncmp a, b\ncmp b, a\nstp");
        assert!(state.flags.not_equal);
        assert!(state.flags.greater);
        assert!(state.flags.smaller);
        assert!(!state.flags.equal);

        let state = run_asm("mov a, 1\nmov b, 2\ncmp a, b\ncmp b, a\nfrs\nstp");
        assert_eq!(
            state.flags,
            Flags {
                stop: true,
                ..Flags::default()
            }
        );
    }

    #[test]
    fn cmp_stack_form_peeks() {
        let state = run_asm("psh 1\ncmp 1\nstp");
        assert!(state.flags.equal);
        assert_eq!(state.stack, vec![1]);
    }

    #[test]
    fn absolute_jump_lands_on_label() {
        let state = run_asm("jmpa end\npsh 1\nend: stp");
        assert!(state.stack.is_empty());
    }

    #[test]
    fn relative_jump_skips_forward() {
        // jmpr is 5 bytes, psh is 5 bytes: offset 10 lands on stp
        let state = run_asm("jmpr 10\npsh 1\nstp");
        assert!(state.stack.is_empty());
    }

    #[test]
    fn relative_jump_negative_target_faults() {
        let err = run_asm_err("jmpr -1\nstp");
        assert!(err.to_string().contains("negative target"));
    }

    #[test]
    fn absolute_jump_sign_bit_faults() {
        let err = run_raw_err(vec![op::JMPA, 0x80, 0, 0, 0]);
        assert!(err.to_string().contains("negative target"));
    }

    #[test]
    fn conditional_jump_skips_operand_when_untaken() {
        let state = run_asm("je 99\nstp");
        assert!(state.flags.stop);
    }

    #[test]
    fn conditional_jump_taken_when_flag_set() {
        let state = run_asm("psh 1\ncmp 1\nje end\npsh 2\nend: psh 7\nstp");
        assert_eq!(state.stack, vec![1, 7]);
    }

    #[test]
    fn call_restores_registers_and_stack_depth() {
        let state = run_asm(
            "mov a, 1\nmov b, 2\nmov c, 3\nmov d, 4\ncal callee\nstp\n\
             callee: mov a, 9\nmov b, 9\npsh 123\npsh 456\nret",
        );
        assert_eq!(state.reg, [1, 2, 3, 4]);
        assert!(state.stack.is_empty());
        assert_eq!(state.frame_base, 0);
    }

    #[test]
    fn nested_calls_unwind() {
        let state = run_asm(
            "mov a, 1\ncal outer\nstp\n\
             outer: mov a, 2\ncal inner\nret\n\
             inner: mov a, 3\npsh 55\nret",
        );
        assert_eq!(state.reg[0], 1);
        assert!(state.stack.is_empty());
        assert_eq!(state.frame_base, 0);
    }

    #[test]
    fn definitions_load_into_low_memory() {
        let state = run_asm("def msg \"AB\"\nstp");
        assert_eq!(state.mem[0], u32::from(b'A'));
        assert_eq!(state.mem[1], u32::from(b'B'));
        assert_eq!(state.mem[2], 0);
    }

    #[test]
    fn image_memory_field_sizes_memory() {
        let image = assemble("stp").unwrap();
        let state = RunState::try_from(image).unwrap();
        assert_eq!(state.mem.len(), MEM_CELLS as usize);
    }

    #[test]
    fn unknown_syscall_is_noop() {
        let state = run_asm("mov a, 9\nsyscall\nstp");
        assert!(state.flags.stop);
    }

    #[test]
    fn bad_register_id_faults() {
        let err = run_raw_err(vec![op::PSH_REG, 9, op::STP]);
        assert!(err.to_string().contains("register id 9"));
    }

    #[test]
    fn bad_memory_address_faults() {
        let err = run_asm_err("mov &99999, 1\nstp");
        assert!(err.to_string().contains("memory address"));
    }

    #[test]
    fn unknown_opcode_faults() {
        let err = run_raw_err(vec![0x99]);
        assert!(err.to_string().contains("Unknown opcode"));
    }

    #[test]
    fn code_overrun_faults() {
        let err = run_raw_err(vec![op::PSH_LIT, 0, 0]);
        assert!(err.to_string().contains("past the end"));
    }

    #[test]
    fn stack_underflow_faults() {
        let err = run_asm_err("pop a\nstp");
        assert!(err.to_string().contains("underflow"));
    }

    #[test]
    fn oversized_memory_request_is_rejected() {
        let image = Image {
            mem_cells: u32::MAX,
            data: Vec::new(),
            code: vec![op::STP],
        };
        assert!(RunState::try_from(image).is_err());
    }
}
