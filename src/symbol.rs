use std::{ops::Range, str::FromStr};

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use miette::SourceSpan;

/// Insertion-ordered map used for the label and definition tables.
pub type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

pub fn fx_map<K, V>() -> FxMap<K, V> {
    IndexMap::with_hasher(FxBuildHasher::default())
}

/// Location within source
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Span {
    offs: SrcOffset,
    len: usize,
}

impl Span {
    pub fn new(offs: SrcOffset, len: usize) -> Self {
        Span { offs, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn offs(&self) -> usize {
        self.offs.0
    }

    pub fn end(&self) -> usize {
        self.offs.0 + self.len
    }
}

impl From<Span> for SourceSpan {
    fn from(value: Span) -> Self {
        SourceSpan::new(value.offs().into(), value.len())
    }
}

impl From<Span> for Range<usize> {
    fn from(value: Span) -> Self {
        value.offs()..value.end()
    }
}

/// Used to refer to offsets from the start of a source file.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct SrcOffset(pub usize);

/// Represents the four general purpose CPU registers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Register {
    A = 0,
    B,
    C,
    D,
}

impl Register {
    /// Register id as encoded into the operand byte.
    pub fn id(self) -> u8 {
        self as u8
    }
}

impl FromStr for Register {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "a" => Ok(Register::A),
            "b" => Ok(Register::B),
            "c" => Ok(Register::C),
            "d" => Ok(Register::D),
            _ => Err(()),
        }
    }
}

/// Every mnemonic the code generator understands, plus the `def` keyword.
/// A label or definition may not shadow any of these.
pub const RESERVED_MNEMONICS: &[&str] = &[
    "stp", "psh", "pop", "dup", "mov", "add", "sub", "mul", "div", "not", "and", "or", "xor",
    "cmp", "je", "jne", "jg", "js", "jo", "frs", "syscall", "jmpa", "jmpr", "cal", "ret", "def",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_MNEMONICS.contains(&name)
}
