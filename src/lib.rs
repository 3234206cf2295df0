// Assembling
mod lexer;
mod resolver;
mod codegen;

// Binary contract
mod mc;
pub use mc::Image;

// Running
mod runtime;
pub use runtime::RunState;

mod error;
mod symbol;

use miette::Result;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 3;

/// Assemble source text into a binary image: lex, resolve symbols, generate.
pub fn assemble(src: &str) -> Result<Image> {
    let toks = lexer::Lexer::new(src).tokenize()?;
    let (toks, tables) = resolver::resolve(toks, src)?;
    codegen::generate(&toks, &tables, src)
}
