use miette::Result;

use crate::{
    error,
    lexer::{Token, TokenKind},
    symbol::{self, fx_map, FxMap},
};

/// Symbol tables built while resolving one compilation. Write-once here,
/// read-only during code generation.
pub struct SymbolTables {
    /// Label name (colons stripped) -> offset within the code segment
    pub labels: FxMap<String, u32>,
    /// Definition name -> (header offset, string content), declaration order
    pub defs: FxMap<String, (u32, String)>,
}

/// Rewrite the token sequence so that only `Opcode`, `Literal`, `Register`,
/// `Address` and `Comma` tokens remain, with every symbolic reference
/// replaced by its resolved offset.
///
/// Three ordered passes: extract labels, extract definitions, rewrite
/// references. Each pass builds a fresh sequence rather than removing tokens
/// in place, so no removal can shift the indices a later iteration relies on.
pub fn resolve(toks: Vec<Token>, src: &str) -> Result<(Vec<Token>, SymbolTables)> {
    let mut tables = SymbolTables {
        labels: fx_map(),
        defs: fx_map(),
    };
    let toks = extract_labels(toks, &mut tables, src)?;
    let toks = extract_defs(toks, &mut tables, src)?;
    let toks = rewrite_refs(toks, &tables, src)?;
    Ok((toks, tables))
}

fn extract_labels(
    toks: Vec<Token>,
    tables: &mut SymbolTables,
    src: &str,
) -> Result<Vec<Token>> {
    let mut kept = Vec::with_capacity(toks.len());
    for tok in toks {
        if tok.kind == TokenKind::Label {
            let name = tok.val.trim_matches(':').to_string();
            if tables.labels.insert(name, tok.byte_index).is_some() {
                return Err(error::resolve_duplicate_label(&tok, src));
            }
        } else {
            kept.push(tok);
        }
    }
    Ok(kept)
}

fn extract_defs(toks: Vec<Token>, tables: &mut SymbolTables, src: &str) -> Result<Vec<Token>> {
    let mut kept = Vec::with_capacity(toks.len());
    let mut offs: u32 = 0;
    let mut i = 0;
    while i < toks.len() {
        let tok = &toks[i];
        if tok.kind == TokenKind::Opcode && tok.val == "def" {
            let name = toks.get(i + 1).ok_or_else(|| error::resolve_def_eof(tok, src))?;
            if name.kind != TokenKind::Opcode {
                return Err(error::resolve_def_expected("opcode", name, src));
            }
            let content = toks.get(i + 2).ok_or_else(|| error::resolve_def_eof(tok, src))?;
            if content.kind != TokenKind::Str {
                return Err(error::resolve_def_expected("string", content, src));
            }
            if tables
                .defs
                .insert(name.val.clone(), (offs, content.val.clone()))
                .is_some()
            {
                return Err(error::resolve_duplicate_def(name, src));
            }
            offs += content.val.len() as u32;
            i += 3;
        } else {
            kept.push(tok.clone());
            i += 1;
        }
    }
    Ok(kept)
}

fn rewrite_refs(toks: Vec<Token>, tables: &SymbolTables, src: &str) -> Result<Vec<Token>> {
    let mut out = Vec::with_capacity(toks.len());
    for mut tok in toks {
        if tok.kind == TokenKind::Opcode {
            let target = tables
                .labels
                .get(&tok.val)
                .copied()
                .or_else(|| tables.defs.get(&tok.val).map(|(offs, _)| *offs));
            if let Some(offs) = target {
                // Reserved words win syntactically, leaving the reference
                // meaningless; reject the collision outright.
                if symbol::is_reserved(&tok.val) {
                    return Err(error::resolve_reserved_symbol(&tok, src));
                }
                tok.kind = TokenKind::Literal;
                tok.val = offs.to_string();
            }
        }
        out.push(tok);
    }
    Ok(out)
}
