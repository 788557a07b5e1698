use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use tracing::trace;

use crate::error::{AsmError, Diagnostic, Diagnostics, SourcePos};
use crate::loader::SourceLoader;
use crate::token::{parse_number, tokenize, Token, TokenKind};

pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Debug, Clone)]
struct MacroDef {
    name: String,
    params: Vec<String>,
    body: Vec<Token>,
}

#[derive(Debug, Clone)]
struct Define {
    tokens: Vec<Token>,
}

type Env = HashMap<String, Vec<Token>>;

#[derive(Debug)]
enum Origin {
    File(PathBuf),
    Macro(String),
    Define(String),
}

/// One level of the expansion stack.
#[derive(Debug)]
struct Frame {
    origin: Origin,
    depth: usize,
    tokens: VecDeque<Token>,
    /// Macro parameter bindings; `None` outside any macro body.
    env: Option<Rc<Env>>,
}

#[derive(Debug, Clone, Copy)]
struct Cond {
    parent_active: bool,
    taken: bool,
    in_else: bool,
}

impl Cond {
    fn active(&self) -> bool {
        self.parent_active && (self.taken != self.in_else)
    }
}

fn fail<T>(err: AsmError, pos: &SourcePos) -> Result<T, Diagnostics> {
    Err(err.at(pos).into())
}

fn io_error(path: &Path, source: anyhow::Error) -> AsmError {
    AsmError::Io { path: path.to_path_buf(), source }
}

/// Expands `@include`, `@define`, `@macro`, `@org` and conditionals into a
/// single token stream.
pub struct Preprocessor<'l> {
    loader: &'l dyn SourceLoader,
    max_depth: usize,
    defines: HashMap<String, Define>,
    macros: HashMap<String, Rc<MacroDef>>,
    frames: Vec<Frame>,
    conds: Vec<(Cond, SourcePos)>,
}

impl<'l> Preprocessor<'l> {
    pub fn new(loader: &'l dyn SourceLoader, max_depth: usize) -> Self {
        Self {
            loader,
            max_depth,
            defines: HashMap::new(),
            macros: HashMap::new(),
            frames: Vec::new(),
            conds: Vec::new(),
        }
    }

    /// Predefine `name` as if `@define name value` preceded the source.
    pub fn define(&mut self, name: &str, value: &str) -> Result<(), Diagnostics> {
        let file: Arc<str> = Arc::from("<command line>");
        let pos = SourcePos::new(file.clone(), 1, 1);
        let mut tokens = tokenize(&file, value).map_err(Diagnostics::from)?;
        tokens.retain(|t| !t.is_newline());
        self.add_define(name, tokens, &pos)
    }

    /// Preprocess a root file read through the loader.
    pub fn run_file(mut self, path: &Path) -> Result<Vec<Token>, Diagnostics> {
        let canon = self
            .loader
            .canonicalize(path)
            .map_err(|source| Diagnostics::from(Diagnostic::from(io_error(path, source))))?;
        let text = self
            .loader
            .load(&canon)
            .map_err(|source| Diagnostics::from(Diagnostic::from(io_error(&canon, source))))?;
        self.push_file(canon, &text)?;
        self.run()
    }

    /// Preprocess in-memory text. Includes resolve relative to `name`.
    pub fn run_source(mut self, name: &str, text: &str) -> Result<Vec<Token>, Diagnostics> {
        self.push_file(PathBuf::from(name), text)?;
        self.run()
    }

    fn push_file(&mut self, path: PathBuf, text: &str) -> Result<(), Diagnostics> {
        let file: Arc<str> = Arc::from(path.display().to_string());
        let tokens = tokenize(&file, text).map_err(Diagnostics::from)?;
        trace!(path = %path.display(), tokens = tokens.len(), "tokenized");
        let depth = self.frames.last().map_or(0, |f| f.depth + 1);
        let frame = Frame { origin: Origin::File(path), depth, tokens: tokens.into(), env: None };
        self.frames.push(frame);
        Ok(())
    }

    fn push_expansion(
        &mut self,
        origin: Origin,
        tokens: Vec<Token>,
        env: Option<Rc<Env>>,
        depth: usize,
        pos: &SourcePos,
    ) -> Result<(), Diagnostics> {
        if depth > self.max_depth {
            let name = match &origin {
                Origin::Macro(n) | Origin::Define(n) => n.clone(),
                Origin::File(p) => p.display().to_string(),
            };
            let msg = format!(
                "expansion depth limit of {} exceeded while expanding `{name}`",
                self.max_depth
            );
            return fail(AsmError::MacroExpansion(msg), pos);
        }
        self.frames.push(Frame { origin, depth, tokens: tokens.into(), env });
        Ok(())
    }

    fn active(&self) -> bool {
        self.conds.last().map_or(true, |(c, _)| c.active())
    }

    /// Next token from the innermost live frame. With `subst`, macro
    /// parameters are replaced by their arguments.
    fn next(&mut self, subst: bool) -> Result<Option<Token>, Diagnostics> {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Ok(None);
            };
            let Some(tok) = frame.tokens.pop_front() else {
                if let Some(Frame { origin: Origin::File(path), .. }) = self.frames.pop() {
                    trace!(path = %path.display(), "end of file");
                }
                continue;
            };
            if let (true, TokenKind::Param(name)) = (subst, &tok.kind) {
                let Some(env) = &frame.env else {
                    let msg = format!("`&{name}` used outside a macro body");
                    return fail(AsmError::MacroExpansion(msg), &tok.pos);
                };
                let Some(arg) = env.get(name) else {
                    let msg = format!("unknown macro parameter `&{name}`");
                    return fail(AsmError::MacroExpansion(msg), &tok.pos);
                };
                for t in arg.clone().into_iter().rev() {
                    frame.tokens.push_front(t);
                }
                continue;
            }
            return Ok(Some(tok));
        }
    }

    fn push_back(&mut self, tok: Token) {
        if let Some(frame) = self.frames.last_mut() {
            frame.tokens.push_front(tok);
        }
    }

    /// Remaining tokens of the current line; the newline is consumed.
    fn rest_of_line(&mut self, subst: bool) -> Result<Vec<Token>, Diagnostics> {
        let mut line = Vec::new();
        while let Some(t) = self.next(subst)? {
            if t.is_newline() {
                break;
            }
            line.push(t);
        }
        Ok(line)
    }

    fn run(mut self) -> Result<Vec<Token>, Diagnostics> {
        let mut out = Vec::new();
        let mut line_start = true;
        let mut mnemonic_pos = true;

        loop {
            let active = self.active();
            let Some(tok) = self.next(active)? else { break };

            if !active {
                // Only conditionals are looked at while skipping.
                match &tok.kind {
                    TokenKind::Newline => {}
                    TokenKind::PreDirective(d) if is_conditional(d) => {
                        self.directive(tok, &mut out)?
                    }
                    _ => {
                        self.rest_of_line(false)?;
                    }
                }
                continue;
            }

            match &tok.kind {
                TokenKind::Newline => {
                    if !out.last().map_or(true, Token::is_newline) {
                        out.push(tok);
                    }
                    line_start = true;
                    mnemonic_pos = true;
                }
                TokenKind::PreDirective(_) if line_start => {
                    self.directive(tok, &mut out)?;
                    line_start = true;
                    mnemonic_pos = true;
                }
                TokenKind::PreDirective(name) => {
                    return fail(AsmError::Syntax(format!("`@{name}` must start a line")), &tok.pos);
                }
                TokenKind::Ident(name) if self.defines.contains_key(name) => {
                    let tokens = self.defines[name].tokens.clone();
                    // The frame that produced `tok` is still on top.
                    let (env, depth) =
                        self.frames.last().map_or((None, 1), |f| (f.env.clone(), f.depth + 1));
                    trace!(define = %name, depth, "expanding define");
                    let origin = Origin::Define(name.clone());
                    self.push_expansion(origin, tokens, env, depth, &tok.pos)?;
                }
                TokenKind::Ident(name) if mnemonic_pos && self.macros.contains_key(name) => {
                    // An invocation that opens the line leaves the body
                    // there too, so a leading directive is still legal.
                    self.invoke(tok)?;
                    mnemonic_pos = true;
                }
                TokenKind::Label(_) => {
                    out.push(tok);
                    line_start = false;
                }
                _ => {
                    out.push(tok);
                    line_start = false;
                    mnemonic_pos = false;
                }
            }
        }

        if let Some((_, pos)) = self.conds.last() {
            return fail(AsmError::MacroExpansion("unterminated conditional block".into()), pos);
        }
        if let Some(pos) = out.last().filter(|t| !t.is_newline()).map(|t| t.pos.clone()) {
            out.push(Token { kind: TokenKind::Newline, text: String::new(), pos, spaced: true });
        }
        Ok(out)
    }

    fn directive(&mut self, tok: Token, out: &mut Vec<Token>) -> Result<(), Diagnostics> {
        let TokenKind::PreDirective(name) = &tok.kind else {
            return Ok(());
        };
        match name.as_str() {
            "include" => self.include(&tok),
            "define" => {
                let mut line = self.rest_of_line(true)?.into_iter();
                let Some(name) = line.next() else {
                    return fail(AsmError::Syntax("`@define` needs a name".into()), &tok.pos);
                };
                let Some(ident) = name.ident() else {
                    let msg = format!("expected a name after `@define`, found {name}");
                    return fail(AsmError::Syntax(msg), &name.pos);
                };
                let ident = ident.to_string();
                self.add_define(&ident, line.collect(), &name.pos)
            }
            "macro" => self.define_macro(&tok),
            "org" => {
                let line = self.rest_of_line(true)?;
                let line = self.expand_defines(line, &tok.pos)?;
                let address = match line.as_slice() {
                    [Token { kind: TokenKind::Number { digits, radix }, pos, .. }] => {
                        match parse_number(digits, *radix, 0xFFFF) {
                            Some(v) => v as u16,
                            None => {
                                let msg = format!("origin `{}` exceeds $FFFF", line[0].text);
                                return fail(AsmError::AddressOverflow(msg), pos);
                            }
                        }
                    }
                    _ => {
                        let msg = "`@org` takes one numeric address";
                        return fail(AsmError::Syntax(msg.into()), &tok.pos);
                    }
                };
                trace!(address, "origin");
                let pos = tok.pos.clone();
                out.push(Token {
                    kind: TokenKind::Origin(address),
                    text: tok.text.clone(),
                    pos: pos.clone(),
                    spaced: true,
                });
                out.push(Token {
                    kind: TokenKind::Newline,
                    text: String::new(),
                    pos,
                    spaced: true,
                });
                Ok(())
            }
            "ifdef" | "ifndef" => {
                let line = self.rest_of_line(false)?;
                let cond_name = match line.as_slice() {
                    [t] => t.ident().map(str::to_string),
                    _ => None,
                };
                let Some(cond_name) = cond_name else {
                    return fail(AsmError::Syntax(format!("`@{name}` takes one name")), &tok.pos);
                };
                let defined =
                    self.defines.contains_key(&cond_name) || self.macros.contains_key(&cond_name);
                let cond = Cond {
                    parent_active: self.active(),
                    taken: defined == (name == "ifdef"),
                    in_else: false,
                };
                self.conds.push((cond, tok.pos.clone()));
                Ok(())
            }
            "else" => {
                self.rest_of_line(false)?;
                match self.conds.last_mut() {
                    Some((c, _)) if !c.in_else => {
                        c.in_else = true;
                        Ok(())
                    }
                    Some(_) => fail(AsmError::MacroExpansion("duplicate `@else`".into()), &tok.pos),
                    None => {
                        fail(AsmError::MacroExpansion("`@else` without `@ifdef`".into()), &tok.pos)
                    }
                }
            }
            "endif" => {
                self.rest_of_line(false)?;
                match self.conds.pop() {
                    Some(_) => Ok(()),
                    None => {
                        fail(AsmError::MacroExpansion("`@endif` without `@ifdef`".into()), &tok.pos)
                    }
                }
            }
            other => {
                let msg = format!("unknown preprocessor directive `@{other}`");
                fail(AsmError::Syntax(msg), &tok.pos)
            }
        }
    }

    fn add_define(
        &mut self,
        name: &str,
        tokens: Vec<Token>,
        pos: &SourcePos,
    ) -> Result<(), Diagnostics> {
        if self.defines.contains_key(name) || self.macros.contains_key(name) {
            return fail(AsmError::MacroExpansion(format!("`{name}` is already defined")), pos);
        }
        trace!(define = %name, "defined");
        self.defines.insert(name.to_string(), Define { tokens });
        Ok(())
    }

    /// Replace define names in a directive's argument, rescanning each
    /// replacement under the usual depth limit.
    fn expand_defines(
        &self,
        mut line: Vec<Token>,
        pos: &SourcePos,
    ) -> Result<Vec<Token>, Diagnostics> {
        let is_define = |t: &Token| t.ident().is_some_and(|n| self.defines.contains_key(n));
        for _ in 0..=self.max_depth {
            let pending = line.iter().any(is_define);
            if !pending {
                return Ok(line);
            }
            line = line
                .into_iter()
                .flat_map(|t| match t.ident().and_then(|n| self.defines.get(n)) {
                    Some(def) => def.tokens.clone(),
                    None => vec![t],
                })
                .collect();
        }
        let msg = format!("expansion depth limit of {} exceeded", self.max_depth);
        fail(AsmError::MacroExpansion(msg), pos)
    }

    fn include(&mut self, tok: &Token) -> Result<(), Diagnostics> {
        let line = self.rest_of_line(true)?;
        let rel = match line.as_slice() {
            [Token { kind: TokenKind::Str(s), .. }] => PathBuf::from(s),
            _ => return fail(AsmError::Syntax("`@include` takes one quoted path".into()), &tok.pos),
        };

        let including = self.frames.iter().rev().find_map(|f| match &f.origin {
            Origin::File(p) => Some(p.clone()),
            _ => None,
        });
        let joined = match including.as_deref().and_then(Path::parent) {
            Some(dir) => dir.join(&rel),
            None => rel,
        };

        let canon = self
            .loader
            .canonicalize(&joined)
            .map_err(|source| Diagnostics::from(io_error(&joined, source).at(&tok.pos)))?;
        let cyclic =
            self.frames.iter().any(|f| matches!(&f.origin, Origin::File(p) if *p == canon));
        if cyclic {
            return fail(AsmError::CyclicInclude { path: canon }, &tok.pos);
        }
        let depth = self.frames.last().map_or(0, |f| f.depth + 1);
        if depth > self.max_depth {
            let msg = format!("include depth limit of {} exceeded", self.max_depth);
            return fail(AsmError::MacroExpansion(msg), &tok.pos);
        }
        let text = self
            .loader
            .load(&canon)
            .map_err(|source| Diagnostics::from(io_error(&canon, source).at(&tok.pos)))?;
        trace!(path = %canon.display(), "including");
        self.push_file(canon, &text)
    }

    fn define_macro(&mut self, tok: &Token) -> Result<(), Diagnostics> {
        let frames = self.frames.len();
        let unterminated =
            || AsmError::MacroExpansion("unterminated macro body".into()).at(&tok.pos);

        let Some(name_tok) = self.next(false)? else {
            return Err(unterminated().into());
        };
        let Some(name) = name_tok.ident().map(str::to_string) else {
            let msg = format!("expected a macro name, found {name_tok}");
            return fail(AsmError::Syntax(msg), &name_tok.pos);
        };

        let mut params: Vec<String> = Vec::new();
        loop {
            let Some(t) = self.next(false)? else {
                return Err(unterminated().into());
            };
            match t.kind {
                TokenKind::Param(p) if params.contains(&p) => {
                    let msg = format!("duplicate parameter `&{p}` in macro `{name}`");
                    return fail(AsmError::MacroExpansion(msg), &t.pos);
                }
                TokenKind::Param(p) => params.push(p),
                TokenKind::LBrace => break,
                TokenKind::Comma | TokenKind::Newline => {}
                _ => {
                    let msg = format!("expected `&param` or `{{` in macro `{name}`, found {t}");
                    return fail(AsmError::Syntax(msg), &t.pos);
                }
            }
        }

        let mut body = Vec::new();
        let mut depth = 0usize;
        loop {
            let t = self.next(false)?;
            if self.frames.len() < frames {
                return Err(unterminated().into());
            }
            let Some(t) = t else {
                return Err(unterminated().into());
            };
            match t.kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace if depth == 0 => break,
                TokenKind::RBrace => depth -= 1,
                _ => {}
            }
            body.push(t);
        }

        let trailing = self.rest_of_line(false)?;
        if let Some(t) = trailing.first() {
            return fail(AsmError::Syntax(format!("unexpected {t} after macro body")), &t.pos);
        }
        if self.defines.contains_key(&name) || self.macros.contains_key(&name) {
            let msg = format!("`{name}` is already defined");
            return fail(AsmError::MacroExpansion(msg), &name_tok.pos);
        }
        trace!(name = %name, params = params.len(), body = body.len(), "defined macro");
        self.macros.insert(name.clone(), Rc::new(MacroDef { name, params, body }));
        Ok(())
    }

    fn invoke(&mut self, name_tok: Token) -> Result<(), Diagnostics> {
        // Taken before the arguments are read, which may retire the calling frame.
        let depth = self.frames.last().map_or(1, |f| f.depth + 1);
        let mut raw = Vec::new();
        while let Some(t) = self.next(true)? {
            if t.is_newline() {
                self.push_back(t);
                break;
            }
            raw.push(t);
        }
        let args = split_args(raw, &name_tok)?;

        let Some(def) = name_tok.ident().and_then(|n| self.macros.get(n)).cloned() else {
            return Ok(());
        };
        if args.len() != def.params.len() {
            return fail(
                AsmError::MacroExpansion(format!(
                    "macro `{}` expects {} argument(s), got {}",
                    def.name,
                    def.params.len(),
                    args.len()
                )),
                &name_tok.pos,
            );
        }
        let env: Env = def.params.iter().cloned().zip(args).collect();
        trace!(name = %def.name, depth, "expanding macro");
        let origin = Origin::Macro(def.name.clone());
        self.push_expansion(origin, def.body.clone(), Some(Rc::new(env)), depth, &name_tok.pos)
    }
}

fn is_conditional(d: &str) -> bool {
    matches!(d, "ifdef" | "ifndef" | "else" | "endif")
}

/// Split an invocation's tokens into arguments. Commas and whitespace
/// separate arguments; a bracketed group is always one argument.
fn split_args(raw: Vec<Token>, call: &Token) -> Result<Vec<Vec<Token>>, Diagnostics> {
    let mut args: Vec<Vec<Token>> = Vec::new();
    let mut cur: Vec<Token> = Vec::new();
    let mut depth = 0usize;
    let mut after_comma = false;

    for t in raw {
        match t.kind {
            TokenKind::Comma if depth == 0 => {
                if cur.is_empty() {
                    return fail(AsmError::MacroExpansion("empty macro argument".into()), &t.pos);
                }
                args.push(std::mem::take(&mut cur));
                after_comma = true;
                continue;
            }
            TokenKind::LBracket => {
                if depth == 0 && t.spaced && !cur.is_empty() {
                    args.push(std::mem::take(&mut cur));
                }
                depth += 1;
            }
            TokenKind::RBracket => {
                if depth == 0 {
                    let msg = "unbalanced `]` in macro argument";
                    return fail(AsmError::MacroExpansion(msg.into()), &t.pos);
                }
                depth -= 1;
            }
            _ if depth == 0 && t.spaced && !cur.is_empty() => {
                args.push(std::mem::take(&mut cur));
            }
            _ => {}
        }
        after_comma = false;
        cur.push(t);
    }

    if depth != 0 {
        return fail(AsmError::MacroExpansion("unbalanced `[` in macro argument".into()), &call.pos);
    }
    if after_comma {
        return fail(AsmError::MacroExpansion("empty macro argument".into()), &call.pos);
    }
    if !cur.is_empty() {
        args.push(cur);
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::loader::MemoryLoader;
    use pretty_assertions::assert_eq;

    fn expand(src: &str) -> Result<Vec<Token>, Diagnostics> {
        let loader = MemoryLoader::new();
        Preprocessor::new(&loader, DEFAULT_MAX_DEPTH).run_source("main.asm", src)
    }

    fn texts(src: &str) -> Vec<String> {
        expand(src)
            .unwrap()
            .into_iter()
            .map(|t| if t.is_newline() { "\\n".to_string() } else { t.text })
            .collect()
    }

    fn kind_of(src: &str) -> ErrorKind {
        expand(src).unwrap_err().0[0].kind()
    }

    #[test]
    fn define_replaces_identifiers() {
        assert_eq!(
            texts("@define PORT $10\nmov %ax, PORT\n"),
            vec!["mov", "%ax", ",", "$10", "\\n"]
        );
    }

    #[test]
    fn macro_substitutes_arguments() {
        let src = "@macro swap &a &b {\npush &a\nmov &a, &b\npop &b\n}\nswap %ax %bx\n";
        assert_eq!(
            texts(src),
            vec!["push", "%ax", "\\n", "mov", "%ax", ",", "%bx", "\\n", "pop", "%bx", "\\n"]
        );
    }

    #[test]
    fn bracket_group_is_one_argument() {
        let src = "@macro ld &d &s { mov &d, &s }\nld %ax [%bx + 2]\nld %cx, #$10\n";
        assert_eq!(
            texts(src),
            vec![
                "mov", "%ax", ",", "[", "%bx", "+", "2", "]", "\\n", "mov", "%cx", ",", "#", "$10",
                "\\n"
            ]
        );
    }

    #[test]
    fn macro_after_label() {
        let src = "@macro twice &r {\ninc &r\ninc &r\n}\nstart: twice %ax\n";
        assert_eq!(texts(src), vec!["start:", "\\n", "inc", "%ax", "\\n", "inc", "%ax", "\\n"]);
    }

    #[test]
    fn arity_mismatch() {
        assert_eq!(kind_of("@macro m &a &b { nop }\nm %ax\n"), ErrorKind::MacroExpansion);
    }

    #[test]
    fn recursive_macro_hits_depth_limit() {
        let loader = MemoryLoader::new();
        let err = Preprocessor::new(&loader, 8)
            .run_source("main.asm", "@macro loop { loop }\nloop\n")
            .unwrap_err();
        assert_eq!(err.0[0].kind(), ErrorKind::MacroExpansion);
        assert!(err.0[0].message().contains("depth limit of 8"));
    }

    #[test]
    fn recursive_define_hits_depth_limit() {
        assert_eq!(kind_of("@define A B\n@define B A\nmov %ax, A\n"), ErrorKind::MacroExpansion);
    }

    #[test]
    fn redefinition_is_rejected() {
        assert_eq!(kind_of("@define X 1\n@define X 2\n"), ErrorKind::MacroExpansion);
        assert_eq!(kind_of("@define X 1\n@macro X { nop }\n"), ErrorKind::MacroExpansion);
    }

    #[test]
    fn unknown_param_and_unterminated_body() {
        assert_eq!(kind_of("@macro m &a { push &b }\nm %ax\n"), ErrorKind::MacroExpansion);
        assert_eq!(kind_of("@macro m &a { push &a\n"), ErrorKind::MacroExpansion);
        assert_eq!(kind_of("push &a\n"), ErrorKind::MacroExpansion);
    }

    #[test]
    fn org_becomes_origin_token() {
        let toks = expand("@org $0100\n").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Origin(0x100));
        assert_eq!(kind_of("@org $10000\n"), ErrorKind::AddressOverflow);
    }

    #[test]
    fn org_takes_a_defined_address() {
        let toks = expand("@define BASE $0200\n@org BASE\n").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Origin(0x200));
        let toks = expand("@define BASE TOP\n@define TOP $0300\n@org BASE\n").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Origin(0x300));
        assert_eq!(kind_of("@define A B\n@define B A\n@org A\n"), ErrorKind::MacroExpansion);
    }

    #[test]
    fn one_line_macro_body_may_open_with_a_directive() {
        let toks = expand("@macro at &a { @org &a }\nat $0100\nnop\n").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Origin(0x100));
        assert_eq!(toks[2].text, "nop");
        assert_eq!(kind_of("@macro at &a { @org &a }\nhere: at $0100\n"), ErrorKind::Syntax);
    }

    #[test]
    fn conditionals_select_lines() {
        let src = "@define FAST 1\n@ifdef FAST\ninc %ax\n@else\nadd %ax, #1\n@endif\n\
                   @ifndef FAST\nnop\n@endif\n";
        assert_eq!(texts(src), vec!["inc", "%ax", "\\n"]);
        assert_eq!(kind_of("@ifdef X\nnop\n"), ErrorKind::MacroExpansion);
        assert_eq!(kind_of("@endif\n"), ErrorKind::MacroExpansion);
    }

    #[test]
    fn predefine_from_configuration() {
        let loader = MemoryLoader::new();
        let mut pp = Preprocessor::new(&loader, DEFAULT_MAX_DEPTH);
        pp.define("DEBUG", "1").unwrap();
        let toks = pp.run_source("main.asm", "@ifdef DEBUG\nsyscall\n@endif\n").unwrap();
        assert_eq!(toks[0].text, "syscall");
    }

    #[test]
    fn include_splices_relative_to_includer() {
        let loader = MemoryLoader::new()
            .with("src/main.asm", "@include \"lib/io.asm\"\nnop\n")
            .with("src/lib/io.asm", "@define OUT $FF00\n");
        let toks = Preprocessor::new(&loader, DEFAULT_MAX_DEPTH)
            .run_file(Path::new("src/main.asm"))
            .unwrap();
        assert_eq!(toks[0].text, "nop");
        assert_eq!(&*toks[0].pos.file, "src/main.asm");
    }

    #[test]
    fn include_cycle_is_detected() {
        let loader = MemoryLoader::new()
            .with("a.asm", "@include \"b.asm\"\n")
            .with("b.asm", "@include \"a.asm\"\n");
        let err = Preprocessor::new(&loader, DEFAULT_MAX_DEPTH)
            .run_file(Path::new("a.asm"))
            .unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::CyclicInclude]);
    }

    #[test]
    fn missing_include_is_io() {
        assert_eq!(kind_of("@include \"nope.asm\"\n"), ErrorKind::Io);
    }

    #[test]
    fn positions_survive_expansion() {
        let toks = expand("@macro m &r {\n  inc &r\n}\n  m %bx\n").unwrap();
        let inc = toks.iter().find(|t| t.text == "inc").unwrap();
        let reg = toks.iter().find(|t| t.text == "%bx").unwrap();
        assert_eq!((inc.pos.line, inc.pos.column), (2, 3));
        assert_eq!((reg.pos.line, reg.pos.column), (4, 5));
    }
}
