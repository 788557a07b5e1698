use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

/// Where a token was written. Survives macro substitution and includes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourcePos {
    pub file: Arc<str>,
    pub line: u32,   // 1-based
    pub column: u32, // 1-based
}

impl SourcePos {
    pub fn new(file: Arc<str>, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Syntax,
    UnknownMnemonic,
    IllegalAddressingMode,
    UndefinedSymbol,
    DuplicateLabel,
    MacroExpansion,
    CyclicInclude,
    AddressOverflow,
    LayoutConflict,
    Io,
}

/// Whether an addressing-mode violation was caught from the operand shapes
/// (parser) or from concrete values (encoder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModeStage {
    Shape,
    Value,
}

impl fmt::Display for ModeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeStage::Shape => f.write_str("operand shape"),
            ModeStage::Value => f.write_str("operand value"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AsmError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unknown mnemonic `{0}`")]
    UnknownMnemonic(String),
    #[error("illegal addressing mode ({stage}): {detail}")]
    IllegalAddressingMode { stage: ModeStage, detail: String },
    #[error("undefined symbol `{0}`")]
    UndefinedSymbol(String),
    #[error("duplicate label `{name}` (first defined at {first})")]
    DuplicateLabel { name: String, first: SourcePos },
    #[error("macro expansion error: {0}")]
    MacroExpansion(String),
    #[error("cyclic include of {}", path.display())]
    CyclicInclude { path: PathBuf },
    #[error("address overflow: {0}")]
    AddressOverflow(String),
    #[error("layout conflict: byte ${addr:04X} emitted twice")]
    LayoutConflict { addr: u16 },
    #[error("cannot load {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl AsmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AsmError::Syntax(_) => ErrorKind::Syntax,
            AsmError::UnknownMnemonic(_) => ErrorKind::UnknownMnemonic,
            AsmError::IllegalAddressingMode { .. } => ErrorKind::IllegalAddressingMode,
            AsmError::UndefinedSymbol(_) => ErrorKind::UndefinedSymbol,
            AsmError::DuplicateLabel { .. } => ErrorKind::DuplicateLabel,
            AsmError::MacroExpansion(_) => ErrorKind::MacroExpansion,
            AsmError::CyclicInclude { .. } => ErrorKind::CyclicInclude,
            AsmError::AddressOverflow(_) => ErrorKind::AddressOverflow,
            AsmError::LayoutConflict { .. } => ErrorKind::LayoutConflict,
            AsmError::Io { .. } => ErrorKind::Io,
        }
    }

    pub fn shape(detail: impl Into<String>) -> Self {
        AsmError::IllegalAddressingMode { stage: ModeStage::Shape, detail: detail.into() }
    }

    pub fn value(detail: impl Into<String>) -> Self {
        AsmError::IllegalAddressingMode { stage: ModeStage::Value, detail: detail.into() }
    }

    pub fn at(self, pos: &SourcePos) -> Diagnostic {
        Diagnostic { pos: Some(pos.clone()), error: self }
    }
}

/// One reported problem: position (when known), kind and message.
#[derive(thiserror::Error, Debug)]
pub struct Diagnostic {
    pub pos: Option<SourcePos>,
    pub error: AsmError,
}

impl Diagnostic {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pos {
            Some(pos) => write!(f, "{pos}: {}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl From<AsmError> for Diagnostic {
    fn from(error: AsmError) -> Self {
        Diagnostic { pos: None, error }
    }
}

/// A failed assembly. Never empty.
#[derive(thiserror::Error, Debug)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.0.iter().map(Diagnostic::kind).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(d: Diagnostic) -> Self {
        Diagnostics(vec![d])
    }
}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(v: Vec<Diagnostic>) -> Self {
        Diagnostics(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> SourcePos {
        SourcePos::new("main.asm".into(), 3, 9)
    }

    #[test]
    fn diagnostic_display_prefixes_position() {
        let d = AsmError::UndefinedSymbol("loop".into()).at(&pos());
        assert_eq!(d.to_string(), "main.asm:3:9: undefined symbol `loop`");
        assert_eq!(d.kind(), ErrorKind::UndefinedSymbol);
    }

    #[test]
    fn addressing_mode_stages_share_kind() {
        let a = AsmError::shape("immediate as destination");
        let b = AsmError::value("immediate $1FF does not fit 8 bits");
        assert_eq!(a.kind(), b.kind());
        assert!(a.to_string().contains("operand shape"));
        assert!(b.to_string().contains("operand value"));
    }

    #[test]
    fn diagnostics_join_lines() {
        let ds = Diagnostics(vec![
            AsmError::Syntax("one".into()).at(&pos()),
            AsmError::Syntax("two".into()).into(),
        ]);
        assert_eq!(ds.to_string(), "main.asm:3:9: syntax error: one\nsyntax error: two");
        assert_eq!(ds.kinds(), vec![ErrorKind::Syntax, ErrorKind::Syntax]);
    }
}
