use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Diagnostics;
use crate::image::Image;
use crate::loader::{FsLoader, SourceLoader};
use crate::parser::parse;
use crate::preprocess::{Preprocessor, DEFAULT_MAX_DEPTH};
use crate::resolver::SymbolEntry;
use crate::token::Token;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Nesting limit for macro, define and include expansion.
    pub max_macro_depth: usize,
    /// Names defined before the first source line, as by `@define`.
    pub defines: BTreeMap<String, String>,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self { max_macro_depth: DEFAULT_MAX_DEPTH, defines: BTreeMap::new() }
    }
}

/// Output of a successful assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assembly {
    pub image: Image,
    pub symbols: Vec<SymbolEntry>,
}

pub struct Assembler<L: SourceLoader = FsLoader> {
    config: AssemblerConfig,
    loader: L,
}

impl Assembler<FsLoader> {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config, loader: FsLoader }
    }
}

impl<L: SourceLoader> Assembler<L> {
    pub fn with_loader(config: AssemblerConfig, loader: L) -> Self {
        Self { config, loader }
    }

    fn preprocessor(&self) -> Result<Preprocessor<'_>, Diagnostics> {
        let mut pp = Preprocessor::new(&self.loader, self.config.max_macro_depth);
        for (name, value) in &self.config.defines {
            pp.define(name, value)?;
        }
        Ok(pp)
    }

    /// Assemble a root file and everything it includes.
    pub fn assemble_file(&self, path: &Path) -> Result<Assembly, Diagnostics> {
        info!(path = %path.display(), "assembling");
        let tokens = self.preprocessor()?.run_file(path)?;
        Self::finish(&tokens)
    }

    /// Assemble in-memory text; `name` labels diagnostics and anchors includes.
    pub fn assemble_source(&self, name: &str, text: &str) -> Result<Assembly, Diagnostics> {
        let tokens = self.preprocessor()?.run_source(name, text)?;
        Self::finish(&tokens)
    }

    fn finish(tokens: &[Token]) -> Result<Assembly, Diagnostics> {
        debug!(tokens = tokens.len(), "preprocessed");
        let program = parse(tokens)?;
        let resolved = program.assign_addresses()?.resolve()?;
        let image = resolved.image()?;
        debug!(base = image.base, len = image.len(), "image written");
        Ok(Assembly { image, symbols: resolved.symbols })
    }
}

/// Assemble standalone text with the default configuration. `@include`
/// is resolved against the working directory.
pub fn assemble(text: &str) -> Result<Assembly, Diagnostics> {
    Assembler::new(AssemblerConfig::default()).assemble_source("<input>", text)
}
