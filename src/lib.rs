pub mod assembler;
pub mod ast;
pub mod encoder;
pub mod error;
pub mod image;
pub mod instructions;
pub mod loader;
pub mod parser;
pub mod preprocess;
pub mod resolver;
pub mod token;

pub mod isa {
    pub mod sis16; // SIS16 register file and addressing-mode tables
}

pub use assembler::{assemble, Assembler, AssemblerConfig, Assembly};
pub use error::{AsmError, Diagnostic, Diagnostics, ErrorKind, SourcePos};
pub use image::Image;
pub use loader::{FsLoader, MemoryLoader, SourceLoader};
pub use resolver::SymbolEntry;
