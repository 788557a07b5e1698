use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sis16_asm::{Assembler, AssemblerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Assemble SIS16 source into a flat binary image")]
struct Opts {
    /// Output path; defaults to the input with `.asm` replaced by `.bin`
    #[arg(short, long, value_name = "OUT")]
    output: Option<PathBuf>,
    /// Also write the symbol table to `OUT.symbols.json`
    #[arg(short, long)]
    debug: bool,
    /// Predefine NAME (value defaults to 1)
    #[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]")]
    defines: Vec<String>,
    #[arg(long, default_value_t = 64)]
    max_macro_depth: usize,
    #[arg(value_name = "FILE.asm")]
    input: PathBuf,
}

fn output_path(input: &Path, output: Option<PathBuf>) -> Result<PathBuf> {
    if input.extension().and_then(|e| e.to_str()) != Some("asm") {
        bail!("input file '{}' must end with '.asm'", input.display());
    }
    let out = output.unwrap_or_else(|| input.with_extension("bin"));
    if out == input {
        bail!("output path '{}' would overwrite the input", out.display());
    }
    Ok(out)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let out = output_path(&opts.input, opts.output)?;

    let mut config =
        AssemblerConfig { max_macro_depth: opts.max_macro_depth, ..Default::default() };
    for d in &opts.defines {
        let (name, value) = d.split_once('=').unwrap_or((d.as_str(), "1"));
        config.defines.insert(name.to_string(), value.to_string());
    }

    let assembly = match Assembler::new(config).assemble_file(&opts.input) {
        Ok(a) => a,
        Err(diags) => {
            for d in diags.iter() {
                eprintln!("{d}");
            }
            eprintln!("{} error(s); no output written", diags.len());
            std::process::exit(1);
        }
    };

    std::fs::write(&out, assembly.image.to_bytes())
        .with_context(|| format!("writing {}", out.display()))?;
    tracing::info!(
        path = %out.display(),
        base = assembly.image.base,
        bytes = assembly.image.len(),
        "wrote image"
    );

    if opts.debug {
        let mut sym_path = out.clone().into_os_string();
        sym_path.push(".symbols.json");
        let json = serde_json::to_string_pretty(&assembly.symbols)?;
        std::fs::write(&sym_path, json)
            .with_context(|| format!("writing {}", Path::new(&sym_path).display()))?;
    }

    Ok(())
}
