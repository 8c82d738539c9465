//! `capsule build` — compile a script to a source-stripped cache blob.

use crate::output::StyledOutput;
use anyhow::{anyhow, Context};
use capsule_engine::{CompileOptions, ScriptHost};
use std::path::Path;

pub struct BuildArgs {
    pub file: String,
    pub output: Option<String>,
}

pub fn execute(args: BuildArgs, out: &mut StyledOutput) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read script: {}", args.file))?;

    let mut host = ScriptHost::new();
    let outcome = host.compile(
        &source,
        CompileOptions {
            filename: Some(args.file.clone()),
            sourceless: true,
            produce_cached_data: true,
            ..Default::default()
        },
    )?;
    let blob = outcome
        .cached_data
        .ok_or_else(|| anyhow!("Compiler produced no cached data for {}", args.file))?;

    let out_path = match args.output {
        Some(path) => path,
        None => default_output_path(&args.file),
    };
    std::fs::write(&out_path, &blob)
        .with_context(|| format!("Failed to write blob: {}", out_path))?;

    out.success("Compiled ");
    out.bold(&args.file);
    out.plain(&format!(
        " to {} ({} bytes, source stripped)",
        out_path,
        blob.len()
    ));
    out.newline();
    out.flush();
    Ok(())
}

fn default_output_path(input: &str) -> String {
    let path = Path::new(input);
    path.with_extension("capc").to_string_lossy().into_owned()
}
