//! `capsule run` — execute a script file or a compiled cache blob.

use anyhow::Context;
use capsule_engine::{CompileOptions, ScriptHost};
use std::path::Path;

pub struct RunArgs {
    pub file: String,
    pub args: Vec<String>,
    pub cached_data: Option<String>,
    pub eager: bool,
}

pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let path = Path::new(&args.file);
    if !path.exists() {
        anyhow::bail!("File not found: {}", args.file);
    }

    let mut process_args = vec![args.file.clone()];
    process_args.extend(args.args.iter().cloned());
    let mut host = ScriptHost::with_args(process_args);
    if args.eager {
        host.config.lazy_compilation = false;
    }

    let mut outcome = if args.file.ends_with(".capc") {
        // Compiled blob: sourceless consume, rejection is fatal.
        let blob = std::fs::read(path)
            .with_context(|| format!("Failed to read compiled blob: {}", args.file))?;
        host.compile(
            "",
            CompileOptions {
                filename: Some(args.file.clone()),
                sourceless: true,
                cached_data: Some(blob),
                ..Default::default()
            },
        )?
    } else {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script: {}", args.file))?;
        let cached_data = match &args.cached_data {
            Some(blob_path) => Some(
                std::fs::read(blob_path)
                    .with_context(|| format!("Failed to read cached data: {}", blob_path))?,
            ),
            None => None,
        };
        host.compile(
            &source,
            CompileOptions {
                filename: Some(args.file.clone()),
                cached_data,
                ..Default::default()
            },
        )?
    };

    if outcome.cached_data_rejected {
        eprintln!("warning: cached data rejected, recompiled from source");
    }

    let mut stdout = std::io::stdout();
    host.execute(&mut outcome.unit, &mut stdout)?;
    Ok(())
}
