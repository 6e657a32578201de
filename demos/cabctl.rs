//! Command-line driver for [`cecab::Editor`]: list, extract, add, remove,
//! and rebuild a CE cabinet's contents.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cecab::Editor;

#[derive(Parser)]
#[command(name = "cabctl", about = "Inspect and edit Windows CE cabinet archives")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the archive's records (display name, source name, size, directory).
    Ls {
        cab: PathBuf,
    },
    /// Write one entry's raw bytes to stdout.
    Cat {
        cab: PathBuf,
        source_name: String,
    },
    /// Add a file from disk under an optional display name and directory.
    Add {
        cab: PathBuf,
        file: PathBuf,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long, default_value = "")]
        directory: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Remove an entry by source name, writing the result to a new path.
    Remove {
        cab: PathBuf,
        source_name: String,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Ls { cab } => ls(&cab),
        Command::Cat { cab, source_name } => cat(&cab, &source_name),
        Command::Add { cab, file, display_name, directory, output } => {
            add(&cab, &file, display_name.as_deref(), &directory, &output)
        }
        Command::Remove { cab, source_name, output } => remove(&cab, &source_name, &output),
    }
}

fn load(path: &PathBuf) -> Result<Editor> {
    let mut editor = Editor::new();
    editor.load_path(path).with_context(|| format!("loading {}", path.display()))?;
    Ok(editor)
}

fn ls(cab: &PathBuf) -> Result<()> {
    let editor = load(cab)?;
    for record in editor.records()? {
        println!(
            "{:>10}  {:<20}  {:<16}  {}",
            record.size,
            record.formatted_modified(),
            record.source_name,
            record.display_name,
        );
    }
    Ok(())
}

fn cat(cab: &PathBuf, source_name: &str) -> Result<()> {
    use std::io::Write;
    let editor = load(cab)?;
    let bytes = editor
        .get_file_bytes(source_name)
        .with_context(|| format!("no entry named {source_name:?}"))?;
    std::io::stdout().write_all(bytes)?;
    Ok(())
}

fn add(
    cab: &PathBuf,
    file: &PathBuf,
    display_name: Option<&str>,
    directory: &str,
    output: &PathBuf,
) -> Result<()> {
    let mut editor = load(cab)?;
    let bytes = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let upload_name = file.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let source_name = editor.add_file(bytes, display_name.unwrap_or(""), upload_name, directory)?;
    println!("added as {source_name}");
    let rebuilt = editor.build_cab_bytes(true)?;
    fs::write(output, rebuilt).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}

fn remove(cab: &PathBuf, source_name: &str, output: &PathBuf) -> Result<()> {
    let mut editor = load(cab)?;
    let removed = editor.remove_file(source_name)?;
    if !removed {
        eprintln!("warning: {source_name:?} was not present");
    }
    let rebuilt = editor.build_cab_bytes(true)?;
    fs::write(output, rebuilt).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}
