// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! chunkrt CLI - inspect chunk manifests and binary payloads

use anyhow::Context;
use chunkrt_loader::{BinaryLinker, ByteSource, ChunkId, FsSource, RuntimeConfig, VERSION};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "chunkrt",
    about = "Chunk loading runtime for bundled applications",
    version = VERSION,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Compile every binary payload in the manifest and verify its imports
    Check {
        /// Runtime configuration file (TOML or JSON)
        #[arg(short, long, default_value = "chunkrt.toml")]
        config: PathBuf,

        /// Directory payload locators are resolved against
        /// (defaults to the configuration file's directory)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Print the locators a chunk load would request
    Locate {
        /// Runtime configuration file (TOML or JSON)
        #[arg(short, long, default_value = "chunkrt.toml")]
        config: PathBuf,

        /// Chunk id
        chunk: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("chunkrt=debug,chunkrt_loader=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("chunkrt=warn,chunkrt_loader=warn")
            .init();
    }

    match cli.command {
        Command::Check { config, root } => {
            let root = root.unwrap_or_else(|| {
                config
                    .parent()
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."))
            });
            let failures = check(&config, root).await?;
            if failures > 0 {
                eprintln!("{}: {} binary module(s) failed", "Error".red().bold(), failures);
                std::process::exit(1);
            }
        }
        Command::Locate { config, chunk } => locate(&config, ChunkId::new(chunk))?,
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    RuntimeConfig::load(Some(path)).with_context(|| format!("failed to load {}", path.display()))
}

async fn check(config_path: &Path, root: PathBuf) -> anyhow::Result<usize> {
    let config = load_config(config_path)?;
    debug!("Checking binary payloads under {}", root.display());
    let source = FsSource::new(root);
    let linker = BinaryLinker::new();
    let mut failures = 0;

    if config.manifest.binaries.is_empty() {
        println!("{}", "No binary modules in manifest".dimmed());
        return Ok(0);
    }

    for (id, entry) in &config.manifest.binaries {
        let locator = config.binary_locator(&entry.fingerprint);
        let outcome = match source.fetch(&locator).await {
            Ok(body) => match body.into_bytes().await {
                Ok(bytes) => linker
                    .inspect(id, &bytes, &entry.import_table())
                    .map_err(|e| e.to_string()),
                Err(failure) => Err(failure.to_string()),
            },
            Err(failure) => Err(failure.to_string()),
        };

        match outcome {
            Ok(compiled) => println!(
                "{} {} {} ({} imports, {} exports)",
                "ok".green().bold(),
                id.cyan(),
                locator.dimmed(),
                compiled.imports().len(),
                compiled.exports().len()
            ),
            Err(reason) => {
                failures += 1;
                println!("{} {} {}: {}", "FAIL".red().bold(), id.cyan(), locator.dimmed(), reason);
            }
        }
    }

    Ok(failures)
}

fn locate(config_path: &Path, chunk: ChunkId) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    if config.manifest.installed.contains(&chunk) {
        println!("{}", format!("chunk {} is installed at startup", chunk).dimmed());
        return Ok(());
    }

    let entry = config.manifest.chunk(&chunk);
    if entry.script {
        println!("{}", config.script_locator(&chunk));
    }
    for binary in &entry.binaries {
        let fingerprint = &config.manifest.binary(binary)?.fingerprint;
        println!("{}", config.binary_locator(fingerprint));
    }

    Ok(())
}
