use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bundlereg::bundle::Bundle;
use bundlereg::config::AppConfig;
use bundlereg::events::{FixupEvent, FixupEventKind};
use bundlereg::fixup::{FixupOptions, fixup_bundle};
use bundlereg::registry::HttpRegistry;
use bundlereg::{canonical, distribution};
use ociclient::ImageReference;

/// Command line arguments for the bundle distribution tool
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fix up a bundle against the target repository and push it
    Push {
        /// Reference to push the bundle artifact at
        target_ref: String,

        /// Path to the bundle JSON document
        bundle: PathBuf,

        /// Overwrite digests declared in the bundle with the resolved ones
        #[clap(long)]
        auto_update_digests: bool,
    },
    /// Pull a bundle artifact and write out its two documents
    Pull {
        /// Reference of the bundle artifact to pull
        target_ref: String,

        /// Where to write the bundle document, `-` for standard output
        #[clap(short, long, default_value = "bundle.json")]
        output: String,

        /// Where to write the relocation map, `-` for standard output
        #[clap(short, long, default_value = "relocation-map.json")]
        relocation_map: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let registry = HttpRegistry::new(config.auth_token(), config.registry.insecure.clone());

    // Cancel the whole operation on Ctrl+C
    let cancellation = CancellationToken::new();
    let signal_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    match args.command {
        Command::Push {
            target_ref,
            bundle,
            auto_update_digests,
        } => {
            let target = ImageReference::parse(&target_ref, &config.normalization_rules())?;
            let data = tokio::fs::read(&bundle).await?;
            let bundle = Bundle::from_json(&data)?;

            let options = FixupOptions {
                rules: config.normalization_rules(),
                event_handler: Some(Arc::new(display_event)),
                cancellation: cancellation.clone(),
                auto_update_digests,
            };
            let (fixed, map) = fixup_bundle(&bundle, &target, &registry, &options).await?;
            let digest =
                distribution::push_bundle(&fixed, &map, &target, &registry, &cancellation).await?;

            info!("pushed bundle with digest {digest}");
            println!("{digest}");
        }
        Command::Pull {
            target_ref,
            output,
            relocation_map,
        } => {
            let source = ImageReference::parse(&target_ref, &config.normalization_rules())?;
            let (bundle, map) =
                distribution::pull_bundle(&source, &registry, &cancellation).await?;

            write_output(&output, &bundle.to_canonical_json()?)?;
            write_output(&relocation_map, &canonical::to_canonical_vec(&map)?)?;
        }
    }

    Ok(())
}

/// Write a document to a file, or to standard output when the path is `-`.
fn write_output(path: &str, data: &[u8]) -> anyhow::Result<()> {
    if path == "-" {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(data)?;
        stdout.write_all(b"\n")?;
    } else {
        std::fs::write(path, data)?;
    }
    Ok(())
}

fn display_event(event: &FixupEvent) {
    match event.kind {
        FixupEventKind::CopyImageStart => {
            eprintln!("Starting to copy image {}...", event.source_image);
        }
        FixupEventKind::CopyImageEnd => match &event.error {
            Some(error) => eprintln!("Failed to copy image {}: {}", event.source_image, error),
            None => eprintln!("Completed image {} copy", event.source_image),
        },
    }
}
