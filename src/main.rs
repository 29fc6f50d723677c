use clap::{Parser, Subcommand};
use imgpress::library::Library;
use imgpress::metadata::RecordId;
use imgpress::webp::WebpPolicy;
use imgpress::{config, output};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn version_string() -> &'static str {
    let on_tag = env!("IMGPRESS_ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let describe = env!("IMGPRESS_DESCRIBE");
        if describe.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{describe}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "imgpress")]
#[command(about = "Upload post-processing for JPEG/PNG media libraries")]
#[command(long_about = "\
Upload post-processing for JPEG/PNG media libraries

Every upload and regenerate works out why the attached file looks the way
it does, applies the matching transform, produces the configured sizes and
keeps a WebP clone next to each file.

Library layout:

  media/
  ├── press.toml               # Config (optional)
  ├── .imgpress-store.json     # Record store
  ├── photo.jpg                # Uploaded original
  ├── photo-scaled.jpg         # Smaller recompressed copy, attached
  ├── photo-scaled.jpg.webp    # WebP clone (name + .webp)
  ├── photo-150x150.jpg        # Size variant
  └── photo-150x150.jpg.webp

Image states:
  edited     saved by an editor (-e + 13 digits); never recompressed
  scaled     -scaled copy of a big original; clone only
  rotated    -rotated copy; recompressed in place once
  lossless   PNG original; clone only, sizes are optimized
  lossy      JPEG original; recompressed, kept only when smaller

Images above 2500px on either edge are never recompressed in place.

Set RUST_LOG=imgpress=debug for per-step logs.
Run 'imgpress gen-config' to generate a documented press.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Media library root
    #[arg(long, default_value = "media", global = true)]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy an image into the library and process it
    Upload {
        /// JPEG or PNG file
        file: PathBuf,
    },
    /// Re-run processing for a record
    Regenerate { id: RecordId },
    /// Delete a record and every file produced for it
    Delete { id: RecordId },
    /// Show one record, or all records
    Show { id: Option<RecordId> },
    /// Apply a WebP clone policy to a single file
    Clone {
        file: PathBuf,
        /// 0 = delete, 1 = always, 2 = if missing, 3 = never
        #[arg(long, value_parser = parse_policy)]
        policy: Option<WebpPolicy>,
    },
    /// Print a stock press.toml with all options documented
    GenConfig,
}

fn parse_policy(value: &str) -> Result<WebpPolicy, String> {
    let raw: u8 = value.parse().map_err(|e| format!("{e}"))?;
    WebpPolicy::try_from(raw)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Command::Upload { file } => {
            let library = Library::open(&cli.root)?;
            let update = library.upload(&file)?;
            output::print_update(&update, library.root());
        }
        Command::Regenerate { id } => {
            let library = Library::open(&cli.root)?;
            let update = library.regenerate(id)?;
            output::print_update(&update, library.root());
        }
        Command::Delete { id } => {
            let library = Library::open(&cli.root)?;
            let report = library.delete(id)?;
            output::print_purge(id, &report, library.root());
        }
        Command::Show { id } => {
            let library = Library::open(&cli.root)?;
            let views = match id {
                Some(id) => vec![library.show(id)?],
                None => library.records()?,
            };
            output::print_records(&views);
        }
        Command::Clone { file, policy } => {
            let library = Library::open(&cli.root)?;
            let clone = library.clone_file(&file, policy)?;
            println!("{}", output::format_clone(&file, clone.as_deref()));
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Logs go to stderr so command output on stdout stays clean.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("imgpress=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
