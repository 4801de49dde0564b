use clap::{Parser, Subcommand};
use log::info;
use shardpix::attachments::AttachmentStore;
use shardpix::catalog::Catalog;
use shardpix::config::{self, Config};
use shardpix::derivatives::{DerivativeError, DerivativeStore};
use shardpix::dimensions::Dimensions;
use shardpix::exif::KamadakExif;
use shardpix::imaging::RustBackend;
use shardpix::output::{self, DerivativeEntry, ListEntry};
use shardpix::{audit, cache};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "shardpix")]
#[command(about = "Sharded image store with cached, whitelisted derivatives")]
#[command(long_about = "\
Sharded image store with cached, whitelisted derivatives

Originals are ingested once and never change. Resized copies (derivatives)
are rendered on first request, written next to each other in a sharded tree,
and served from disk afterwards.

Storage layout:

  storage/
  ├── attachments/
  │   ├── 0/0/7.jpg              # id 7
  │   └── 1/2/1234.png           # id 1234: first two digits pick the shards
  └── derivatives/
      └── 0/4/42.jpg             # derivative id 42 (its own id space)

Sizes are written as <width><flag><height>, flag 'x' = crop to fill and
'~' = shrink to fit. Either side may be left out; 'full' is the original
size. Only sizes listed under [dimensions] in the config can be produced:

  300x300     crop to exactly 300 by 300
  960~720     fit inside 960 by 720
  20~         20 wide, height follows
  full        original size, orientation corrected

Run 'shardpix gen-config' to generate a documented shardpix.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file
    #[arg(long, default_value = config::CONFIG_FILENAME, global = true)]
    config: PathBuf,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store original images
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// MIME type to record instead of sniffing the content
        #[arg(long)]
        mime: Option<String>,
    },
    /// Fetch (rendering if needed) one derivative
    Get {
        id: i64,
        /// Canned size name (`thumbnail`) or size segment (`300x300.jpg`)
        size: String,
        /// Only show the crop and output size; render nothing
        #[arg(long)]
        plan: bool,
    },
    /// List attachments and their derivatives
    List {
        /// Only this attachment
        id: Option<i64>,
    },
    /// Render every whitelisted size ahead of time
    Warm {
        /// Attachment ids (default: all)
        ids: Vec<i64>,
    },
    /// Compare the storage trees with the catalog
    Audit {
        /// Delete files no record points at
        #[arg(long)]
        remove_orphans: bool,
    },
    /// Show the whitelisted sizes
    Dimensions,
    /// Delete an attachment with all of its derivatives
    Delete { id: i64 },
    /// Print a stock shardpix.toml with all options documented
    GenConfig,
}

struct Stores {
    catalog: Arc<Catalog>,
    attachments: Arc<AttachmentStore>,
    derivatives: DerivativeStore,
}

fn open_stores(config: &Config) -> Result<Stores, Box<dyn Error>> {
    if let Some(parent) = config.database_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let catalog = Arc::new(Catalog::open(&config.database_path)?);
    let attachments = Arc::new(AttachmentStore::new(
        catalog.clone(),
        config,
        Box::new(KamadakExif),
    ));
    let derivatives = DerivativeStore::new(
        catalog.clone(),
        attachments.clone(),
        Box::new(RustBackend::new()),
        config,
    );
    Ok(Stores {
        catalog,
        attachments,
        derivatives,
    })
}

fn print_json(value: &impl serde::Serialize) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    match cli.command {
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
        Command::Dimensions => {
            let config = config::load_config(&cli.config)?;
            if cli.json {
                print_json(&config.dimensions)?;
            } else {
                output::print_dimensions(&config.dimensions);
            }
        }
        command => {
            let config = config::load_config(&cli.config)?;
            let stores = open_stores(&config)?;
            run(command, &config, &stores, cli.json)?;
        }
    }

    Ok(())
}

/// Commands that need the catalog and both trees.
fn run(command: Command, config: &Config, stores: &Stores, json: bool) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Ingest { files, mime } => {
            let mut ingested = Vec::new();
            for file in &files {
                let data = std::fs::read(file)?;
                let record = stores.attachments.ingest(&data, mime.as_deref())?;
                let path = stores.attachments.storage_path(record.id)?;
                let digest = cache::digest_bytes(&data);
                if !json {
                    output::print_ingest(&record, &path, &digest);
                }
                ingested.push(record);
            }
            if json {
                print_json(&ingested)?;
            }
        }
        Command::Get { id, size, plan } if plan => {
            let dims = config
                .dimensions
                .get(&size)
                .or_else(|| Dimensions::decode(&size))
                .ok_or_else(|| DerivativeError::NotAllowed(size.clone()))?;
            let plan = stores.derivatives.plan(id, dims)?;
            if json {
                print_json(&plan)?;
            } else {
                for line in output::format_plan(id, &dims, &plan, &config.dimensions) {
                    println!("{}", line);
                }
            }
        }
        Command::Get { id, size, .. } => {
            let derivative = if config.dimensions.get(&size).is_some() {
                stores.derivatives.get_or_create_canned(id, &size)?
            } else {
                stores.derivatives.get_or_create_encoded(id, &size)?
            };
            if json {
                print_json(&derivative)?;
            } else {
                let digest = cache::digest_file(&derivative.path)?;
                output::print_derivative(&derivative, &config.dimensions, &digest);
            }
        }
        Command::List { id } => {
            let attachments = match id {
                Some(id) => vec![stores.attachments.get(id)?],
                None => stores.attachments.list()?,
            };
            let mut entries = Vec::with_capacity(attachments.len());
            for attachment in attachments {
                let mut derivatives = Vec::new();
                for record in stores.derivatives.list_for(attachment.id)? {
                    let materialized = stores.derivatives.is_materialized(&record)?;
                    derivatives.push(DerivativeEntry {
                        record,
                        materialized,
                    });
                }
                entries.push(ListEntry {
                    attachment,
                    derivatives,
                });
            }
            if json {
                print_json(&entries)?;
            } else {
                output::print_list(&entries, &config.dimensions);
            }
        }
        Command::Warm { ids } => {
            init_thread_pool(&config.processing);
            let attachments = if ids.is_empty() {
                stores.attachments.list()?
            } else {
                ids.iter()
                    .map(|id| stores.attachments.get(*id))
                    .collect::<Result<Vec<_>, _>>()?
            };
            info!(
                "Warming {} attachments × {} sizes",
                attachments.len(),
                config.dimensions.len()
            );
            let stats = stores.derivatives.warm(&attachments);
            if json {
                print_json(&stats)?;
            } else {
                println!("Cache: {}", stats);
            }
        }
        Command::Audit { remove_orphans } => {
            let report = audit::audit(
                &stores.catalog,
                stores.attachments.tree(),
                stores.derivatives.tree(),
                remove_orphans,
            )?;
            if json {
                print_json(&report)?;
            } else {
                output::print_audit(&report);
            }
        }
        Command::Delete { id } => {
            let deleted = stores.attachments.delete(id)?;
            if json {
                print_json(&deleted)?;
            } else {
                for line in output::format_deleted(&deleted) {
                    println!("{}", line);
                }
            }
        }
        Command::Dimensions | Command::GenConfig => {}
    }
    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores: config can lower it, not raise it.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
