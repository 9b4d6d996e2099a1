use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{debug, info};

use pcascade_codecs::{exact_by_name, float_by_name};
use pcascade_core::catalog::{Catalog, DatasetCascadeCatalogEntry, DatasetIdentity};
use pcascade_core::engine::sensitivity;
use pcascade_core::store::{CascadeStore, FileStore};
use pcascade_core::{CascadeConfig, CascadeEngine, CascadeHeader, CodecSet, ElementTypeTag};

/// Table size for a column index created from the command line.
const DEFAULT_MAX_BLOCKS: usize = 16;

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "pcascade",
    about = "Precision cascades: compress numeric arrays into layered buffers, inspect and store them",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a raw little-endian array into a cascade of buffer files
    Compress {
        /// Raw array file
        input: PathBuf,
        /// Output prefix; buffer i is written to <prefix>.<i>.pc
        out_prefix: PathBuf,
        /// Element type: i8 | i16 | i32 | i64 | u8 | u16 | u32 | u64 | f32 | f64
        #[arg(short, long, default_value = "f32")]
        dtype: String,
        /// Comma-separated level codes, coarsest first (a trailing 0 adds a residual)
        #[arg(short, long, value_delimiter = ',')]
        levels: Vec<i32>,
        /// Append a residual buffer so the full cascade is bit-exact
        #[arg(short, long, conflicts_with = "no_residual")]
        residual: bool,
        /// Leave out the residual buffer; every level buffer becomes mandatory
        #[arg(long)]
        no_residual: bool,
        /// Per-buffer capacity in bytes; repeat once per buffer, or give one for all
        #[arg(short, long)]
        capacity: Vec<usize>,
        /// JSON configuration file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,
        /// Zstd level for float layers
        #[arg(long)]
        zstd_level: Option<i32>,
        /// Float transform: mantissa
        #[arg(long, default_value = "mantissa")]
        float_codec: String,
        /// Integer codec: rle
        #[arg(long, default_value = "rle")]
        exact_codec: String,
    },
    /// Rebuild an array from a prefix of its cascade buffers
    Decompress {
        /// Destination file
        output: PathBuf,
        /// Buffer files, coarsest first
        #[arg(required = true)]
        buffers: Vec<PathBuf>,
    },
    /// Print header fields of cascade buffers
    Inspect {
        #[arg(required = true)]
        buffers: Vec<PathBuf>,
    },
    /// Store a cascade buffer as one block of a column
    Store {
        #[command(flatten)]
        target: BlockTarget,
        /// Cascade buffer file to store
        buffer: PathBuf,
    },
    /// Read one block of a column back out of the store
    Retrieve {
        #[command(flatten)]
        target: BlockTarget,
        /// Destination file for the raw block
        output: PathBuf,
    },
    /// List catalog entries and their column indices
    Catalog {
        /// Catalog JSON file
        catalog: PathBuf,
    },
}

#[derive(clap::Args)]
struct BlockTarget {
    /// Catalog JSON file
    #[arg(long)]
    catalog: PathBuf,
    /// Block store file
    #[arg(long)]
    store: PathBuf,
    /// Dataset name
    #[arg(long)]
    dataset: String,
    /// Dataset unique id
    #[arg(long, default_value_t = 0)]
    dataset_id: u32,
    /// Cascade level (position in the cascade)
    #[arg(long, default_value_t = 1)]
    level: u32,
    /// Full column name
    #[arg(long)]
    column: String,
    /// Zero-based block id
    #[arg(short, long)]
    block: usize,
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn parse_dtype(name: &str) -> anyhow::Result<ElementTypeTag> {
    ElementTypeTag::from_name(name).ok_or_else(|| {
        anyhow::anyhow!(
            "unknown dtype '{}'. Valid options: i8, i16, i32, i64, u8, u16, u32, u64, f32, f64",
            name
        )
    })
}

/// `--residual` / `--no-residual` as an override of the configured value.
fn residual_override(residual: bool, no_residual: bool) -> Option<bool> {
    match (residual, no_residual) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

fn buffer_path(prefix: &Path, index: usize) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(format!(".{}.pc", index));
    PathBuf::from(name)
}

fn read_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {:?}", path))
}

fn open_store(path: &Path) -> anyhow::Result<Arc<dyn CascadeStore>> {
    let store = if path.exists() {
        FileStore::open(path)
    } else {
        FileStore::create(path)
    }
    .with_context(|| format!("opening block store {:?}", path))?;
    Ok(Arc::new(store))
}

// ── Subcommand implementations ─────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn run_compress(
    input: PathBuf,
    out_prefix: PathBuf,
    dtype: &str,
    levels: Vec<i32>,
    residual: Option<bool>,
    capacity: Vec<usize>,
    config: Option<PathBuf>,
    zstd_level: Option<i32>,
    float_codec: &str,
    exact_codec: &str,
) -> anyhow::Result<()> {
    let mut cfg = match &config {
        Some(path) => CascadeConfig::load(path).with_context(|| format!("loading config {:?}", path))?,
        None => CascadeConfig::default(),
    };
    if !levels.is_empty() {
        cfg.levels = levels;
    }
    if let Some(residual) = residual {
        cfg.store_residual = residual;
    }
    if let Some(level) = zstd_level {
        cfg.zstd_level = level;
    }
    cfg.validate()?;

    let tag = parse_dtype(dtype)?;
    let codecs = CodecSet::new(float_by_name(float_codec, cfg.zstd_level)?, exact_by_name(exact_codec)?);
    let engine = CascadeEngine::new(codecs);

    let capacities = match capacity.as_slice() {
        [] => cfg.target_capacities()?,
        [one] => vec![*one; cfg.spec()?.buffer_count()],
        many => many.to_vec(),
    };
    debug!("compress config: {:?}, capacities {:?}", cfg, capacities);

    let src = read_file(&input)?;
    let t0 = Instant::now();
    let buffers = engine.cascade_compress(&cfg.levels, cfg.store_residual, &src, tag, &capacities)?;
    let elapsed = t0.elapsed();

    let mut total = 0u64;
    for (i, buf) in buffers.iter().enumerate() {
        let path = buffer_path(&out_prefix, i);
        std::fs::write(&path, buf.as_bytes()).with_context(|| format!("writing {:?}", path))?;
        total += buf.len() as u64;
        eprintln!("  buffer {:<4} : {} -> {:?}", i, human_bytes(buf.len() as u64), path);
    }

    eprintln!("  dtype       : {}", tag);
    eprintln!("  codecs      : {:?}", engine.codecs());
    eprintln!("  buffers     : {}", buffers.len());
    eprintln!("  raw size    : {}", human_bytes(src.len() as u64));
    eprintln!("  compressed  : {}", human_bytes(total));
    if total > 0 {
        eprintln!("  ratio       : {:.2}x", src.len() as f64 / total as f64);
    }
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decompress(output: PathBuf, buffers: Vec<PathBuf>) -> anyhow::Result<()> {
    let raw = buffers
        .iter()
        .map(|p| read_file(p))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let header = CascadeHeader::decode(&raw[0])
        .with_context(|| format!("reading header of {:?}", buffers[0]))?;
    let tag = ElementTypeTag::try_from(header.datatype)?;

    let t0 = Instant::now();
    let out = CascadeEngine::new(pcascade_codecs::default_codecs()).cascade_decompress(
        &raw,
        tag,
        header.original_len,
    )?;
    let elapsed = t0.elapsed();

    std::fs::write(&output, &out).with_context(|| format!("writing {:?}", output))?;
    eprintln!("  buffers     : {} of {}", raw.len(), header.buffer_count);
    eprintln!("  raw size    : {}", human_bytes(out.len() as u64));
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(buffers: Vec<PathBuf>) -> anyhow::Result<()> {
    for path in buffers {
        let raw = read_file(&path)?;
        let h = CascadeHeader::decode(&raw).with_context(|| format!("reading header of {:?}", path))?;
        let tag = ElementTypeTag::try_from(h.datatype);

        println!("=== Cascade buffer: {:?} ===", path);
        println!();
        println!("  format version : {}", h.version);
        if h.discriminator.is_residual() {
            println!("  level          : residual");
        } else {
            let level = h.discriminator.level();
            match tag {
                Ok(ElementTypeTag::F32 | ElementTypeTag::F64) => {
                    println!("  level          : {} (sensitivity {})", level, sensitivity(level))
                }
                _ => println!("  level          : {}", level),
            }
        }
        println!("  residual after : {}", h.discriminator.residual_follows());
        match tag {
            Ok(tag) => println!("  datatype       : {} ({})", tag, h.datatype),
            Err(_) => println!("  datatype       : unsupported ({})", h.datatype),
        }
        println!("  buffer count   : {}", h.buffer_count);
        println!("  compressed     : {}", human_bytes(h.compressed_len as u64));
        println!("  original       : {}", human_bytes(h.original_len as u64));
        println!("  file on disk   : {}", human_bytes(raw.len() as u64));
        println!();
    }
    Ok(())
}

fn run_store(target: BlockTarget, buffer: PathBuf) -> anyhow::Result<()> {
    let bytes = read_file(&buffer)?;
    let header = CascadeHeader::decode(&bytes).with_context(|| format!("reading header of {:?}", buffer))?;

    let dataset = DatasetIdentity::new(&target.dataset, target.dataset_id);
    let mut catalog = Catalog::open(&target.catalog)?;
    let mut entry = match catalog.load_entry(&dataset, target.level) {
        Ok(entry) => entry,
        Err(pcascade_core::CascadeError::MissingEntry(_)) => {
            DatasetCascadeCatalogEntry::new(&dataset, target.level)
        }
        Err(e) => return Err(e.into()),
    };
    entry.attach_store(open_store(&target.store)?);

    let offset = entry
        .get_or_create_column(&target.column, DEFAULT_MAX_BLOCKS)
        .store_block(target.block, &bytes, header.original_len)?;
    info!(
        "stored block {} of {} ({} bytes) at offset {}",
        target.block,
        target.column,
        bytes.len(),
        offset
    );

    entry.detach_store();
    catalog.save_entry(entry)?;
    catalog.flush()?;
    eprintln!("  entry       : {}", pcascade_core::catalog::entry_name(&target.dataset, target.level));
    eprintln!("  block       : {} @ {}", target.block, offset);
    eprintln!("  size        : {}", human_bytes(bytes.len() as u64));
    Ok(())
}

fn run_retrieve(target: BlockTarget, output: PathBuf) -> anyhow::Result<()> {
    let dataset = DatasetIdentity::new(&target.dataset, target.dataset_id);
    let catalog = Catalog::open(&target.catalog)?;
    let mut entry = catalog.load_entry(&dataset, target.level)?;
    entry.attach_store(open_store(&target.store)?);

    let column = entry
        .column_mut(&target.column)
        .ok_or_else(|| anyhow::anyhow!("column '{}' has no cascade index in {}", target.column, entry_label(&target)))?;
    let (bytes, original_len) = column.retrieve_block_with_len(target.block)?;
    std::fs::write(&output, bytes).with_context(|| format!("writing {:?}", output))?;

    eprintln!("  block       : {}", target.block);
    eprintln!("  size        : {}", human_bytes(bytes.len() as u64));
    eprintln!("  original    : {}", human_bytes(original_len as u64));
    Ok(())
}

fn entry_label(target: &BlockTarget) -> String {
    pcascade_core::catalog::entry_name(&target.dataset, target.level)
}

fn run_catalog(path: PathBuf) -> anyhow::Result<()> {
    let catalog = Catalog::open(&path)?;
    println!("=== Catalog: {:?} ===", path);
    for name in catalog.entry_names() {
        println!("  {}", name);
    }
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Compress {
            input,
            out_prefix,
            dtype,
            levels,
            residual,
            no_residual,
            capacity,
            config,
            zstd_level,
            float_codec,
            exact_codec,
        } => run_compress(
            input,
            out_prefix,
            &dtype,
            levels,
            residual_override(residual, no_residual),
            capacity,
            config,
            zstd_level,
            &float_codec,
            &exact_codec,
        ),
        Commands::Decompress { output, buffers } => run_decompress(output, buffers),
        Commands::Inspect { buffers } => run_inspect(buffers),
        Commands::Store { target, buffer } => run_store(target, buffer),
        Commands::Retrieve { target, output } => run_retrieve(target, output),
        Commands::Catalog { catalog } => run_catalog(catalog),
    }
}
