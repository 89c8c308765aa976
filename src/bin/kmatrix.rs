//! kmatrix - blockwise graph kernel similarity pipeline
//!
//! Usage:
//!   kmatrix plan    --graphs-dir ./graphs [--output-dir ./out] [--subsets 10]
//!   kmatrix compute [--output-dir ./out] [--force]
//!   kmatrix merge   [--output-dir ./out]
//!   kmatrix status  [--output-dir ./out]
//!
//! A batch runs in three phases. `plan` freezes the record list into a
//! manifest, `compute` produces one block file per subset pair and can
//! be re-run until all blocks exist, `merge` reassembles the blocks
//! into the final N x N matrix.
//!
//! Exit codes:
//!   0  success (for compute: every block is present)
//!   1  fatal error
//!   2  compute finished with failed blocks; re-run to retry them

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use kmatrix::config::{BLOCKS_DIR, CONFIG_FILE, DEFAULT_WL_ITERATIONS, FINAL_MATRIX_FILE, MANIFEST_FILE};
use kmatrix::{
    reconstruct, subset_pairs, write_global_matrix, BlockComputer, BlockStore, DirectoryStore,
    GraphKernel, Manifest, PipelineConfig, WeisfeilerLehman,
};

/// Batch directory used when no `--output-dir` is given.
const DEFAULT_OUTPUT_DIR: &str = "kmatrix-out";

#[derive(Parser)]
#[command(name = "kmatrix", version)]
#[command(about = "Blockwise graph kernel similarity matrices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover graph records and freeze them into a manifest
    Plan(PlanArgs),

    /// Compute the block matrix for every absent subset pair
    Compute(ComputeArgs),

    /// Reconstruct the final matrix from the stored blocks
    Merge(MergeArgs),

    /// Show manifest and block progress for a batch
    Status(StatusArgs),
}

#[derive(Args)]
struct PlanArgs {
    /// Directory holding the graph input files
    #[arg(long)]
    graphs_dir: Option<PathBuf>,

    /// Directory receiving manifest, blocks, and the final matrix
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Start from an existing config file instead of defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Glob pattern selecting input files inside the graphs directory
    #[arg(long)]
    pattern: Option<String>,

    /// Number of partition subsets (K)
    #[arg(long)]
    subsets: Option<usize>,

    /// Refinement rounds for the Weisfeiler-Lehman kernel
    #[arg(long)]
    wl_iterations: Option<usize>,

    /// Replace an existing manifest
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct ComputeArgs {
    /// Directory holding manifest, blocks, and the final matrix
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Refinement rounds for the Weisfeiler-Lehman kernel
    #[arg(long)]
    wl_iterations: Option<usize>,

    /// Recompute blocks that already exist
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct MergeArgs {
    /// Directory holding manifest, blocks, and the final matrix
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Expected subset count; must match the planned manifest
    #[arg(long)]
    subsets: Option<usize>,
}

#[derive(Args)]
struct StatusArgs {
    /// Directory holding manifest, blocks, and the final matrix
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Plan(args) => cmd_plan(args),
        Commands::Compute(args) => cmd_compute(args),
        Commands::Merge(args) => cmd_merge(args),
        Commands::Status(args) => cmd_status(args),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!("{:#}", err);
            std::process::exit(1);
        }
    }
}

fn cmd_plan(args: PlanArgs) -> Result<i32> {
    let config = resolve_plan_config(&args)?;
    config.validate()?;
    config.ensure_directories()?;

    let manifest_path = config.manifest_path();
    if manifest_path.exists() && !args.force {
        bail!(
            "manifest already exists at {}; pass --force to replan",
            manifest_path.display()
        );
    }

    let manifest = Manifest::plan(&config)?;
    manifest.write_to(&manifest_path)?;
    config.write_to(&config.config_path())?;

    let partition = manifest.partition()?;
    println!(
        "planned {} records into {} subsets ({} blocks)",
        manifest.record_count(),
        partition.subset_count(),
        subset_pairs(partition.subset_count()).count()
    );
    Ok(0)
}

/// Effective plan config: explicit --config file, else the snapshot in
/// the output directory, else defaults. Flags override either source,
/// but only the flags actually given.
fn resolve_plan_config(args: &PlanArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::read_from(path)?
            .with_context(|| format!("config file not found: {}", path.display()))?,
        None => {
            let addressed = args
                .output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
            match PipelineConfig::read_from(&addressed.join(CONFIG_FILE))? {
                Some(mut existing) => {
                    // A moved batch directory plans into itself, not
                    // into the path recorded before the move.
                    existing.output_dir = addressed;
                    existing
                }
                None => {
                    let graphs_dir = args
                        .graphs_dir
                        .clone()
                        .context("--graphs-dir is required when no config file exists")?;
                    PipelineConfig::new(graphs_dir, addressed)
                }
            }
        }
    };

    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(dir) = &args.graphs_dir {
        config.graphs_dir = dir.clone();
    }
    if let Some(pattern) = &args.pattern {
        config.pattern = pattern.clone();
    }
    if let Some(k) = args.subsets {
        config.subset_count = k;
    }
    if let Some(h) = args.wl_iterations {
        config.wl_iterations = h;
    }
    Ok(config)
}

fn cmd_compute(args: ComputeArgs) -> Result<i32> {
    let manifest = load_manifest(&args.output_dir)?;
    let iterations = effective_wl_iterations(&args.output_dir, args.wl_iterations)?;

    let kernel = WeisfeilerLehman::new(iterations);
    let store = DirectoryStore::new(args.output_dir.join(BLOCKS_DIR))?;
    let computer = BlockComputer::new(&manifest, &kernel, &store);
    let report = computer.run(args.force)?;

    println!(
        "computed {} blocks, skipped {} existing, {} failed",
        report.computed,
        report.skipped,
        report.failed.len()
    );
    if report.complete() {
        Ok(0)
    } else {
        for (i, j) in &report.failed {
            eprintln!("block ({}, {}) failed; re-run 'kmatrix compute' to retry", i, j);
        }
        Ok(2)
    }
}

fn cmd_merge(args: MergeArgs) -> Result<i32> {
    let manifest = load_manifest(&args.output_dir)?;
    if let Some(k) = args.subsets {
        manifest.require_subset_count(k)?;
    }

    let iterations = effective_wl_iterations(&args.output_dir, None)?;
    let kernel = WeisfeilerLehman::new(iterations);
    let store = DirectoryStore::new(args.output_dir.join(BLOCKS_DIR))?;

    let global = reconstruct(&manifest, &store, kernel.self_similarity())?;
    let path = args.output_dir.join(FINAL_MATRIX_FILE);
    write_global_matrix(&path, &manifest, &global)?;

    println!(
        "wrote {} x {} matrix to {}",
        global.nrows(),
        global.ncols(),
        path.display()
    );
    Ok(0)
}

fn cmd_status(args: StatusArgs) -> Result<i32> {
    let manifest_path = args.output_dir.join(MANIFEST_FILE);
    let manifest = match Manifest::read_from(&manifest_path)? {
        Some(manifest) => manifest,
        None => {
            println!(
                "no manifest at {}; run 'kmatrix plan' first",
                manifest_path.display()
            );
            return Ok(0);
        }
    };

    let partition = manifest.partition()?;
    let store = DirectoryStore::new(args.output_dir.join(BLOCKS_DIR))?;

    let mut present = 0usize;
    let mut missing = Vec::new();
    for (i, j) in subset_pairs(partition.subset_count()) {
        if store.exists(i, j) {
            present += 1;
        } else {
            missing.push((i, j));
        }
    }

    let sizes: Vec<usize> = (0..partition.subset_count())
        .map(|k| partition.size(k))
        .collect();

    println!("graphs dir:   {}", manifest.graphs_dir.display());
    println!("pattern:      {}", manifest.pattern);
    println!("records:      {}", manifest.record_count());
    println!("subsets:      {} (sizes {:?})", partition.subset_count(), sizes);
    println!("blocks:       {} / {} present", present, present + missing.len());
    if !missing.is_empty() {
        let shown: Vec<String> = missing
            .iter()
            .take(8)
            .map(|(i, j)| format!("({}, {})", i, j))
            .collect();
        let more = if missing.len() > 8 { " ..." } else { "" };
        println!("missing:      {}{}", shown.join(" "), more);
    }

    let final_path = args.output_dir.join(FINAL_MATRIX_FILE);
    let final_state = if final_path.exists() { "present" } else { "absent" };
    println!("final matrix: {}", final_state);
    Ok(0)
}

fn load_manifest(output_dir: &Path) -> Result<Manifest> {
    let path = output_dir.join(MANIFEST_FILE);
    Manifest::read_from(&path)?.with_context(|| {
        format!(
            "no manifest at {}; run 'kmatrix plan' first",
            path.display()
        )
    })
}

/// Kernel depth: explicit flag, else the planned config snapshot, else
/// the default. Compute and merge resolve it the same way so the
/// diagonal matches the blocks.
fn effective_wl_iterations(output_dir: &Path, flag: Option<usize>) -> Result<usize> {
    if let Some(n) = flag {
        return Ok(n);
    }
    let config = PipelineConfig::read_from(&output_dir.join(CONFIG_FILE))?;
    Ok(config.map(|c| c.wl_iterations).unwrap_or(DEFAULT_WL_ITERATIONS))
}
