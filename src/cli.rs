//! CLI surface (§6, §11.5): `orchestrate`, `copy`, `recover-failed`, plus
//! the ambient `migrate` command. Output uses `tracing` for progress and
//! `comfy-table`/`owo-colors` for the human-readable summary printed on
//! exit, matching the teacher's CLI output conventions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use comfy_table::Table;
use owo_colors::OwoColorize;

use ntt_catalog::{Catalog, ErrorType};
use ntt_config::NttConfig;

use crate::error::{NttError, Result};
use crate::imaging::DdrescueMapFile;
use crate::mount::ExternalMountHelper;
use crate::orchestrator::{Orchestrator, Stage};

#[derive(Parser)]
#[command(name = "ntt")]
#[command(about = "Forensic ingestion pipeline: mount, enumerate, load, copy-with-dedup, archive")]
pub struct Cli {
	/// Path to the NTT config file, created with defaults on first run.
	#[arg(short, long, global = true, env = "NTT_CONFIG", default_value = "ntt.toml")]
	pub config: PathBuf,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Run the full per-medium state machine: mount, enumerate, load, copy,
	/// archive (§4.8).
	Orchestrate {
		medium_hash: String,
		/// Process a `failed`-health medium anyway (§6).
		#[arg(long)]
		force: bool,
	},

	/// Run just the copy stage against an already-enumerated medium; used
	/// to fan out multiple copy workers across processes (§6).
	Copy {
		medium_hash: String,
		#[arg(long)]
		force: bool,
	},

	/// Reset `failed_retryable` inodes of a given `error_type` back to
	/// `pending` after the operator has fixed the external root cause (§6,
	/// §7). Dry-run by default; pass `--execute` to actually reset rows.
	RecoverFailed {
		medium_hash: String,
		#[arg(long = "error-type", value_enum)]
		error_type: CliErrorType,
		/// Actually perform the reset; without this flag, only reports
		/// how many rows would be affected.
		#[arg(long)]
		execute: bool,
		/// Also reset `failed_permanent` rows, not just `failed_retryable`
		/// (§9 open question, permitted only via this explicit flag).
		#[arg(long)]
		include_permanent: bool,
	},

	/// Run catalog schema migrations.
	Migrate,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum CliErrorType {
	PathError,
	IoError,
	HashError,
	PermissionError,
	Unknown,
}

impl From<CliErrorType> for ErrorType {
	fn from(value: CliErrorType) -> Self {
		match value {
			CliErrorType::PathError => ErrorType::PathError,
			CliErrorType::IoError => ErrorType::IoError,
			CliErrorType::HashError => ErrorType::HashError,
			CliErrorType::PermissionError => ErrorType::PermissionError,
			CliErrorType::Unknown => ErrorType::Unknown,
		}
	}
}

type NttOrchestrator = Orchestrator<ExternalMountHelper, DdrescueMapFile, ntt_diagnostics::DmesgKernelLog>;

async fn build_orchestrator(config: &NttConfig) -> Result<NttOrchestrator> {
	let catalog = Catalog::connect(&config.database_url).await?;
	let mount = ExternalMountHelper::new(config.mount_helper_path.clone());
	let maps = DdrescueMapFile::new(config.map_dir.clone());
	Ok(Orchestrator::new(catalog, config.clone(), mount, maps, ntt_diagnostics::DmesgKernelLog::new()))
}

/// Parse arguments, dispatch, and return the process exit code (§6 "Exit
/// codes: 0 success, 2 stage-error, other values reserved").
pub async fn run() -> i32 {
	let cli = Cli::parse();
	match run_inner(cli).await {
		Ok(()) => 0,
		Err(e) => {
			tracing::error!(error = %e, "command failed");
			eprintln!("{} {e}", "error:".red().bold());
			match e {
				NttError::Config(_) => 1,
				other => other.exit_code(),
			}
		}
	}
}

async fn run_inner(cli: Cli) -> Result<()> {
	let config = NttConfig::load_or_create(&cli.config).map_err(NttError::Config)?;
	config.ensure_directories()?;
	let _log_guard = ntt_config::init_logging(&config).map_err(NttError::Config)?;

	match cli.command {
		Commands::Orchestrate { medium_hash, force } => {
			let orchestrator = build_orchestrator(&config).await?;
			let report = orchestrator.orchestrate(&medium_hash, force).await?;
			print_orchestration_report(&report);
		}
		Commands::Copy { medium_hash, force } => {
			let orchestrator = build_orchestrator(&config).await?;
			let summary = orchestrator.copy_only(&medium_hash, force).await?;
			print_copy_summary(&medium_hash, &summary);
		}
		Commands::RecoverFailed {
			medium_hash,
			error_type,
			execute,
			include_permanent,
		} => {
			let catalog = Catalog::connect(&config.database_url).await?;
			recover_failed(&catalog, &medium_hash, error_type.into(), execute, include_permanent).await?;
		}
		Commands::Migrate => {
			let catalog = Catalog::connect(&config.database_url).await?;
			catalog.migrate().await?;
			println!("{}", "catalog schema migrated".green());
		}
	}
	Ok(())
}

async fn recover_failed(catalog: &Catalog, medium_hash: &str, error_type: ErrorType, execute: bool, include_permanent: bool) -> Result<()> {
	let affected = catalog.recoverable_count(medium_hash, error_type, include_permanent).await?;
	if !execute {
		println!(
			"{} {affected} inode(s) with error_type={:?} would be reset to pending (dry-run, pass --execute to apply)",
			"would reset:".yellow(),
			error_type
		);
		return Ok(());
	}
	let reset = catalog.recover_failed(medium_hash, error_type, include_permanent).await?;
	println!("{} {reset} inode(s) with error_type={:?} reset to pending", "reset:".green().bold(), error_type);
	Ok(())
}

fn print_orchestration_report(report: &crate::orchestrator::OrchestrationReport) {
	let mut table = Table::new();
	table.set_header(vec!["medium_hash", "stage"]);
	table.add_row(vec![report.medium_hash.clone(), stage_label(report.final_stage).to_string()]);
	println!("{table}");

	if let Some(summary) = &report.copy_summary {
		println!(
			"copy: {} batch(es), {} succeeded, {} failed{}",
			summary.batches_processed,
			summary.inodes_succeeded.to_string().green(),
			summary.inodes_failed.to_string().red(),
			if summary.cancelled { " (cancelled)" } else { "" }
		);
	}
}

fn print_copy_summary(medium_hash: &str, summary: &ntt_copy_worker::WorkerSummary) {
	println!(
		"{medium_hash}: {} batch(es), {} succeeded, {} failed{}",
		summary.batches_processed,
		summary.inodes_succeeded.to_string().green(),
		summary.inodes_failed.to_string().red(),
		if summary.cancelled { " (cancelled)" } else { "" }
	);
}

fn stage_label(stage: Stage) -> &'static str {
	match stage {
		Stage::Imaged => "imaged",
		Stage::Mounted => "mounted",
		Stage::Enumerated => "enumerated",
		Stage::Loaded => "loaded",
		Stage::Copying => "copying",
		Stage::Copied => "copied",
		Stage::Archived => "archived",
	}
}
