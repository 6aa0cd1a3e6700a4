use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use ksync_core::{SyncOptions, SyncReport};

#[derive(Args, Debug, Clone)]
#[command(about = "Sync a declared circuit IR into a KiCad project")]
pub struct SyncArgs {
    /// Project root directory holding (or to hold) the .kicad_pro/.kicad_sch files
    #[arg(value_name = "PROJECT_ROOT", value_hint = clap::ValueHint::DirPath)]
    pub project_root: PathBuf,

    /// Declared circuit IR, as JSON matching the canonical mirror's sheet tree shape
    #[arg(long = "ir", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub ir: PathBuf,

    /// Project name; defaults to the IR file's stem
    #[arg(long = "name", value_name = "NAME")]
    pub name: Option<String>,

    /// Regenerate every sheet from scratch instead of reconciling in place
    #[arg(long = "force-regenerate")]
    pub force_regenerate: bool,

    /// Also emit a PCB layout stub from the synced schematic
    #[arg(long = "generate-pcb")]
    pub generate_pcb: bool,

    /// Treat every recoverable issue (ambiguous match, orphan label) as an error
    #[arg(long = "strict")]
    pub strict: bool,

    /// Re-check the written files against the declared IR and fail if they'd diff
    #[arg(long = "verify-idempotent")]
    pub verify_idempotent: bool,
}

pub fn execute(args: SyncArgs) -> Result<()> {
    if !args.project_root.exists() {
        std::fs::create_dir_all(&args.project_root)
            .with_context(|| format!("creating project root {}", args.project_root.display()))?;
    }

    let project_name = args
        .name
        .clone()
        .or_else(|| args.ir.file_stem().map(|s| s.to_string_lossy().to_string()))
        .context("could not infer a project name from --ir; pass --name explicitly")?;

    let declared = ksync_core::load_declared_ir(&args.ir, &project_name)
        .with_context(|| format!("loading declared IR from {}", args.ir.display()))?;

    let options = SyncOptions {
        force_regenerate: args.force_regenerate,
        generate_pcb: args.generate_pcb,
        strict: args.strict,
        verify_idempotent: args.verify_idempotent,
    };

    let report = ksync_core::sync_with_default_resolver(&args.project_root, &declared, options);
    print_report(&report);

    let exit_code = report.exit_code();
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    for sheet in &report.sheets {
        println!("{} {}", "sheet".bold(), sheet.sheet_name);
        for reference in &sheet.added {
            println!("  {} {reference}", "+".green());
        }
        for reference in &sheet.updated {
            println!("  {} {reference}", "~".yellow());
        }
        for (old, new) in &sheet.renamed {
            println!("  {} {old} -> {new}", "r".cyan());
        }
        for reference in &sheet.deleted {
            println!("  {} {reference}", "-".red());
        }
        for net in &sheet.labels_added {
            println!("  {} label {net}", "+".green());
        }
        for net in &sheet.labels_removed {
            println!("  {} label {net}", "-".red());
        }
        for warning in &sheet.warnings {
            println!("  {} {warning}", "warning:".yellow().bold());
        }
        for error in &sheet.errors {
            println!("  {} {error}", "error:".red().bold());
        }
        if sheet.is_clean() {
            println!("  {}", "up to date".dimmed());
        }
    }

    match report.exit_code() {
        0 => println!("{}", "sync complete".green()),
        1 => println!("{}", "sync complete, with warnings".yellow()),
        _ => println!("{}", "sync failed".red()),
    }
}
