//! # callscope - Main Entry Point
//!
//! Reads a profile directory, resolves every traced address and writes one
//! report. See the library docs for the pipeline.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use callscope::cli::{Args, Backend};
use callscope::export::{render, write_report};
use callscope::preflight::run_preflight_checks;
use callscope::resolver::{AddressResolver, AddressStatus, SymbolBackend};
use callscope::symbolization::{
    MapRegion, RangeIndex, ResolutionPool, SymbolDumpTool, SymbolizerTool,
};
use callscope::trace_data::CallCounts;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn main() {
    let args = Args::parse();

    let default_filter = if args.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    std::process::exit(match run(&args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

/// Locate the external tools up front so a missing one fails before any work.
fn select_backend(args: &Args) -> Result<SymbolBackend> {
    let backend = match args.backend {
        Backend::Addr2line => {
            let tool = SymbolizerTool::locate(&args.addr2line)?
                .with_max_in_flight(args.max_in_flight())
                .with_read_timeout(args.read_timeout());
            SymbolBackend::Addr2line(ResolutionPool::new(tool, args.workers()))
        }
        Backend::SymbolTable => SymbolBackend::SymbolDump(SymbolDumpTool::locate(&args.nm)?),
    };
    Ok(backend)
}

#[tokio::main]
async fn run(args: &Args) -> Result<()> {
    let backend = select_backend(args)?;

    let maps_path = args.maps_path();
    let calls_path = args.calls_path();
    run_preflight_checks(&maps_path, &calls_path, &args.objdir)?;

    let ranges = if args.all_mappings {
        RangeIndex::from_file(&maps_path, |_| true)?
    } else {
        RangeIndex::from_file(&maps_path, MapRegion::is_executable)?
    };
    if ranges.is_empty() {
        warn!("{}: no usable mappings, every address will be unmapped", maps_path.display());
    }

    let calls = CallCounts::from_file(&calls_path, args.trace_format)?;

    let resolver =
        AddressResolver::new(ranges, &args.objdir, backend).with_demangling(args.demangle);
    let index = resolver.resolve(calls.addresses()).await;

    let counts = index.status_counts();
    let count = |status: AddressStatus| counts.get(&status).copied().unwrap_or(0);
    info!(
        "{} addresses: {} resolved, {} unknown, {} unmapped, {} missing object, {} failed",
        index.len(),
        count(AddressStatus::Resolved),
        count(AddressStatus::SymbolUnknown),
        count(AddressStatus::Unmapped),
        count(AddressStatus::ObjectMissing),
        count(AddressStatus::SymbolizerFailed) + count(AddressStatus::NotAttempted),
    );

    let report = render(args.format, &calls, &index).context("Failed to render report")?;
    write_report(args.output.as_deref(), &report)?;
    if let Some(path) = &args.output {
        info!("Report written to {}", path.display());
    }

    Ok(())
}
