//! Pre-flight checks for callscope
//!
//! Validates inputs before any symbolizer is started.
//! Provides clear, actionable error messages when requirements aren't met.

use anyhow::{bail, Context, Result};
use log::warn;
use object::{Object, ObjectSection};
use std::path::Path;

/// Run all input checks before reading the profile
///
/// # Errors
/// Returns an error naming the first missing or unusable input.
pub fn run_preflight_checks(maps_path: &Path, calls_path: &Path, objdir: &Path) -> Result<()> {
    check_file_exists(maps_path, "Memory map snapshot")?;
    check_file_exists(calls_path, "Call trace")?;
    check_directory_exists(objdir)?;
    Ok(())
}

/// Check that a profile input exists and is a regular file
fn check_file_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        bail!(
            "{what} not found: {}\n\n\
             Point callscope at the directory the profiled process wrote (maps + calls).",
            path.display()
        );
    }
    if !path.is_file() {
        bail!("Not a file: {}", path.display());
    }
    Ok(())
}

/// Check that the unstripped object directory exists
fn check_directory_exists(objdir: &Path) -> Result<()> {
    if !objdir.is_dir() {
        bail!(
            "Object directory not found: {}\n\n\
             --objdir must point to a directory of unstripped binaries.",
            objdir.display()
        );
    }
    Ok(())
}

/// Warn if an object lacks the sections symbolization depends on
///
/// Returns `Ok(false)` if the object is stripped of both DWARF and the symbol table.
///
/// # Errors
/// Returns an error if the object cannot be read.
pub fn check_debug_symbols(object_path: &Path) -> Result<bool> {
    let file_data = std::fs::read(object_path)
        .with_context(|| format!("Failed to read object: {}", object_path.display()))?;

    let Ok(obj) = object::File::parse(&*file_data) else {
        // Not a format we understand, let the symbolizer judge it
        return Ok(true);
    };

    let has_debug_info = obj.section_by_name(".debug_info").is_some_and(|s| s.size() > 0);
    let has_symtab = obj.section_by_name(".symtab").is_some_and(|s| s.size() > 0);

    if !has_debug_info && !has_symtab {
        warn!("{}: binary stripped, symbols will be unknown", object_path.display());
        return Ok(false);
    } else if !has_debug_info {
        warn!("{}: no DWARF debug info, source locations unavailable", object_path.display());
    }

    Ok(true)
}
