//! Shared helpers: shell scripts standing in for addr2line and nm

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Answers every offset `o` with `fn_o` and `src/o.c:1`
pub const ECHO_SYMBOLIZER: &str = r#"
while read -r off; do
    echo "fn_$off"
    echo "src/$off.c:1"
done
"#;

/// Write an executable `/bin/sh` script named `name` into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("Failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod script");
    path
}

/// Create an (empty) object file the resolver will find in `objdir`.
pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"").expect("Failed to create object");
    path
}
