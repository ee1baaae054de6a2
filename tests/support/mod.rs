//! Shared helpers for integration tests that stand in a scripted stub for
//! the Node/Playwright engine helper.

use std::io::Write;
use std::path::PathBuf;

use tempfile::TempDir;

/// Writes an executable shell script standing in for the engine helper.
/// The stub receives the same `-e <script> <flag>` arguments the real
/// helper would and ignores them.
pub fn write_stub_engine(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    file.write_all(body.as_bytes()).unwrap();
    drop(file);

    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Node/Playwright availability preflight would reject the stub scripts.
pub fn skip_engine_preflight() {
    std::env::set_var("EMBEDSHOT_SKIP_ENGINE_PREFLIGHT", "1");
}
