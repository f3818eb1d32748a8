use std::env;
use std::process::Command;

/// Set when building outside a git checkout (release tarballs, CI caches).
const SHA_OVERRIDE: &str = "FULFILMENT_SYNC_GIT_SHA";

fn main() {
    let git_sha = env::var(SHA_OVERRIDE)
        .ok()
        .filter(|sha| !sha.trim().is_empty())
        .or_else(git_short_sha)
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=BUILD_GIT_SHA={}", git_sha.trim());

    println!("cargo:rerun-if-env-changed={SHA_OVERRIDE}");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}

fn git_short_sha() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=10", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}
