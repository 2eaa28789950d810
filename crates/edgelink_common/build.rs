//! Build script for edgelink_common.
//!
//! Exposes EDGELINK_GIT_SHA for the version banner. Packaging builds outside
//! a checkout can set it in the environment; otherwise it comes from
//! `git describe`, with "unknown" as the last resort.

use std::path::PathBuf;
use std::process::Command;

const SHA_VAR: &str = "EDGELINK_GIT_SHA";

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    println!("cargo:rerun-if-env-changed={}", SHA_VAR);

    let sha = std::env::var(SHA_VAR)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| git(&["describe", "--always", "--dirty", "--abbrev=8"]))
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env={}={}", SHA_VAR, sha);

    // The crate sits two levels below the repository root, so resolve the
    // git dir instead of assuming ./.git
    if let Some(git_dir) = git(&["rev-parse", "--absolute-git-dir"]) {
        let git_dir = PathBuf::from(git_dir);
        println!("cargo:rerun-if-changed={}", git_dir.join("HEAD").display());
        println!("cargo:rerun-if-changed={}", git_dir.join("index").display());
    }
}
