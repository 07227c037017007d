use crate::util::repo_root;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::{Command, Stdio};

fn build(package: &str, bin: &str) -> Result<PathBuf> {
    let root = repo_root();
    let status = Command::new("cargo")
        .args(["build", "-p", package, "--bin", bin, "--quiet"])
        .current_dir(&root)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("cargo build -p {package} --bin {bin}"))?;
    if !status.success() {
        anyhow::bail!("failed to build {package}/{bin}");
    }
    Ok(root.join("target/debug").join(bin))
}

pub fn cargo_build_gateway_bin() -> Result<PathBuf> {
    build("gateway", "gateway")
}

pub fn cargo_build_scanner_bin() -> Result<PathBuf> {
    build("scanner", "scanner")
}
