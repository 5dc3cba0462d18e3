use std::env;
use std::path::Path;
use std::process::Command;

use chrono::Utc;

fn main() {
    println!("cargo:rerun-if-env-changed=FLEETD_BUILD_ID_OVERRIDE");
    println!("cargo:rerun-if-changed=.git/HEAD");

    let stamped_at = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let git_label = describe_git();

    let build_id = env::var("FLEETD_BUILD_ID_OVERRIDE")
        .unwrap_or_else(|_| format!("{} | {}", stamped_at, git_label));

    println!("cargo:rustc-env=FLEETD_BUILD_ID={}", build_id);
    println!("cargo:rustc-env=FLEETD_BUILD_TIME={}", stamped_at);
    println!("cargo:rustc-env=FLEETD_BUILD_GIT={}", git_label);
}

fn describe_git() -> String {
    if !Path::new(".git").exists() && !Path::new("../../.git").exists() {
        return "unknown".to_string();
    }

    Command::new("git")
        .args(["describe", "--tags", "--dirty", "--always"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
