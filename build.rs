use std::{env, process::Command};

fn git_short_hash() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8(out.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    let commit = git_short_hash().unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=INDRAJALA_GIT_COMMIT={commit}");

    let built = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    println!("cargo:rustc-env=INDRAJALA_BUILD_TIME={built}");

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".into());
    println!("cargo:rustc-env=INDRAJALA_BUILD_PROFILE={profile}");
}
