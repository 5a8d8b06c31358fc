use std::process::Command;
fn main() {
    let git_hash = match Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .map(|output| String::from_utf8(output.stdout))
    {
        Ok(Ok(hash)) if !hash.trim().is_empty() => hash.trim().to_string(),
        _ => "UNKNOWN".to_string(),
    };
    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
    println!("cargo:rerun-if-changed=.git/HEAD");
}
