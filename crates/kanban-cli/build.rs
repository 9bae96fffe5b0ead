use std::process::Command;

/// `git describe` of the checkout, or `unreleased` for source tarballs.
fn revision() -> String {
    Command::new("git")
        .args(["describe", "--always", "--dirty=-modified", "--abbrev=10"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|rev| rev.trim().to_string())
        .filter(|rev| !rev.is_empty())
        .unwrap_or_else(|| "unreleased".to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/index");
    println!("cargo:rustc-env=KANBAN_REVISION={}", revision());
}
