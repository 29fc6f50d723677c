use std::process::Command;

/// Run a git subcommand and return trimmed stdout, or `None` outside a checkout.
fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");

    // `v0.4.0` on a release tag, `v0.4.0-3-gabc1234` between tags, bare hash without tags.
    let describe = git(&["describe", "--tags", "--always", "--dirty"]).unwrap_or_default();
    let on_tag = git(&["describe", "--exact-match", "--tags", "HEAD"]).is_some();

    println!("cargo:rustc-env=IMGPRESS_DESCRIBE={describe}");
    println!("cargo:rustc-env=IMGPRESS_ON_RELEASE_TAG={on_tag}");
}
