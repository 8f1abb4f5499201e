use std::env;

fn main() {
    // Release builds may stamp a version other than the crate's
    let version = env::var("HAVEN_BUILD_VERSION")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap_or_default());
    println!("cargo:rustc-env=HAVEN_VERSION={version}");

    println!("cargo:rerun-if-env-changed=HAVEN_BUILD_VERSION");
    println!("cargo:rerun-if-changed=Cargo.toml");
}
