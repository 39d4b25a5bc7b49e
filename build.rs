use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Snapshots hold absolute return addresses into our text, so the
    // binary has to load at the same address in every process.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("linux") {
        println!("cargo:rustc-link-arg-bins=-no-pie");
    }
}
