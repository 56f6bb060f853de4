//! Detects the rustc channel.
//!
//! The convolution layers of dfdx are only compiled on a nightly rustc, so this
//! crate sets the "nightly" feature on nightly and refuses to build otherwise
//! (see the `compile_error!` in `src/lib.rs`).
use rustc_version::{version_meta, Channel};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    match version_meta() {
        Ok(meta) if meta.channel == Channel::Nightly => {
            println!("cargo:rustc-cfg=feature=\"nightly\"");
        }
        Ok(meta) => {
            println!(
                "cargo:warning=dcgan needs a nightly rustc for dfdx convolutions, found {:?}",
                meta.channel
            );
        }
        Err(err) => {
            println!("cargo:warning=unable to query rustc version: {err}");
        }
    }
}
