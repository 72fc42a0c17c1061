//! Build script for ats-sys.
//!
//! The ATS API ships as a prebuilt shared library (`ATSApi.dll` on Windows,
//! `libATSApi.so` on Linux). There are no headers worth running bindgen over
//! for the handful of entry points this crate needs, so the declarations in
//! `src/lib.rs` are maintained by hand and this script only resolves linking.
//!
//! 1. With `ats-sdk` feature: link against ATSApi, honouring `ATS_SDK_DIR`
//! 2. Without feature: nothing is linked; only constants are exported

fn main() {
    println!("cargo:rerun-if-env-changed=ATS_SDK_DIR");

    #[cfg(feature = "ats-sdk")]
    link_ats_api();
}

#[cfg(feature = "ats-sdk")]
fn link_ats_api() {
    use std::path::Path;

    if let Ok(dir) = std::env::var("ATS_SDK_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
    } else {
        // Standard install locations for the Linux driver package and the
        // Windows SDK.
        let lib_paths = [
            "/usr/local/AlazarTech/lib",
            "/usr/local/lib",
            "/usr/lib",
            "/usr/lib/x86_64-linux-gnu",
            "C:\\AlazarTech\\ATS-SDK\\Library\\x64",
        ];

        for path in lib_paths {
            let dir = Path::new(path);
            if dir.join("libATSApi.so").exists() || dir.join("ATSApi.lib").exists() {
                println!("cargo:rustc-link-search=native={}", path);
                break;
            }
        }
    }

    println!("cargo:rustc-link-lib=dylib=ATSApi");
}
