// SPDX-License-Identifier: Apache-2.0
//! Build script: compile a tiny shared library for integration tests, with
//! an embedded SONAME (Linux) / install name (macOS) so the end-to-end key
//! derivation can be exercised against a real object file.

use std::env;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    let fixture_src = "tests/fixture/fixture.c";
    println!("cargo:rerun-if-changed={fixture_src}");

    // Windows and machines without a C compiler run the fake-primitive
    // tests only; the integration test skips itself when the var is empty.
    if cfg!(windows) || !std::path::Path::new(fixture_src).exists() {
        println!("cargo:rustc-env=ONCELOAD_FIXTURE_PATH=");
        return;
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let (lib_name, id_flag) = if cfg!(target_os = "macos") {
        (
            "libonceload_fixture.dylib",
            "-Wl,-install_name,@rpath/libonceload_fixture.dylib".to_string(),
        )
    } else {
        (
            "libonceload_fixture.so",
            "-Wl,-soname,libonceload_fixture.so.1".to_string(),
        )
    };
    let lib_path = out_dir.join(lib_name);

    let status = Command::new("cc")
        .args([
            "-shared",
            "-fPIC",
            "-o",
            lib_path.to_str().unwrap(),
            fixture_src,
            &id_flag,
            "-Wall",
            "-Wextra",
            "-O2",
        ])
        .status();

    match status {
        Ok(s) if s.success() => {
            println!(
                "cargo:rustc-env=ONCELOAD_FIXTURE_PATH={}",
                lib_path.display()
            );
        }
        _ => {
            println!("cargo:warning=no working C compiler; skipping fixture library");
            println!("cargo:rustc-env=ONCELOAD_FIXTURE_PATH=");
        }
    }
}
