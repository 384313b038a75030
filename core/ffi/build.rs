//! Build script for generating the C header using cbindgen.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=src/types.rs");
    println!("cargo:rerun-if-changed=cbindgen.toml");

    let Ok(crate_dir) = env::var("CARGO_MANIFEST_DIR").map(PathBuf::from) else {
        println!("cargo:warning=CARGO_MANIFEST_DIR not set; skipping header generation");
        return;
    };

    let output_file = target_dir(&crate_dir).join("include").join("coffer.h");
    if let Some(parent) = output_file.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            println!("cargo:warning=Unable to create {}: {}", parent.display(), e);
            return;
        }
    }

    let config = cbindgen::Config::from_file(crate_dir.join("cbindgen.toml")).unwrap_or_default();

    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(&output_file);
        }
        Err(e) => {
            println!("cargo:warning=Unable to generate C bindings: {}", e);
        }
    }
}

fn target_dir(crate_dir: &std::path::Path) -> PathBuf {
    match env::var("CARGO_TARGET_DIR") {
        Ok(target) => PathBuf::from(target),
        Err(_) => crate_dir
            .ancestors()
            .nth(2)
            .unwrap_or(crate_dir)
            .join("target"),
    }
}
