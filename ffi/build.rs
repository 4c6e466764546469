use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=src/types.rs");

    let crate_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let include_dir = PathBuf::from(&crate_dir).join("include");
    if let Err(err) = std::fs::create_dir_all(&include_dir) {
        println!("cargo:warning=cannot create {}: {err}", include_dir.display());
        return;
    }

    let generated = cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("REQCHAIN_H")
        .with_documentation(true)
        .generate();
    match generated {
        Ok(bindings) => {
            bindings.write_to_file(include_dir.join("reqchain.h"));
        }
        // A header that fails to generate must not break the library build.
        Err(err) => println!("cargo:warning=failed to generate reqchain.h: {err}"),
    }
}
