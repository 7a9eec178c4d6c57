use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Library names of all workspace crates, found as siblings of this crate.
fn workspace_crates() -> io::Result<Vec<String>> {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").map_err(io::Error::other)?);
    let root = manifest_dir.parent().unwrap_or(&manifest_dir);

    let mut names = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let is_crate = entry.path().join("Cargo.toml").is_file();
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_crate && name.starts_with("courier") {
            names.push(name.replace('-', "_"));
        }
    }

    names.sort();
    Ok(names)
}

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed=build.rs");

    let names = workspace_crates()?;
    let list = names
        .iter()
        .map(|name| format!("{name:?}"))
        .collect::<Vec<_>>()
        .join(", ");

    let out_dir = PathBuf::from(env::var("OUT_DIR").map_err(io::Error::other)?);
    fs::write(
        out_dir.join("crate_names.gen.rs"),
        format!("const CRATE_NAMES: &[&str] = &[{list}];\n"),
    )
}
