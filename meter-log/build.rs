use std::env;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Lists the workspace crates as they appear in module paths.
fn list_crates() -> io::Result<Vec<String>> {
    let mut crates = Vec::new();

    for entry in fs::read_dir("../")? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        if let Some(name) = entry.file_name().to_str() {
            if name == "meter" || name.starts_with("meter-") {
                crates.push(name.replace('-', "_"));
            }
        }
    }

    crates.sort();
    Ok(crates)
}

fn main() -> io::Result<()> {
    let out_dir = env::var("OUT_DIR").map_err(io::Error::other)?;
    let mut f = File::create(Path::new(&out_dir).join("constants.gen.rs"))?;

    write!(f, "const CRATE_NAMES: &[&str] = &[")?;
    for name in list_crates()? {
        write!(f, "\"{name}\",")?;
    }
    writeln!(f, "];")?;

    println!("cargo:rerun-if-changed=../");
    Ok(())
}
