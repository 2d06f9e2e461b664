use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::{cli::{Cli, PackageArgs}, common::zip_dir, ModelError};

/// `<dest>/_<dd_mm_yyyy>/<name>.zip`.
pub fn package_path(dest: &Path, name: &str, date: NaiveDate) -> PathBuf {
    dest.join(format!("_{}", date.format("%d_%m_%Y"))).join(format!("{name}.zip"))
}

pub fn run(cli: &Cli, args: &PackageArgs) -> Result<()> {
    if !args.source.is_dir() {
        return Err(ModelError::config(format!("nothing to package: {} is not a directory", args.source.display())).into());
    }
    let name = match &args.name {
        Some(name) => name.clone(),
        None => args.source.file_name()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .context("cannot derive a package name; pass --name")?,
    };

    let zip_path = package_path(&args.dest, &name, chrono::Local::now().date_naive());
    if cli.verbose > 0 {
        eprintln!("[package] {} -> {}", args.source.display(), zip_path.display());
    }
    let count = zip_dir(&args.source, &zip_path)?;
    println!("Packaged {count} files -> {}", zip_path.display());
    Ok(())
}
