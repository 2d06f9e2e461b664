use std::path::{Path, PathBuf};

use anyhow::Result;
use geoverlay::Crs;

use crate::{
    cli::{Cli, StatusArgs},
    common::require_dir_exists,
    pipeline::{CheckpointState, Manifest, Stage, Workspace},
};

/// Workspaces below `root`: the root itself, or one per AOI subdirectory.
fn workspaces(root: &Path) -> Result<Vec<PathBuf>> {
    if root.join(Workspace::MANIFEST).is_file() { return Ok(vec![root.to_path_buf()]) }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.join(Workspace::MANIFEST).is_file())
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// One line per stage: recorded time and artifact integrity.
pub fn describe(ws: &Workspace, manifest: &Manifest) -> Vec<String> {
    Stage::ALL.iter()
        .map(|&stage| match (manifest.get(stage), manifest.verify_artifacts(ws, stage)) {
            (Some(record), CheckpointState::Fresh) =>
                format!("{stage:<16} done     {} ({} files)", record.completed, record.files.len()),
            (Some(record), CheckpointState::Stale(why)) =>
                format!("{stage:<16} damaged  {} ({why})", record.completed),
            _ => format!("{stage:<16} pending"),
        })
        .collect()
}

pub fn run(cli: &Cli, args: &StatusArgs) -> Result<()> {
    require_dir_exists(&args.workspace)?;
    let roots = workspaces(&args.workspace)?;
    if roots.is_empty() {
        println!("{}: no checkpoints", args.workspace.display());
        return Ok(());
    }

    for root in roots {
        let ws = Workspace::open(&root, Crs::default())?;
        let manifest = Manifest::load(&ws)?;
        println!("{}", root.display());
        for line in describe(&ws, &manifest) {
            println!("  {line}");
        }
        if cli.verbose > 0 {
            for (stage, record) in manifest.stages() {
                for (file, hash) in &record.files {
                    println!("  {stage}: {file} sha256={}", hash.sha256);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_pending_done_and_damaged_stages() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path(), Crs::default()).unwrap();
        ws.write("supply.geojson", b"{}").unwrap();
        ws.write("protected.geojson", b"{}").unwrap();

        let mut manifest = Manifest::load(&ws).unwrap();
        manifest.record(&ws, Stage::Supply, "a", &["supply.geojson"]).unwrap();
        manifest.record(&ws, Stage::Protected, "b", &["protected.geojson"]).unwrap();
        ws.write("protected.geojson", b"{\"x\": 1}").unwrap();

        let lines = describe(&ws, &manifest);
        assert_eq!(lines.len(), Stage::COUNT);
        assert!(lines[0].starts_with("supply") && lines[0].contains("done"));
        assert!(lines[1].contains("damaged"));
        assert!(lines[2].contains("pending"));
    }

    #[test]
    fn finds_per_aoi_workspaces() {
        let dir = tempfile::tempdir().unwrap();
        for aoi in ["KY", "TN"] {
            let ws = Workspace::open(&dir.path().join(aoi), Crs::default()).unwrap();
            Manifest::load(&ws).unwrap().save(&ws).unwrap();
        }
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        let found = workspaces(dir.path()).unwrap();
        assert_eq!(found, vec![dir.path().join("KY"), dir.path().join("TN")]);
    }
}
