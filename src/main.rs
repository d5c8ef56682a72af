use std::{env, path::PathBuf, process};

use gltfscene::{
    FileResolver, ImportOptions, SourceDocument, import::summarize, import_gltf,
    write_import_summary,
};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if !(2..=3).contains(&args.len()) {
        eprintln!("Usage: gltfscene <input.gltf|input.glb> [summary.json]");
        process::exit(2);
    }

    let input = PathBuf::from(&args[1]);
    let base_dir = input.parent().map(PathBuf::from).unwrap_or_default();
    let document = SourceDocument::from_path(&input)?;
    let report = import_gltf(&document, &FileResolver::new(base_dir), &ImportOptions::default())?;
    let summary = summarize(&report);

    println!("Generator: {}", report.scene.metadata.generator);
    println!(
        "Nodes: {}, Meshes: {}, Materials: {}",
        summary.node_count(),
        summary.mesh_count(),
        summary.material_count()
    );
    println!(
        "Skeletons: {}, Animation tracks: {}",
        summary.skeleton_count(),
        summary.track_count()
    );
    println!("Issues: {}", summary.issue_count());
    for issue in &report.issues {
        println!("  [{:?}] {}: {}", issue.severity, issue.code, issue.message);
    }

    if let Some(path) = args.get(2) {
        write_import_summary(&PathBuf::from(path), &report)?;
        println!("Summary written to {path}");
    }

    Ok(())
}
