//! Import a PLY file and run a few queries against it.
//!
//! Usage: `cargo run --example import_ply -- scan.ply [settings.json]`
//! Set `RUST_LOG=debug` for chunk-level logging.

use pointstream_core::{SampleCache, Settings};
use pointstream_io::ImportJob;
use pointstream_spatial::{CloudIndex, Frustum, Plane, Ray};
use std::error::Error;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: import_ply <file.ply> [settings.json]");
        std::process::exit(2);
    };
    let settings = match args.next() {
        Some(config) => Settings::from_path(config)?,
        None => Settings::default(),
    };

    let handle = ImportJob::new(&path, &settings)
        .with_progress(|p| println!("{:>5.1}%  {}", p.fraction * 100.0, p.message))
        .spawn();
    let (job, result) = handle.join();
    let cloud = result?;

    let bounds = *cloud.bounding_box();
    println!("{}: {} points", cloud.name(), cloud.len());
    println!("  bounds     {:?} .. {:?}", bounds.min, bounds.max);
    println!("  colors     {}", cloud.has_colors());
    match cloud.intensity_range() {
        Some(range) => println!("  intensity  {} .. {}", range.min, range.max),
        None => println!("  intensity  none"),
    }
    println!("  status     {:?}", job.status());

    let mut previews = SampleCache::new(settings.max_points_sampled);
    println!("  preview    {} points", previews.get_or_compute(&cloud).len());

    let mut index = CloudIndex::new(&settings);
    let center = bounds.center();
    if let Some(hit) = index.nearest(&cloud, center)? {
        println!("nearest to center: #{} at {:?} (d = {:.4})", hit.index, hit.position, hit.distance);
    }

    // Lower half of the box along z.
    let slab = Frustum::new(vec![Plane::new([0.0, 0.0, -1.0], center[2])]);
    println!("points below center: {}", index.visible_points(&cloud, &slab)?.len());

    let ray = Ray::through([bounds.min[0] - 1.0, center[1], center[2]], center);
    if let Some(hit) = index.pick(&cloud, &ray, bounds.extent()[0] * 0.01)? {
        println!("picked #{} at t = {:.4}", hit.index, hit.t);
    }

    let tree = index.octree(&cloud)?;
    println!(
        "octree: {} nodes, {} leaves, depth {}",
        tree.node_count(),
        tree.leaf_count(),
        tree.depth()
    );
    Ok(())
}
