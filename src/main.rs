//! Vcap CLI - Capture a JSON scene into a Vcap archive.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use vcap::{
    capture::{CaptureProgress, VcapExporter},
    world::Scene,
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--example" {
        print_example_scene();
        return;
    }

    if args.len() < 3 {
        eprintln!("Usage: {} <scene.json> <output.vcap>", args[0]);
        eprintln!();
        eprintln!("Capture a scene and its timed edits into a Vcap archive.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  scene.json   Path to the scene description");
        eprintln!("  output.vcap  Archive to write");
        eprintln!();
        eprintln!("An example scene is printed with the --example flag.");
        std::process::exit(1);
    }

    let scene_path = PathBuf::from(&args[1]);
    let output_path = PathBuf::from(&args[2]);

    let scene_str = fs::read_to_string(&scene_path).unwrap_or_else(|e| {
        eprintln!("Error reading scene file: {}", e);
        std::process::exit(1);
    });

    let scene: Scene = serde_json::from_str(&scene_str).unwrap_or_else(|e| {
        eprintln!("Error parsing scene: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = run(&scene, &output_path) {
        eprintln!("Capture failed: {}", e);
        std::process::exit(1);
    }
}

fn run(scene: &Scene, output_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let bounds = &scene.settings.bounds;
    println!("Vcap Capture");
    println!("============");
    println!(
        "Chunks: [{}, {}] to [{}, {}) ({} chunks)",
        bounds.min_chunk.x,
        bounds.min_chunk.z,
        bounds.max_chunk.x,
        bounds.max_chunk.z,
        bounds.chunk_count()
    );
    println!("Sections: {:?}", bounds.sections);
    println!("Fluids: {:?}", scene.settings.fluid_mode);
    println!("Edits: {}", scene.edits.len());
    println!();

    let built = scene.build()?;
    let mut exporter = VcapExporter::new(built.world.clone(), built.models.clone(), scene.settings.clone())?;

    let start = Instant::now();
    let report: &(dyn Fn(CaptureProgress) + Sync) = &|p: CaptureProgress| {
        if p.captured % (p.total / 10).max(1) == 0 || p.captured == p.total {
            println!("  Chunk {}/{} [{}, {}]", p.captured, p.total, p.chunk.x, p.chunk.z);
        }
    };
    println!("Capturing intracoded frame...");
    exporter.capture_i_frame(Some(report))?;
    println!(
        "  {} meshes after {:.2}s",
        exporter.context().model_count(),
        start.elapsed().as_secs_f32()
    );

    exporter.listen(&built.events);
    for (i, edit) in scene.edits.iter().enumerate() {
        built.apply(edit)?;
        let batch_done = scene.edits.get(i + 1).is_none_or(|next| next.time != edit.time);
        if batch_done {
            exporter.tick_at(edit.time)?;
        }
    }
    println!("Captured {} frames", exporter.frames().len());
    println!();

    let stats = exporter.save_to_path(output_path)?;
    print!("{}", stats);
    println!();
    println!(
        "Wrote {} in {:.2}s",
        output_path.display(),
        start.elapsed().as_secs_f32()
    );
    Ok(())
}

fn print_example_scene() {
    match serde_json::to_string_pretty(&Scene::example()) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing example scene: {}", e),
    }
}
