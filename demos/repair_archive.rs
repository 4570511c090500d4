//! Repair every pair in a zip archive using a fixed bottom banner position.
//!
//! Usage:
//! ```sh
//! cargo run --example repair_archive -- pairs.zip repaired.zip
//! ```

use std::env;
use std::fs::File;
use std::io::Cursor;
use std::process;

use watermark_patch_repair::{
    process_batch, DetectorRegistry, FixedRegionDetector, RepairConfig, RepairMode, ZipReader,
    ZipSink,
};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <input.zip> <output.zip>", args[0]);
        process::exit(1);
    }

    let file = File::open(&args[1]).expect("failed to open input archive");
    let mut input = ZipReader::new(file).expect("failed to read input archive");

    let config = RepairConfig::for_mode(RepairMode::BottomBar);
    let detectors = DetectorRegistry::new().with(
        RepairMode::BottomBar,
        Box::new(FixedRegionDetector::new([0.0, 0.8, 1.0, 1.0], 1.0)),
    );
    let progress = |msg: &str| println!("{msg}");

    match process_batch(
        &mut input,
        ZipSink::new(Cursor::new(Vec::new())),
        &config,
        &detectors,
        &progress,
    ) {
        Ok((sink, report)) => {
            let bytes = sink.finish().expect("failed to finish archive").into_inner();
            std::fs::write(&args[2], bytes).expect("failed to write output archive");
            println!("{report}");
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
