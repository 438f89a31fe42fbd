//! SPLV CLI - Inspect, concatenate and split sparse voxel video files.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use splv::{EncodingParams, tools};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("info") if args.len() == 3 => info(&args[2]),
        Some("concat") if args.len() >= 4 => {
            let inputs: Vec<PathBuf> = args[3..].iter().map(PathBuf::from).collect();
            concat(&args[2], &inputs);
        }
        Some("split") if args.len() == 5 => {
            let seconds: f32 = args[3].parse().unwrap_or_else(|e| {
                eprintln!("Invalid split length '{}': {}", args[3], e);
                process::exit(1);
            });
            split(&args[2], seconds, &args[4]);
        }
        Some("params") if args.len() == 3 => {
            if args[2] == "--example" {
                print_example_params();
            } else {
                check_params(&args[2]);
            }
        }
        _ => {
            print_usage(&args[0]);
            process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <command> [args]", program);
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  info <file.splv>                      Print a JSON summary of a file");
    eprintln!("  concat <out.splv> <in.splv>...        Join files with matching dimensions");
    eprintln!("  split <in.splv> <seconds> <out_dir>   Cut a file into fixed-length segments");
    eprintln!("  params <params.json>                  Validate an encoding params file");
    eprintln!("  params --example                      Print example encoding params");
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("Error {}: {}", context, err);
    process::exit(1);
}

fn info(path: &str) {
    let info = tools::inspect(path).unwrap_or_else(|e| fail("reading file", e));
    let json = serde_json::to_string_pretty(&info).unwrap_or_else(|e| fail("formatting info", e));
    println!("{}", json);
}

fn concat(output: &str, inputs: &[PathBuf]) {
    let start = Instant::now();
    let frames = tools::concat(inputs, output).unwrap_or_else(|e| fail("concatenating", e));
    println!(
        "Wrote {} frames from {} files to {} in {:.2}s",
        frames,
        inputs.len(),
        output,
        start.elapsed().as_secs_f32()
    );
}

fn split(input: &str, seconds: f32, out_dir: &str) {
    let start = Instant::now();
    let paths = tools::split(input, seconds, out_dir).unwrap_or_else(|e| fail("splitting", e));
    for path in &paths {
        println!("  {}", path.display());
    }
    println!(
        "Wrote {} segments in {:.2}s",
        paths.len(),
        start.elapsed().as_secs_f32()
    );
}

fn check_params(path: &str) {
    let text = fs::read_to_string(path).unwrap_or_else(|e| fail("reading params file", e));
    let params = EncodingParams::from_json_str(&text).unwrap_or_else(|e| fail("parsing params", e));
    println!("Params OK:");
    println!("  GOP size: {}", params.gop_size);
    println!("  Max brick group size: {}", params.max_brick_group_size);
    println!("  Motion vectors: {}", params.motion_vectors);
}

fn print_example_params() {
    let params = EncodingParams::default();
    match serde_json::to_string_pretty(&params) {
        Ok(json) => println!("{}", json),
        Err(e) => fail("formatting params", e),
    }
}
