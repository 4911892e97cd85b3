//! Path tracer viewer - progressive GPU path tracing in a window.

use std::env;

use pathtracer::viewer::{self, Options};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_DATE: &str = env!("PATHTRACER_BUILD_DATE");

fn main() {
    let args: Vec<String> = env::args().collect();
    let prog = args.first().map(String::as_str).unwrap_or("pathtracer");

    let options = match parse_args(args.get(1..).unwrap_or(&[])) {
        Ok(Some(options)) => options,
        Ok(None) => return,
        Err(msg) => {
            eprintln!("{msg}");
            print_usage(prog);
            std::process::exit(1);
        }
    };

    if let Err(e) = viewer::run(options) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Parse flags. `Ok(None)` means the request was answered (help/version).
fn parse_args(args: &[String]) -> Result<Option<Options>, String> {
    let mut options = Options::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-v" | "--verbose" => options.log_filter = Some("debug"),
            "-vv" | "--trace" => options.log_filter = Some("trace"),
            "-q" | "--quiet" => options.log_filter = Some("error"),
            "--no-ssaa" => options.ssaa = Some(false),
            "--ssaa" => options.ssaa = Some(true),
            "--bounces" => {
                let value = iter.next().ok_or("--bounces needs a value")?;
                let n = value
                    .parse::<u32>()
                    .map_err(|_| format!("invalid bounce count: {value}"))?;
                options.max_bounces = Some(n);
            }
            "--size" => {
                let value = iter.next().ok_or("--size needs a value")?;
                let px = value
                    .parse::<f32>()
                    .ok()
                    .filter(|px| *px >= 64.0)
                    .ok_or_else(|| format!("invalid window size: {value}"))?;
                options.size = Some(px);
            }
            "-h" | "--help" => {
                print_usage(env!("CARGO_PKG_NAME"));
                return Ok(None);
            }
            "-V" | "--version" => {
                println!("pathtracer {VERSION} (built {BUILD_DATE})");
                return Ok(None);
            }
            other => return Err(format!("Unknown option: {other}")),
        }
    }
    Ok(Some(options))
}

fn print_usage(prog: &str) {
    println!("Path tracer - interactive progressive path tracing viewer");
    println!();
    println!("Usage: {} [options]", prog);
    println!();
    println!("Options:");
    println!("  --bounces <n>  Maximum path length (1-32, default 10)");
    println!("  --size <px>    Window size (default 720)");
    println!("  --no-ssaa      Disable 2x2 supersampling");
    println!("  --ssaa         Enable 2x2 supersampling");
    println!("  -v, --verbose  Debug output");
    println!("  -vv, --trace   Trace output (very verbose)");
    println!("  -q, --quiet    Errors only");
    println!("  -h, --help     Show this help");
    println!("  -V, --version  Show version");
    println!();
    println!("Controls:");
    println!("  drag           Orbit the camera");
    println!("  wheel          Zoom");
    println!("  Space          Run/stop sampling");
    println!("  R              Restart accumulation");
    println!("  Esc            Quit");
    println!();
    println!("Set PATHTRACER_TRACE=1 to write a chrome trace to trace.json.");
}
