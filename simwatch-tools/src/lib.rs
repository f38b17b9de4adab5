//! Option handling and logging setup shared by the simwatch tools.

use getopts::Options;
use simwatch::config::PipelineConfig;
use std::fs::File;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Options understood by every tool.
pub fn common_opts() -> Options {
    let mut opts = Options::new();
    opts.optopt(
        "c",
        "config",
        "pipeline configuration file (YAML)",
        "file",
    );
    opts.optopt("l", "log", "write log output to this file", "file");
    opts.optflag("v", "verbose", "debug logging");
    opts.optflag("h", "help", "show help");
    opts
}

/// Parses `args` (program name included) against `opts`.
pub fn parse_opts(opts: &Options, args: &[String]) -> Result<getopts::Matches, String> {
    opts.parse(args.get(1..).unwrap_or_default())
        .map_err(|f| f.to_string())
}

/// Loads the configuration named by `-c`, or the defaults.
pub fn load_config(matches: &getopts::Matches) -> Result<PipelineConfig, String> {
    match matches.opt_str("c") {
        Some(path) => PipelineConfig::from_yaml_file(&path)
            .map_err(|e| format!("failed to load '{}': {}", path, e)),
        None => Ok(PipelineConfig::default()),
    }
}

/// Installs the tracing subscriber. `RUST_LOG` wins over `-v`. With a log
/// file, nothing is written to the terminal.
pub fn init_logging(matches: &getopts::Matches, default_to_stderr: bool) -> Result<(), String> {
    let default_level = if matches.opt_present("v") {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match matches.opt_str("l") {
        Some(path) => {
            let file = File::create(&path).map_err(|e| format!("cannot open '{}': {}", path, e))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| e.to_string())
        }
        None if default_to_stderr => builder
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| e.to_string()),
        None => builder
            .with_writer(std::io::sink)
            .try_init()
            .map_err(|e| e.to_string()),
    }
}

/// Eight-level sparkline of `values`, resampled to at most `width` cells.
pub fn sparkline<'a, I>(values: I, width: usize) -> String
where
    I: IntoIterator<Item = &'a f32>,
{
    const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let values: Vec<f32> = values.into_iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() || width == 0 {
        return String::new();
    }
    let step = values.len().div_ceil(width);
    let cells: Vec<f32> = values
        .chunks(step)
        .map(|c| c.iter().sum::<f32>() / c.len() as f32)
        .collect();
    let lo = cells.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = cells.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let span = hi - lo;
    cells
        .iter()
        .map(|v| {
            if span <= f32::EPSILON {
                BARS[3]
            } else {
                let idx = ((v - lo) / span * 7.0).round() as usize;
                BARS[idx.min(7)]
            }
        })
        .collect()
}
