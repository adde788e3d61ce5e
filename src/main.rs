//! fgpipe - write the output of a frame graph to a file or stdout.

use anyhow::{bail, Context as _};
use clap::Parser;
use framegraph::execution::pipe::clip_info;
use framegraph::prelude::*;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fgpipe", version, about = "Write the output of a frame graph")]
struct Cli {
    /// Graph description (JSON).
    graph: PathBuf,

    /// Output file, or `-` for stdout.
    output: Option<PathBuf>,

    /// First frame to write.
    #[arg(short, long, default_value_t = 0)]
    start: usize,

    /// Last frame to write, inclusive.
    #[arg(short, long)]
    end: Option<usize>,

    /// Frame requests kept in flight (0 = thread count).
    #[arg(short, long, default_value_t = 0)]
    requests: usize,

    /// Write a YUV4MPEG2 stream instead of raw planes.
    #[arg(short, long)]
    y4m: bool,

    /// Print clip information.
    #[arg(long)]
    info: bool,

    /// Print the node graph in Graphviz format.
    #[arg(long = "graph")]
    graph_dot: bool,

    /// Worker threads (overrides the config file).
    #[arg(short, long)]
    threads: Option<usize>,

    /// Report progress on stderr.
    #[arg(short, long)]
    progress: bool,

    /// Core configuration (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// More log output; repeat for more.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_core(cli: &Cli) -> anyhow::Result<Core> {
    let mut config = match &cli.config {
        Some(path) => CoreConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CoreConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config = config.with_threads(threads);
    }
    Core::with_config(config).context("failed to start core")
}

fn progress_tracker(total: usize) -> ProgressTracker {
    ProgressTracker::new(total).with_callback(Box::new(|update| match update {
        ProgressUpdate::Progress { percent, fps, .. } => {
            eprint!("\rProgress: {:5.1}% ({:.2} fps)", percent, fps);
        }
        ProgressUpdate::Completed { frames_written, .. } => {
            eprintln!("\rProgress: {} frames done", frames_written);
        }
        ProgressUpdate::Error { index, message } => {
            eprintln!();
            log::error!("frame {:?} failed: {}", index, message);
        }
        _ => {}
    }))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let core = load_core(&cli)?;
    let description = GraphDescription::from_file(&cli.graph)
        .with_context(|| format!("failed to read graph {}", cli.graph.display()))?;
    let loaded = description
        .build(&core)
        .with_context(|| format!("failed to build graph {}", cli.graph.display()))?;
    let node = loaded.output;
    log::info!(
        "built {} nodes, output '{}' has {} frames",
        loaded.nodes.len(),
        description.output,
        node.num_frames()
    );

    let to_stdout = cli.output.as_deref().is_some_and(|p| p.as_os_str() == "-");
    let mut report: Box<dyn Write> = if to_stdout {
        Box::new(io::stderr())
    } else {
        Box::new(io::stdout())
    };
    if cli.info {
        writeln!(report, "{}", clip_info(node.video_info()))?;
    }
    if cli.graph_dot {
        writeln!(report, "{}", NodeGraph::from_output(&node).to_dot())?;
    }

    let Some(output) = &cli.output else {
        if cli.info || cli.graph_dot {
            return Ok(());
        }
        bail!("no output given; pass a file, `-` for stdout, or --info");
    };

    let options = PipeOptions {
        start: cli.start,
        end: cli.end,
        requests: cli.requests,
        format: if cli.y4m {
            OutputFormat::Y4m
        } else {
            OutputFormat::Raw
        },
    };
    let last = cli.end.unwrap_or(node.num_frames().saturating_sub(1));
    let mut tracker = progress_tracker((last + 1).saturating_sub(cli.start));
    tracker.start();
    let tracker = cli.progress.then_some(&tracker);

    let summary = if to_stdout {
        let stdout = io::stdout();
        let mut out = BufWriter::new(stdout.lock());
        pipe_node(&node, &mut out, &options, tracker)?
    } else {
        let file = File::create(output)
            .with_context(|| format!("failed to create {}", output.display()))?;
        let mut out = BufWriter::new(file);
        pipe_node(&node, &mut out, &options, tracker)?
    };

    let seconds = summary.elapsed.as_secs_f64();
    eprintln!(
        "Output {} frames ({} bytes) in {:.2} seconds ({:.2} fps)",
        summary.frames,
        summary.bytes,
        seconds,
        if seconds > 0.0 {
            summary.frames as f64 / seconds
        } else {
            0.0
        }
    );
    Ok(())
}
