use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use plotterkit::communication::{list_ports, SendControl};
use plotterkit::core::{EventCategory, EventFilter, StreamEvent};
use plotterkit::designer::{
    default_palette, ColorClassifier, DrawingPipeline, GlyphMap, MotionProgram,
    PixelSample, TextLayout,
};
use plotterkit::queue::{Job, JobKind};
use plotterkit::settings::{default_config_path, Config};
use plotterkit::{
    classifier_thresholds, init_logging, pipeline_config, recovery_plan, DrawingSource, Session,
};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

/// Command-line arguments for plotterkit
#[derive(Parser, Debug)]
#[command(name = "plotterkit")]
#[command(about = "Drawing job execution engine for pen plotters")]
#[command(version)]
struct Args {
    /// Configuration file (.toml or .json)
    #[arg(short, long, env = "PLOTTERKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port, overriding the configuration
    #[arg(short, long, env = "PLOTTERKIT_PORT")]
    port: Option<String>,

    /// Use an in-memory plotter instead of serial ports
    #[arg(long)]
    simulate: bool,

    /// Log as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports that look like plotters
    Ports,
    /// Stream a G-code file to the plotter
    Send {
        /// Program file
        file: PathBuf,
    },
    /// Send one line and print the device's response
    Command {
        /// The line to send
        line: String,
    },
    /// Convert traced outlines or canvas strokes into a program
    Trace {
        /// JSON drawing source: {"width", "height", "paths": [[{"x","y"}, ...]]}
        source: PathBuf,
        /// Source image; splits the drawing into colour layers
        #[arg(long)]
        image: Option<PathBuf>,
        /// Longer side of the colour sample, in pixels
        #[arg(long, default_value = "400")]
        sample_size: u32,
        /// Write the program to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Add the program to the job queue
        #[arg(long)]
        enqueue: bool,
    },
    /// Lay out text with a stroke font and convert it into a program
    Text {
        /// Text to draw; "\n" starts a new line
        text: String,
        /// JSON glyph map (character -> strokes and advance)
        #[arg(long)]
        font: PathBuf,
        /// Em size in millimetres
        #[arg(long, default_value = "10")]
        size: f64,
        /// Write the program to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Add the program to the job queue
        #[arg(long)]
        enqueue: bool,
    },
    /// Manage the job queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Raise the pen and return to the origin after a failed job
    Recover,
    /// Show where the last failed job stopped
    Position,
}

#[derive(Subcommand, Debug)]
enum QueueAction {
    /// List jobs
    List,
    /// Show counts by status
    Status,
    /// Add a G-code file as a job
    Add {
        /// Program file
        file: PathBuf,
        /// Job kind (image, text, drawing)
        #[arg(long, default_value = "drawing")]
        kind: JobKind,
        /// Display name; defaults to the file name
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove a job
    Remove {
        /// Job id
        id: Uuid,
    },
    /// Move a pending job
    Reorder {
        /// Current position
        from: usize,
        /// New position
        to: usize,
    },
    /// Put a failed job back in line
    Retry {
        /// Job id
        id: Uuid,
    },
    /// Remove every job
    Clear,
    /// Process pending jobs
    Run {
        /// Keep going until no pending job is left
        #[arg(long)]
        all: bool,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path().context("Failed to locate the configuration")?,
    };
    let mut config = Config::load_or_default(&path)
        .with_context(|| format!("Failed to load configuration {}", path.display()))?;
    if let Some(port) = &args.port {
        config.connection.port = port.clone();
    }
    Ok(config)
}

fn cancel_on_ctrl_c(control: &SendControl) {
    let control = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            control.cancel();
        }
    });
}

fn print_stream_events(mut events: broadcast::Receiver<StreamEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StreamEvent::Progress {
                    current,
                    total,
                    line,
                    ..
                }) => println!("[{}/{}] {}", current, total, line),
                Ok(StreamEvent::Log { .. }) => {}
                Ok(event) => println!("{}", event.description()),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn print_program_summary(program: &MotionProgram) {
    let stats = &program.stats;
    println!(
        "{} paths, {} lines, draw {:.1} mm, travel {:.1} mm, about {}",
        stats.path_count,
        stats.line_count,
        stats.drawing_distance,
        stats.move_distance,
        stats.estimate_display()
    );
}

fn print_job(index: usize, job: &Job) {
    println!(
        "{:>3}  {}  {:<10}  {:<8}  {:>5.1}%  {}{}",
        index,
        job.id,
        job.status.to_string(),
        job.kind.to_string(),
        job.percent(),
        job.name,
        job.error
            .as_ref()
            .map(|e| format!("  ({})", e))
            .unwrap_or_default()
    );
}

fn finish_program(
    session: Option<&Session>,
    program: MotionProgram,
    kind: JobKind,
    name: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    print_program_summary(&program);
    if let Some(output) = output {
        std::fs::write(&output, program.to_gcode())
            .with_context(|| format!("Failed to write {}", output.display()))?;
        println!("Wrote {}", output.display());
    }
    if let Some(session) = session {
        let job = session.queue.enqueue(kind, name, program);
        println!("Enqueued job {}", job.id);
    }
    Ok(())
}

fn file_name(path: &std::path::Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

async fn run_queue(session: &Session, all: bool) -> Result<()> {
    session
        .bus
        .subscribe(EventFilter::Categories(vec![EventCategory::Queue]), |event| {
            info!("{}", event.description())
        });
    print_stream_events(session.link.subscribe());

    if session.queue.summary().pending == 0 {
        println!("No pending jobs");
        return Ok(());
    }
    let finished = session.run_queue(all, tokio::signal::ctrl_c()).await?;
    for job in &finished {
        match &job.error {
            None => println!("Job {} completed", job.id),
            Some(error) => println!("Job {} failed: {}", job.id, error),
        }
    }
    Ok(())
}

fn print_recovery_point(session: &Session) {
    match session.queue.last_failure_point() {
        Some((job_id, _)) => println!("Last failed job: {}", job_id),
        None => println!("No failed job recorded; showing the link position"),
    }
    let point = session.recovery_point();
    println!("X {:.3}  Y {:.3}  Z {:.3}", point.x, point.y, point.z);
    match point.last_successful_line {
        Some(line) => println!("Last acknowledged line: {}", line + 1),
        None => println!("No line was acknowledged"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs)?;
    let config = load_config(&args)?;

    match args.command {
        Command::Ports => {
            let ports = list_ports()?;
            if ports.is_empty() {
                println!("No plotter ports found");
            }
            for port in ports {
                println!("{:<24} {}", port.port_name, port.description);
            }
        }
        Command::Send { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let session = Session::new(&config, args.simulate)?;
            let lines: Vec<&str> = text.lines().collect();

            let control = SendControl::new();
            cancel_on_ctrl_c(&control);
            print_stream_events(session.link.subscribe());
            let summary = session.link.send_program(&lines, control).await?;
            println!(
                "Sent {} lines in {:.1}s",
                summary.total_lines,
                summary.elapsed.as_secs_f64()
            );
        }
        Command::Command { line } => {
            let session = Session::new(&config, args.simulate)?;
            for response in session.link.send_command(&line).await? {
                println!("{}", response);
            }
        }
        Command::Trace {
            source,
            image,
            sample_size,
            output,
            enqueue,
        } => {
            let drawing = DrawingSource::load(&source)?;
            let pipeline = DrawingPipeline::new(pipeline_config(&config));
            let name = file_name(&source);

            let (program, kind) = match image {
                Some(image_path) => {
                    let image = image::open(&image_path)
                        .with_context(|| format!("Failed to open {}", image_path.display()))?;
                    let sample = PixelSample::from_image(&image, sample_size);
                    let classifier =
                        ColorClassifier::new(default_palette(), classifier_thresholds(&config))?;
                    let (program, layers) = pipeline.layered_program(
                        &drawing.paths,
                        drawing.width,
                        drawing.height,
                        &sample,
                        &classifier,
                    )?;
                    for layer in &layers {
                        println!(
                            "Layer {:<6} {:>4} paths {:>8} pixels",
                            layer.color_name,
                            layer.paths.len(),
                            layer.pixel_count
                        );
                    }
                    (program, JobKind::Image)
                }
                None => (
                    pipeline.trace_program(&drawing.paths, drawing.width, drawing.height)?,
                    JobKind::Drawing,
                ),
            };

            let session = if enqueue {
                Some(Session::new(&config, args.simulate)?)
            } else {
                None
            };
            finish_program(session.as_ref(), program, kind, &name, output)?;
        }
        Command::Text {
            text,
            font,
            size,
            output,
            enqueue,
        } => {
            let json = std::fs::read_to_string(&font)
                .with_context(|| format!("Failed to read {}", font.display()))?;
            let glyphs = GlyphMap::from_json(&json)?;
            let layout = TextLayout {
                size_mm: size,
                ..TextLayout::default()
            };
            let text = text.replace("\\n", "\n");
            let program = DrawingPipeline::new(pipeline_config(&config))
                .text_program(&text, &glyphs, &layout)?;

            let session = if enqueue {
                Some(Session::new(&config, args.simulate)?)
            } else {
                None
            };
            let name: String = text.lines().next().unwrap_or_default().chars().take(24).collect();
            finish_program(session.as_ref(), program, JobKind::Text, &name, output)?;
        }
        Command::Queue { action } => {
            let session = Session::new(&config, args.simulate)?;
            let queue = &session.queue;
            match action {
                QueueAction::List => {
                    for (index, job) in queue.list().iter().enumerate() {
                        print_job(index, job);
                    }
                }
                QueueAction::Status => {
                    let s = queue.summary();
                    println!(
                        "total {}  pending {}  processing {}  completed {}  failed {}",
                        s.total, s.pending, s.processing, s.completed, s.failed
                    );
                }
                QueueAction::Add { file, kind, name } => {
                    let text = std::fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    let program = MotionProgram::from_text(
                        &text,
                        config.plotter.pen_up_z,
                        config.plotter.pen_down_z,
                    );
                    if program.stats.line_count == 0 {
                        bail!("{} contains no program lines", file.display());
                    }
                    let name = name.unwrap_or_else(|| file_name(&file));
                    let job = queue.enqueue(kind, name, program);
                    println!("Enqueued job {}", job.id);
                }
                QueueAction::Remove { id } => {
                    let job = queue.remove(id)?;
                    println!("Removed {}", job.name);
                }
                QueueAction::Reorder { from, to } => queue.reorder(from, to)?,
                QueueAction::Retry { id } => queue.retry(id)?,
                QueueAction::Clear => {
                    let n = queue.clear()?;
                    println!("Removed {} jobs", n);
                }
                QueueAction::Run { all } => run_queue(&session, all).await?,
            }
        }
        Command::Recover => {
            let session = Session::new(&config, args.simulate)?;
            print_recovery_point(&session);
            print_stream_events(session.link.subscribe());
            session.recover(&recovery_plan(&config)).await?;
            println!("Plotter returned to the origin");
        }
        Command::Position => {
            let session = Session::new(&config, args.simulate)?;
            print_recovery_point(&session);
        }
    }

    Ok(())
}
