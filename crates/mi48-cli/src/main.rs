use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mi48::{ImageFrame, Session, SessionConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mi48", about = "MI48 thermal sensor control and capture")]
struct Cli {
    /// Serial port of the module (default: $MI48_PORT, then USB discovery)
    #[arg(short, long, global = true)]
    port: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the connected module and the known camera types
    Info,
    /// Show the frame rate, or set it
    Fps {
        /// Requested rate in Hz; rounded to the nearest supported divisor
        #[arg(long)]
        set: Option<f64>,
    },
    /// Stream frames to 16-bit grayscale PNG files
    Capture {
        /// Frame rate to configure before streaming
        #[arg(long)]
        fps: Option<f64>,
        /// Number of frames to save
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u64,
        /// Output file; numbered when more than one frame is captured
        #[arg(short, long, default_value = "frame.png")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = SessionConfig::from_env();
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }
    let session = tokio::task::spawn_blocking(move || Session::open(&config))
        .await?
        .context("failed to open MI48 module")?;
    let session = Arc::new(session);

    match cli.command {
        Commands::Info => print_info(&session),
        Commands::Fps { set } => {
            let rate = match set {
                Some(target) => set_frame_rate(&session, target).await?,
                None => blocking(&session, |s| s.get_frame_rate()).await?,
            };
            println!("{rate:.2} Hz");
        }
        Commands::Capture { fps, count, output } => {
            if let Some(target) = fps {
                let actual = set_frame_rate(&session, target).await?;
                tracing::info!(target, actual, "frame rate configured");
            }
            capture(&session, count, &output).await?;
        }
    }

    Ok(())
}

/// Run a session call that does serial I/O on the blocking pool.
async fn blocking<T, F>(session: &Arc<Session>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Session) -> Result<T, mi48::DeviceError> + Send + 'static,
{
    let session = Arc::clone(session);
    Ok(tokio::task::spawn_blocking(move || f(&session)).await??)
}

async fn set_frame_rate(session: &Arc<Session>, target: f64) -> Result<f64> {
    blocking(session, move |s| s.set_frame_rate(target))
        .await
        .with_context(|| format!("cannot set frame rate to {target} Hz"))
}

fn print_info(session: &Session) {
    let identity = session.identity();
    let geometry = session.geometry();
    println!("Model:     {} (type {})", identity.model_name, identity.type_code);
    println!("Sensor:    {}x{}", geometry.width, geometry.height);
    println!("Serial:    {}", identity.serial_info);
    println!("Firmware:  {}", identity.firmware_version);
    if identity.max_frame_rate > 0.0 {
        println!("Max rate:  {:.2} Hz", identity.max_frame_rate);
    } else {
        println!("Max rate:  unknown");
    }

    println!();
    println!("Known camera types:");
    for camera in mi48::catalog::list_cameras() {
        println!(
            "  {:>3}  {:<14} {}x{}",
            camera.type_code, camera.name, camera.width, camera.height
        );
    }
}

async fn capture(session: &Arc<Session>, count: u64, output: &Path) -> Result<()> {
    let mut stream = blocking(session, |s| s.start_stream()).await?;
    let mut saved = 0u64;

    while saved < count {
        let frame = tokio::select! {
            frame = stream.recv() => frame,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        };
        let Some(frame) = frame else { break };

        let path = frame_path(output, saved, count);
        save_png(frame, &path)?;
        println!("{}", path.display());
        saved += 1;
    }

    let exit = tokio::task::spawn_blocking(move || stream.stop()).await?;
    match exit {
        Ok(exit) => tracing::debug!(?exit, "stream stopped"),
        Err(e) if saved < count => return Err(e).context("stream ended early"),
        Err(e) => tracing::warn!(error = %e, "stream stopped with error"),
    }
    Ok(())
}

fn save_png(frame: ImageFrame, path: &Path) -> Result<()> {
    let (width, height) = (frame.width(), frame.height());
    let buffer = image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_raw(
        width,
        height,
        frame.into_pixels(),
    )
    .context("pixel buffer does not match frame size")?;
    buffer
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// `frame.png` stays as is for a single frame, becomes `frame_0003.png` otherwise.
fn frame_path(output: &Path, index: u64, count: u64) -> PathBuf {
    if count <= 1 {
        return output.to_path_buf();
    }
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string());
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string());
    output.with_file_name(format!("{stem}_{index:04}.{ext}"))
}
