//! Render a mini-notation pattern offline to a WAV file.
//!
//! ```text
//! undertow_render "supersaw(3,8)" --note "c3 e3 g3" --seconds 4 --out groove.wav
//! ```

use clap::Parser;
use std::path::PathBuf;
use undertow::control::sound;
use undertow::render::{render_pattern, write_wav, RenderConfig};

#[derive(Parser)]
#[command(name = "undertow_render", about = "Offline pattern renderer")]
struct Args {
    /// Mini-notation sound pattern, e.g. "sine*4" or "supersaw(3,8)"
    pattern: String,

    /// Note pattern layered onto the sounds, e.g. "c3 e3 g3"
    #[arg(long)]
    note: Option<String>,

    /// Gain pattern, e.g. "0.8" or "1 0.5"
    #[arg(long)]
    gain: Option<String>,

    /// Cycles per second (tempo)
    #[arg(long, default_value_t = 1.0)]
    cps: f64,

    /// How many seconds to render
    #[arg(long, default_value_t = 4.0)]
    seconds: f64,

    /// Output sample rate
    #[arg(long, default_value_t = 44100)]
    sample_rate: u32,

    /// Output path
    #[arg(long, default_value = "undertow.wav")]
    out: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut pattern = sound(&args.pattern)?;
    if let Some(notes) = &args.note {
        pattern = pattern.note(notes)?;
    }
    if let Some(gains) = &args.gain {
        pattern = pattern.gain(gains)?;
    }

    let config = RenderConfig {
        sample_rate: args.sample_rate,
        cps: args.cps,
        seconds: args.seconds,
        ..RenderConfig::default()
    };
    let pcm = render_pattern(&pattern, &config)?;
    write_wav(&args.out, &pcm, args.sample_rate)?;
    tracing::info!(path = %args.out.display(), seconds = args.seconds, "wrote render");
    Ok(())
}
