use anyhow::Result;
use clap::Parser;
use lectern::Config;
use tracing::info;

#[derive(Parser)]
#[command(name = "lectern", about = "Presence-triggered lecture capture core")]
struct Cli {
    /// Configuration file (without extension), e.g. config/lectern
    #[arg(short, long, default_value = "config/lectern")]
    config: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("lectern v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!(
        "Capture: {}ms sampling, {}s confirmation, {}s silence stop",
        cfg.capture.sample_period_ms, cfg.capture.confirm_window_secs, cfg.capture.silence_window_secs
    );
    info!("Recordings directory: {:?}", cfg.capture.recordings_path);
    info!(
        "Pipeline: {} workers, {} attempts per stage",
        cfg.pipeline.workers, cfg.pipeline.max_attempts
    );

    if cfg.rooms.is_empty() {
        info!("No rooms configured; add [[rooms]] entries to begin monitoring");
    }
    for room in &cfg.rooms {
        info!(
            "Room {}: {} / {} (confirm {}s, silence {}s)",
            room.id,
            room.faculty,
            room.subject,
            room.confirm_window_ms(&cfg.capture) / 1000,
            room.silence_window_ms(&cfg.capture) / 1000
        );
    }

    info!("Detector, transcription, and summarization capabilities are supplied by the embedding application; see lectern::App::start");

    Ok(())
}
