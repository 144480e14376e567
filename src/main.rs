// src/main.rs

use anyhow::Result;
use crossover_detection::frame_source::{spawn_paced_producer, DirectoryFrameSource};
use crossover_detection::pipeline::{
    CrossoverPipeline, EventBus, EventSink, JsonlSink, LogSink,
};
use crossover_detection::types::Config;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let config_found = config_path.exists();
    let config = if config_found {
        Config::load(&config_path)?
    } else {
        Config::default()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("crossover_detection={}", config.logging.level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("📈 Chart Crossover Detection Starting");
    if config_found {
        info!("✓ Configuration loaded from {}", config_path.display());
    } else {
        warn!(
            "Config {} not found, using defaults",
            config_path.display()
        );
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!("Config: {}", problem);
        }
        return Ok(());
    }

    info!(
        "Detection thresholds: confidence≥{:.2}, angle≥{:.1}°, tolerance={:.1}px, cooldown={:.0}ms, staleness={:.0}ms",
        config.detection.confidence_min,
        config.detection.angle_threshold_deg,
        config.detection.intersection_tolerance_px,
        config.detection.debounce_cooldown_ms,
        config.detection.staleness_ms
    );

    let mut pipeline = match CrossoverPipeline::new(&config) {
        Ok(p) => p,
        Err(e) => {
            error!("{}", e);
            return Ok(());
        }
    };

    let source = DirectoryFrameSource::open(
        &config.capture.input_dir,
        config.capture.fps,
        config.capture.region,
    )?;
    if source.is_empty() {
        error!("No frame images found in {}", config.capture.input_dir);
        return Ok(());
    }

    let mut sinks: Vec<Box<dyn EventSink + Send>> = vec![Box::new(LogSink)];
    if config.output.jsonl {
        sinks.push(Box::new(JsonlSink::create(&config.output.dir)?));
    }
    let mut recent = EventBus::new(config.output.event_bus_capacity);

    let (mut frames, producer) = spawn_paced_producer(source, config.capture.fps);
    info!("✓ Capturing at {:.1} FPS", config.capture.fps);

    loop {
        tokio::select! {
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }

        let Some(frame) = frames.borrow_and_update().clone() else {
            continue;
        };

        match pipeline.process_frame(&frame) {
            Ok(Some(event)) => {
                pipeline.dispatch(&event, &mut sinks);
                recent.publish(event);
            }
            Ok(None) => {}
            // already logged and counted; the next frame starts clean
            Err(_) => continue,
        }

        if (frame.frame_id + 1) % 50 == 0 {
            let summary = pipeline.metrics().summary();
            info!(
                "Progress: frame {} | dropped {} | candidates {} | emitted {} | suppressed {}",
                frame.frame_id,
                summary.frames_dropped,
                summary.candidates,
                summary.events_emitted,
                summary.events_suppressed
            );
        }
    }

    producer.abort();
    match producer.await {
        Ok(Ok(published)) => info!("Producer published {} frames", published),
        Ok(Err(e)) => warn!("Frame producer failed: {:#}", e),
        Err(e) if e.is_cancelled() => {}
        Err(e) => warn!("Frame producer task failed: {}", e),
    }

    let summary = pipeline.metrics().summary();
    info!("\n╔════════════════════════════════════════════════╗");
    info!("║             DETECTION SUMMARY                  ║");
    info!("╚════════════════════════════════════════════════╝");
    info!("  Frames processed:    {}", summary.total_frames);
    info!("  Frames dropped:      {}", summary.frames_dropped);
    info!("  Invalid frames:      {}", summary.input_errors);
    info!("  Candidates:          {}", summary.candidates);
    info!("  Crossovers emitted:  {}", summary.events_emitted);
    info!("  Duplicates held:     {}", summary.events_suppressed);
    info!("  Sink failures:       {}", summary.sink_failures);
    if summary.crossovers.total > 0 {
        info!(
            "  Avg angle:           {:.1}°",
            summary.crossovers.avg_angle_deg
        );
        info!(
            "  Avg confidence:      {:.2}",
            summary.crossovers.avg_combined_confidence
        );
    }

    for event in recent.drain() {
        info!(
            "  • {} × {} at ({:.0}, {:.0}) t={:.1}s",
            event.line_a,
            event.line_b,
            event.point.x,
            event.point.y,
            event.timestamp_ms / 1000.0
        );
    }

    info!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
