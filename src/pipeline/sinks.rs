// src/pipeline/sinks.rs
//
// Sinks shipped with the binary: a tracing log line per crossover and an
// append-only JSONL results file.

use super::event_bus::EventSink;
use crate::types::CrossoverEvent;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct LogSink;

impl EventSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&mut self, event: &CrossoverEvent) -> Result<()> {
        info!(
            "🔀 CROSSOVER: {} × {} at ({:.1}, {:.1}) angle={:.1}° conf={:.2}/{:.2} (combined {:.2}) t={:.0}ms",
            event.line_a,
            event.line_b,
            event.point.x,
            event.point.y,
            event.angle_deg,
            event.confidence_a,
            event.confidence_b,
            event.combined_confidence(),
            event.timestamp_ms
        );
        Ok(())
    }
}

/// One JSON object per line, flushed per event.
#[derive(Debug, Serialize)]
struct CrossoverRecord<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    detected_at: String,
    combined_confidence: f32,
    #[serde(flatten)]
    event: &'a CrossoverEvent,
}

pub struct JsonlSink {
    path: PathBuf,
    file: File,
    written: u64,
}

impl JsonlSink {
    /// Create `<dir>/crossovers_<timestamp>.jsonl`.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output dir {}", dir.display()))?;
        let path = dir.join(format!(
            "crossovers_{}.jsonl",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ));
        let file = File::create(&path)
            .with_context(|| format!("creating results file {}", path.display()))?;
        info!("💾 Results will be written to: {}", path.display());
        Ok(Self {
            path,
            file,
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl EventSink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn deliver(&mut self, event: &CrossoverEvent) -> Result<()> {
        let record = CrossoverRecord {
            kind: "crossover",
            detected_at: chrono::Utc::now().to_rfc3339(),
            combined_confidence: event.combined_confidence(),
            event,
        };
        let json_line = serde_json::to_string(&record)?;
        writeln!(self.file, "{}", json_line)?;
        self.file.flush()?;
        self.written += 1;
        Ok(())
    }
}
