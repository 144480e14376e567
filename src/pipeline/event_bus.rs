// src/pipeline/event_bus.rs
//
// Delivery side of the pipeline. The core hands every emitted crossover to
// each sink exactly once, in emission order; how a sink forwards it
// (log line, file, queue) is its own business.

use crate::types::CrossoverEvent;
use anyhow::Result;
use std::collections::VecDeque;
use tracing::warn;

pub trait EventSink {
    fn name(&self) -> &str;

    fn deliver(&mut self, event: &CrossoverEvent) -> Result<()>;
}

/// Bounded in-memory queue of emitted events for a consumer to drain.
pub struct EventBus {
    events: VecDeque<CrossoverEvent>,
    max_pending: usize,
    dropped: u64,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        let max_pending = max_pending.max(1);
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
            dropped: 0,
        }
    }

    pub fn publish(&mut self, event: CrossoverEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<CrossoverEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

impl EventSink for EventBus {
    fn name(&self) -> &str {
        "event_bus"
    }

    fn deliver(&mut self, event: &CrossoverEvent) -> Result<()> {
        self.publish(event.clone());
        Ok(())
    }
}
