//! Couche tracing qui capture les événements vers le buffer de logs
//!
//! Chaque événement est converti en [`LogEntry`] puis poussé dans le
//! [`LogState`] partagé, d'où il est rediffusé aux clients SSE.

use std::fmt::Write;
use std::time::SystemTime;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::{LogEntry, LogState};

/// Layer tracing branché sur le [`LogState`]
pub struct SseLayer {
    state: LogState,
}

impl SseLayer {
    pub fn new(state: LogState) -> Self {
        Self { state }
    }
}

/// Visiteur qui extrait le champ `message` d'un événement
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        }
    }
}

impl<S: Subscriber> Layer<S> for SseLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let meta = event.metadata();
        let entry = LogEntry {
            timestamp: SystemTime::now(),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            message: visitor.message,
        };

        self.state.push(entry);
    }
}
