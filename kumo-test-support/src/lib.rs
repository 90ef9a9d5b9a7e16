//! Shared test utilities used across kumo crates.

pub mod tracing {
    //! Recording layer utilities for capturing events in tests.

    use std::fmt;
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::Context;

    /// Recording layer installed during tests to capture events for later
    /// assertions, so instrumentation can be verified deterministically.
    #[derive(Clone, Default)]
    pub struct RecordingLayer {
        events: Arc<Mutex<Vec<EventRecord>>>,
    }

    impl RecordingLayer {
        /// Returns a snapshot of the recorded events in emission order.
        #[must_use]
        pub fn events(&self) -> Vec<EventRecord> {
            self.events.lock().expect("lock poisoned").clone()
        }

        /// Returns whether any recorded event carries the given message.
        #[must_use]
        pub fn has_message(&self, needle: &str) -> bool {
            self.events()
                .iter()
                .any(|event| event.message.contains(needle))
        }
    }

    /// Snapshot of an emitted event: level, target, and rendered fields.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct EventRecord {
        /// The event's level.
        pub level: Level,
        /// The event's target (usually the emitting module path).
        pub target: String,
        /// The rendered `message` field, empty when absent.
        pub message: String,
        /// Every field rendered as `name=value`, in declaration order.
        pub fields: Vec<String>,
    }

    #[derive(Default)]
    struct FieldVisitor {
        message: String,
        fields: Vec<String>,
    }

    impl Visit for FieldVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.message = format!("{value:?}");
            } else {
                self.fields.push(format!("{}={value:?}", field.name()));
            }
        }
    }

    impl<S: Subscriber> Layer<S> for RecordingLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = FieldVisitor::default();
            event.record(&mut visitor);
            self.events.lock().expect("lock poisoned").push(EventRecord {
                level: *event.metadata().level(),
                target: event.metadata().target().to_owned(),
                message: visitor.message,
                fields: visitor.fields,
            });
        }
    }
}

pub mod fixtures {
    //! Small graph fixtures shared by core and CLI tests.

    /// Undirected edges of a 3-node path `0 - 1 - 2`.
    #[must_use]
    pub fn path3_edges() -> Vec<(u32, u32)> {
        vec![(0, 1), (1, 2)]
    }

    /// Undirected edges of the complete graph on four nodes.
    #[must_use]
    pub fn k4_edges() -> Vec<(u32, u32)> {
        vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]
    }

    /// Directed, weighted edges of the 4-node diamond used by the shortest
    /// path scenarios.
    #[must_use]
    pub fn diamond_weighted_edges() -> Vec<(u32, u32, u32)> {
        vec![(0, 1, 2), (1, 2, 3), (0, 2, 10), (2, 3, 1)]
    }

    /// Renders an edge list in the loader's `src dst` line format.
    #[must_use]
    pub fn render_edge_list(edges: &[(u32, u32)]) -> String {
        let mut out = String::new();
        for (src, dst) in edges {
            out.push_str(&format!("{src} {dst}\n"));
        }
        out
    }

    /// Renders a weighted edge list in the loader's `src dst weight` line
    /// format.
    #[must_use]
    pub fn render_weighted_edge_list(edges: &[(u32, u32, u32)]) -> String {
        let mut out = String::new();
        for (src, dst, weight) in edges {
            out.push_str(&format!("{src} {dst} {weight}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::tracing::RecordingLayer;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn recording_layer_captures_messages_and_fields() {
        let layer = RecordingLayer::default();
        let subscriber = tracing_subscriber::registry().with(layer.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(rounds = 3, "converged");
        });
        assert!(layer.has_message("converged"));
        let events = layer.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].fields.iter().any(|field| field == "rounds=3"));
    }

    #[test]
    fn edge_list_rendering_is_line_per_edge() {
        let rendered = fixtures::render_edge_list(&fixtures::path3_edges());
        assert_eq!(rendered, "0 1\n1 2\n");
        let weighted = fixtures::render_weighted_edge_list(&fixtures::diamond_weighted_edges());
        assert!(weighted.starts_with("0 1 2\n"));
    }
}
