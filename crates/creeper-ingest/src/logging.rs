//! Log subscriber setup.
//!
//! Logs never share a stream with the JSON-lines sink: the daemon hands
//! [`subscriber`] `std::io::stderr` so stdout carries derived events only.

use crate::config::Environment;
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Default directives when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,creeper_ingest=debug";

/// Build the subscriber for `env`, writing through `writer`.
///
/// Dev gets human-readable lines, prod gets one JSON object per line.
pub fn subscriber<W>(
    env: Environment,
    filter: EnvFilter,
    writer: W,
) -> Box<dyn Subscriber + Send + Sync + 'static>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    match env {
        Environment::Dev => Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .finish(),
        ),
        Environment::Prod => Box::new(
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(writer)
                .finish(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn emit(env: Environment) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = subscriber(env, EnvFilter::new("info"), move || writer.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(frames = 3, "Configuration:");
        });
        captured.text()
    }

    #[test]
    fn test_dev_logs_go_to_the_given_writer() {
        let text = emit(Environment::Dev);
        assert!(text.contains("Configuration:"));
        assert!(text.contains("frames"));
    }

    #[test]
    fn test_prod_logs_are_json_lines_on_the_given_writer() {
        let text = emit(Environment::Prod);
        let line = text.lines().next().unwrap();
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["fields"]["message"], "Configuration:");
        assert_eq!(value["fields"]["frames"], 3);
    }

    #[test]
    fn test_filter_applies() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = subscriber(Environment::Dev, EnvFilter::new("warn"), move || writer.clone());
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("quiet");
        });
        assert!(captured.text().is_empty());
    }
}
