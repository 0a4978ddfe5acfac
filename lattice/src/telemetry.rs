//! Tracing spans for pairing and device round-trips.
//!
//! The library never installs a subscriber. Applications pick one, e.g.:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("lattice=debug")
//!     .init();
//! ```
//!
//! Span fields never include credentials, passwords or session keys.

use tracing::{Span, debug_span, info_span};

/// Span covering one pairing attempt.
#[must_use]
pub fn pairing_span(generation: u64) -> Span {
    info_span!("lattice.pairing", generation)
}

/// Span covering one device round-trip.
#[must_use]
pub fn device_span(operation: &'static str, generation: u64) -> Span {
    debug_span!("lattice.device_call", operation, generation)
}

/// Span covering one provider operation.
#[must_use]
pub fn provider_span(operation: &'static str, chain: &'static str) -> Span {
    info_span!("lattice.provider", operation, chain)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::fmt::MakeWriter;

    use super::*;
    use crate::credential::StaticCredentialAgent;
    use crate::session::SessionState;
    use crate::testing::{MockDevice, session_manager};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn subscriber(captured: &Captured) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish()
    }

    #[test]
    fn test_spans_carry_their_fields() {
        let captured = Captured::default();
        tracing::subscriber::with_default(subscriber(&captured), || {
            let _provider = provider_span("get_addresses", "ethereum").entered();
            let _pairing = pairing_span(3).entered();
            let _device = device_span("connect", 3).entered();
            tracing::info!("inside");
        });

        let output = captured.text();
        assert!(output.contains("lattice.provider"), "{output}");
        assert!(output.contains("get_addresses"), "{output}");
        assert!(output.contains("chain=\"ethereum\"") || output.contains("chain=ethereum"), "{output}");
        assert!(output.contains("lattice.pairing{generation=3}"), "{output}");
        assert!(output.contains("lattice.device_call"), "{output}");
        assert!(output.contains("connect"), "{output}");
        assert!(output.contains("inside"), "{output}");
    }

    #[tokio::test]
    async fn test_pairing_logs_never_include_credentials() {
        let captured = Captured::default();
        let _guard = tracing::subscriber::set_default(subscriber(&captured));

        let device = MockDevice::new();
        let agent = Arc::new(StaticCredentialAgent::new("dev-7", "hunter2-secret", None));
        let manager = session_manager(agent, &device, None);
        manager.ensure_session().await.unwrap();
        assert_eq!(manager.state(), SessionState::Connected);

        let output = captured.text();
        assert!(output.contains("lattice.pairing"), "{output}");
        assert!(!output.contains("hunter2-secret"), "{output}");
    }
}
