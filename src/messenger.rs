//! Progress and diagnostics reporting.
//!
//! The library never prints; long-running operations (table scans, recovery)
//! report through a [`Messenger`] supplied by the caller. [`LogMessenger`]
//! routes everything to the `log` facade, [`NullMessenger`] drops it.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

pub trait Messenger {
    /// Transient one-line status, e.g. "reading tables 40".
    fn status(&self, message: &str);

    /// A durable message with optional key/value details.
    fn message(&self, message: &str, severity: Severity, details: &[(String, String)]);
}

/// Messenger backed by the `log` facade.
#[derive(Debug, Default)]
pub struct LogMessenger;

impl Messenger for LogMessenger {
    fn status(&self, message: &str) {
        log::debug!("{}", message);
    }

    fn message(&self, message: &str, severity: Severity, details: &[(String, String)]) {
        let rendered = render(message, details);
        match severity {
            Severity::Info => log::info!("{}", rendered),
            Severity::Success => log::info!("{}", rendered),
            Severity::Warning => log::warn!("{}", rendered),
            Severity::Error => log::error!("{}", rendered),
        }
    }
}

#[derive(Debug, Default)]
pub struct NullMessenger;

impl Messenger for NullMessenger {
    fn status(&self, _message: &str) {}

    fn message(&self, _message: &str, _severity: Severity, _details: &[(String, String)]) {}
}

fn render(message: &str, details: &[(String, String)]) -> String {
    let mut out = String::from(message);
    for (k, v) in details {
        out.push_str(&format!(" {}={}", k, v));
    }
    out
}

/// Collects messages in memory; used by tests and by callers that present
/// recovery reports themselves.
#[derive(Debug, Default)]
pub struct CollectingMessenger {
    messages: std::cell::RefCell<Vec<(Severity, String)>>,
}

impl CollectingMessenger {
    pub fn new() -> CollectingMessenger {
        CollectingMessenger::default()
    }

    pub fn take(&self) -> Vec<(Severity, String)> {
        self.messages.take()
    }
}

impl Messenger for CollectingMessenger {
    fn status(&self, _message: &str) {}

    fn message(&self, message: &str, severity: Severity, details: &[(String, String)]) {
        self.messages
            .borrow_mut()
            .push((severity, render(message, details)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_messenger() {
        let m = CollectingMessenger::new();
        m.message(
            "lost object",
            Severity::Info,
            &[("page".to_string(), "0x10".to_string())],
        );
        let taken = m.take();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].0, Severity::Info);
        assert_eq!(taken[0].1, "lost object page=0x10");
        assert!(m.take().is_empty());
    }
}
