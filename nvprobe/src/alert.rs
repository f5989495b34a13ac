//! Best-effort email alerts.
//!
//! [`Alerter`] is what the session talks to. It never returns an error:
//! delivery problems are logged and the session carries on.

use crate::exec::{CommandError, CommandRunner, CommandSpec};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_SUBJECT: &str = "SSD Test Error Alert";

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("failed to run mail command: {0}")]
    Command(#[from] CommandError),

    #[error("mail command exited with code {exit_code}: {stderr}")]
    Rejected { exit_code: i32, stderr: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
}

/// Delivers one alert message.
pub trait AlertTransport {
    fn send(&self, alert: &AlertMessage) -> impl Future<Output = Result<(), AlertError>>;
}

impl<T: AlertTransport> AlertTransport for Arc<T> {
    async fn send(&self, alert: &AlertMessage) -> Result<(), AlertError> {
        (**self).send(alert).await
    }
}

/// Sends mail through a sendmail-compatible command (`msmtp -t` by default),
/// which reads recipients from the message headers.
#[derive(Debug)]
pub struct MsmtpTransport<R> {
    runner: Arc<R>,
    program: String,
    from: String,
    to: String,
    timeout: Duration,
}

impl<R: CommandRunner> MsmtpTransport<R> {
    pub fn new(
        runner: Arc<R>,
        program: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            from: from.into(),
            to: to.into(),
            timeout,
        }
    }

    /// The RFC 5322 message piped to the mail command.
    pub fn compose(&self, alert: &AlertMessage) -> String {
        format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}\r\n",
            self.from,
            self.to,
            alert.subject,
            alert.body.replace("\r\n", "\n").replace('\n', "\r\n"),
        )
    }

    fn command(&self, alert: &AlertMessage) -> CommandSpec {
        CommandSpec::new(&self.program)
            .arg("-t")
            .with_stdin(self.compose(alert))
            .with_timeout(self.timeout)
    }
}

impl<R: CommandRunner> AlertTransport for MsmtpTransport<R> {
    async fn send(&self, alert: &AlertMessage) -> Result<(), AlertError> {
        let output = self.runner.run(&self.command(alert)).await?;
        if !output.success() {
            return Err(AlertError::Rejected {
                exit_code: output.exit_code,
                stderr: output.diagnostic().to_string(),
            });
        }
        Ok(())
    }
}

/// Wraps a transport with the enable switch and failure swallowing.
#[derive(Debug)]
pub struct Alerter<T> {
    transport: T,
    enabled: bool,
    subject: String,
}

impl<T: AlertTransport> Alerter<T> {
    pub fn new(transport: T, enabled: bool, subject: impl Into<String>) -> Self {
        Self {
            transport,
            enabled,
            subject: subject.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Send `body`. Returns whether the alert was delivered.
    pub async fn notify(&self, body: impl Into<String>) -> bool {
        let message = AlertMessage {
            subject: self.subject.clone(),
            body: body.into(),
        };
        if !self.enabled {
            debug!(body = %message.body, "Alerts disabled; not sending");
            return false;
        }
        match self.transport.send(&message).await {
            Ok(()) => {
                info!(subject = %message.subject, "Alert email sent");
                true
            }
            Err(err) => {
                warn!(error = %err, "Failed to send alert email");
                false
            }
        }
    }
}

/// Alert text for health warnings.
pub fn health_alert(warnings: &[String]) -> String {
    format!("NVMe SSD health alert detected:\n{}", warnings.join("\n"))
}

pub fn workload_alert(name: &str, error: &str) -> String {
    format!("Test {name} failed: {error}")
}

pub fn health_check_alert(error: &dyn std::fmt::Display) -> String {
    format!("Error during health check: {error}")
}

pub fn persistence_alert(error: &dyn std::fmt::Display) -> String {
    format!("Failed to save results: {error}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, ScriptedResponse, ScriptedRunner};

    fn transport(scripted: ScriptedRunner) -> (Arc<ScriptedRunner>, MsmtpTransport<ScriptedRunner>) {
        let scripted = Arc::new(scripted);
        let transport = MsmtpTransport::new(
            scripted.clone(),
            "msmtp",
            "probe@example.com",
            "ops@example.com",
            Duration::from_secs(10),
        );
        (scripted, transport)
    }

    fn message(body: &str) -> AlertMessage {
        AlertMessage {
            subject: DEFAULT_SUBJECT.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_compose_headers_and_body() {
        let (_, transport) = transport(ScriptedRunner::new());
        let text = transport.compose(&message("line one\nline two"));
        assert!(text.starts_with(
            "From: probe@example.com\r\nTo: ops@example.com\r\nSubject: SSD Test Error Alert\r\n"
        ));
        assert!(text.ends_with("\r\n\r\nline one\r\nline two\r\n"));
    }

    #[tokio::test]
    async fn test_send_pipes_message_to_command() {
        let (scripted, transport) = transport(ScriptedRunner::new().on_program("msmtp", ScriptedResponse::stdout("")));
        transport.send(&message("hello")).await.unwrap();

        let calls = scripted.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].to_string(), "msmtp -t");
        let stdin = String::from_utf8(calls[0].stdin.clone().unwrap()).unwrap();
        assert!(stdin.contains("\r\n\r\nhello\r\n"));
        assert_eq!(calls[0].timeout, Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_send_rejected() {
        let (_, transport) = transport(
            ScriptedRunner::new().on_program("msmtp", ScriptedResponse::exit(78, "msmtp: account default not found")),
        );
        let err = transport.send(&message("x")).await.unwrap_err();
        assert!(matches!(err, AlertError::Rejected { exit_code: 78, .. }));
    }

    #[tokio::test]
    async fn test_alerter_swallows_failures() {
        let alerter = Alerter::new(RecordingTransport::failing(), true, DEFAULT_SUBJECT);
        assert!(!alerter.notify("disk on fire").await);

        let (_, transport) = transport(ScriptedRunner::new());
        let alerter = Alerter::new(transport, true, DEFAULT_SUBJECT);
        assert!(!alerter.notify("msmtp is not installed").await);
    }

    #[tokio::test]
    async fn test_disabled_alerter_sends_nothing() {
        let transport = Arc::new(RecordingTransport::new());
        let alerter = Alerter::new(transport.clone(), false, DEFAULT_SUBJECT);
        assert!(!alerter.notify("quiet").await);
        assert!(transport.sent().is_empty());

        let alerter = Alerter::new(transport.clone(), true, "custom");
        assert!(alerter.notify("loud").await);
        assert_eq!(transport.sent(), vec![AlertMessage { subject: "custom".into(), body: "loud".into() }]);
    }

    #[test]
    fn test_alert_texts() {
        assert_eq!(
            health_alert(&["High temperature detected: 330K".to_string(), "Media errors detected: 1".to_string()]),
            "NVMe SSD health alert detected:\nHigh temperature detected: 330K\nMedia errors detected: 1"
        );
        assert_eq!(workload_alert("randread_4K", "boom"), "Test randread_4K failed: boom");
        assert_eq!(health_check_alert(&"no json"), "Error during health check: no json");
        assert_eq!(persistence_alert(&"disk full"), "Failed to save results: disk full");
    }
}
