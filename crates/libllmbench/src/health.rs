//! Readiness polling of the primary endpoint
//!
//! Only `url` is probed, even when several hosts were restarted.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::clock::Sleeper;
use crate::config::HealthCheckConfig;
use crate::error::LifecycleError;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    Status(u16),
    Failed(String),
}

/// One readiness request against the service
pub trait HealthProbe {
    fn probe(&self) -> ProbeOutcome;

    /// What is being probed, for logs
    fn target(&self) -> &str;
}

impl<T: HealthProbe + ?Sized> HealthProbe for &T {
    fn probe(&self) -> ProbeOutcome {
        (**self).probe()
    }

    fn target(&self) -> &str {
        (**self).target()
    }
}

impl<T: HealthProbe + ?Sized> HealthProbe for Box<T> {
    fn probe(&self) -> ProbeOutcome {
        (**self).probe()
    }

    fn target(&self) -> &str {
        (**self).target()
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Smallest useful chat-completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

/// Probes an OpenAI-style chat-completion endpoint
pub struct ChatCompletionProbe {
    client: Client,
    url: String,
    model: String,
}

impl ChatCompletionProbe {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_timeout(url, model, PROBE_TIMEOUT)
    }

    pub fn with_timeout(
        url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.into(),
            model: model.into(),
        })
    }
}

impl HealthProbe for ChatCompletionProbe {
    fn probe(&self) -> ProbeOutcome {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: "hello",
            }],
            max_tokens: 3,
            temperature: 0.6,
            top_p: 0.95,
            stream: false,
        };

        match self.client.post(&self.url).json(&body).send() {
            Ok(resp) if resp.status() == StatusCode::OK => ProbeOutcome::Ready,
            Ok(resp) => ProbeOutcome::Status(resp.status().as_u16()),
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        }
    }

    fn target(&self) -> &str {
        &self.url
    }
}

/// Waits for the service to answer, with a bounded number of attempts
pub struct HealthChecker<P, S> {
    probe: P,
    sleeper: S,
    initial_delay: Duration,
    retry_count: u32,
    interval: Duration,
}

impl<P: HealthProbe, S: Sleeper> HealthChecker<P, S> {
    pub fn new(probe: P, sleeper: S, config: &HealthCheckConfig) -> Self {
        Self {
            probe,
            sleeper,
            initial_delay: config.initial_delay(),
            retry_count: config.retry_count,
            interval: config.interval(),
        }
    }

    /// Sleep the initial delay, then probe up to `retry_count` times `interval` apart
    pub fn check(&self) -> Result<(), LifecycleError> {
        info!(url = %self.probe.target(), "Running health check");
        info!(
            "Model startup can take a while, first check in {}s",
            self.initial_delay.as_secs()
        );
        self.sleeper
            .sleep(self.initial_delay)
            .map_err(|_| LifecycleError::Interrupted)?;

        for attempt in 1..=self.retry_count {
            match self.probe.probe() {
                ProbeOutcome::Ready => {
                    info!(attempt, "Health check passed");
                    return Ok(());
                }
                ProbeOutcome::Status(code) => warn!(
                    attempt,
                    "Health check got status {}, retrying in {}s",
                    code,
                    self.interval.as_secs()
                ),
                ProbeOutcome::Failed(reason) => warn!(
                    attempt,
                    "Health check request failed: {}, retrying in {}s",
                    reason,
                    self.interval.as_secs()
                ),
            }

            if attempt < self.retry_count {
                self.sleeper
                    .sleep(self.interval)
                    .map_err(|_| LifecycleError::Interrupted)?;
            }
        }

        error!(attempts = self.retry_count, "Health check gave up");
        Err(LifecycleError::Unhealthy {
            attempts: self.retry_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    use crate::clock::{Interrupted, RecordingSleeper};

    /// Replays a scripted sequence of outcomes, repeating the last one
    struct ScriptedProbe {
        outcomes: RefCell<Vec<ProbeOutcome>>,
        calls: Cell<u32>,
    }

    impl ScriptedProbe {
        fn new(mut outcomes: Vec<ProbeOutcome>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: RefCell::new(outcomes),
                calls: Cell::new(0),
            }
        }
    }

    impl HealthProbe for ScriptedProbe {
        fn probe(&self) -> ProbeOutcome {
            self.calls.set(self.calls.get() + 1);
            let mut outcomes = self.outcomes.borrow_mut();
            if outcomes.len() > 1 {
                outcomes.pop().unwrap()
            } else {
                outcomes[0].clone()
            }
        }

        fn target(&self) -> &str {
            "scripted"
        }
    }

    fn timing(initial_delay: u64, retry_count: u32, interval: u64) -> HealthCheckConfig {
        HealthCheckConfig {
            initial_delay,
            retry_count,
            interval,
        }
    }

    #[test]
    fn test_never_ready_exhausts_retries() {
        let probe = ScriptedProbe::new(vec![ProbeOutcome::Status(503)]);
        let sleeper = RecordingSleeper::new();
        let checker = HealthChecker::new(&probe, &sleeper, &timing(60, 5, 10));

        let err = checker.check().unwrap_err();
        assert!(matches!(err, LifecycleError::Unhealthy { attempts: 5 }));
        assert_eq!(probe.calls.get(), 5);

        let mut expected = vec![Duration::from_secs(60)];
        expected.extend(std::iter::repeat(Duration::from_secs(10)).take(4));
        assert_eq!(sleeper.calls(), expected);
    }

    #[test]
    fn test_ready_after_failures() {
        let probe = ScriptedProbe::new(vec![
            ProbeOutcome::Failed("connection refused".to_string()),
            ProbeOutcome::Status(502),
            ProbeOutcome::Ready,
        ]);
        let sleeper = RecordingSleeper::new();
        let checker = HealthChecker::new(&probe, &sleeper, &timing(5, 10, 2));

        assert!(checker.check().is_ok());
        assert_eq!(probe.calls.get(), 3);
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_secs(5), Duration::from_secs(2), Duration::from_secs(2)]
        );
    }

    #[test]
    fn test_zero_retries_fails_without_probing() {
        let probe = ScriptedProbe::new(vec![ProbeOutcome::Ready]);
        let sleeper = RecordingSleeper::new();
        let checker = HealthChecker::new(&probe, &sleeper, &timing(0, 0, 1));

        assert!(checker.check().is_err());
        assert_eq!(probe.calls.get(), 0);
    }

    #[test]
    fn test_interrupted_during_initial_delay() {
        struct Stopped;
        impl Sleeper for Stopped {
            fn sleep(&self, _: Duration) -> Result<(), Interrupted> {
                Err(Interrupted)
            }
        }

        let probe = ScriptedProbe::new(vec![ProbeOutcome::Ready]);
        let checker = HealthChecker::new(&probe, Stopped, &timing(30, 3, 1));
        assert!(matches!(checker.check(), Err(LifecycleError::Interrupted)));
        assert_eq!(probe.calls.get(), 0);
    }
}
