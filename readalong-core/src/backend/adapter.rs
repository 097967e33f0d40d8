//! Resilient generation calls.
//!
//! Every failure mode ends in a `GenerationError`; nothing here panics or
//! blocks playback. The scheduler turns an error into a permanent miss.

use super::circuit::CircuitBreaker;
use super::quality::QualityGovernor;
use super::retry::Backoff;
use super::{GenerationError, SceneGenerator};
use crate::config::PipelineConfig;
use crate::environment::{EnvironmentSignals, NetworkClass};
use crate::events::{EventBus, SessionEvent};
use crate::model::{GeneratedScene, QualityTier, SceneRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Wraps a [`SceneGenerator`] with retry, circuit breaking and tier selection.
pub struct GenerationAdapter {
    generator: Arc<dyn SceneGenerator>,
    backoff: Backoff,
    attempt_timeout: Duration,
    breaker: CircuitBreaker,
    governor: QualityGovernor,
    environment: EnvironmentSignals,
    events: EventBus,
}

impl GenerationAdapter {
    pub fn new(
        generator: Arc<dyn SceneGenerator>,
        config: &PipelineConfig,
        environment: EnvironmentSignals,
        events: EventBus,
    ) -> Self {
        Self {
            generator,
            backoff: Backoff::new(config.retry.clone()),
            attempt_timeout: config.retry.attempt_timeout(),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            governor: QualityGovernor::new(config.quality.clone()),
            environment,
            events,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn governor(&self) -> &QualityGovernor {
        &self.governor
    }

    /// Current tier ceiling under the latest environment signals.
    pub fn current_tier(&self) -> QualityTier {
        self.governor.ceiling(self.environment.current())
    }

    /// Publish `QualityChanged` if the ceiling or network class moved.
    pub fn refresh_quality(&self) {
        let env = self.environment.current();
        if let Some(tier) = self.governor.refresh(env) {
            info!(tier = tier.name(), network = ?env.network, "quality ceiling changed");
            self.events.publish(SessionEvent::QualityChanged {
                tier,
                network: env.network,
            });
        }
    }

    /// Generate a scene, retrying per policy.
    pub async fn generate(&self, request: &SceneRequest) -> Result<GeneratedScene, GenerationError> {
        let max_attempts = self.backoff.max_attempts();
        let mut tier = request.tier;
        let mut attempt = 1;

        loop {
            let env = self.environment.current();
            self.refresh_quality();
            if env.network == NetworkClass::Offline {
                return Err(GenerationError::Unavailable("network offline".into()));
            }
            let Some(permit) = self.breaker.try_acquire() else {
                debug!(sentence = %request.sentence, "circuit open, short-circuiting");
                return Err(GenerationError::Unavailable("circuit open".into()));
            };

            let effective = self.governor.select(tier, env);
            let mut attempt_request = request.clone();
            attempt_request.tier = effective;

            let started = Instant::now();
            let result = match tokio::time::timeout(self.attempt_timeout, self.generator.generate(&attempt_request)).await
            {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout {
                    after: self.attempt_timeout,
                }),
            };
            let elapsed = started.elapsed();

            let err = match result {
                Ok(scene) if scene.sentence != request.sentence => {
                    permit.fail();
                    return Err(GenerationError::InvalidResponse(format!(
                        "scene for {} returned for request {}",
                        scene.sentence, request.sentence
                    )));
                }
                Ok(scene) => {
                    permit.succeed();
                    self.governor.observe_latency(elapsed);
                    debug!(
                        sentence = %request.sentence,
                        tier = scene.tier.name(),
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "scene generated"
                    );
                    return Ok(scene);
                }
                Err(err) => err,
            };

            permit.fail();
            if matches!(err, GenerationError::Timeout { .. }) {
                self.governor.observe_latency(elapsed);
                tier = effective.lower();
            }

            if !err.is_retryable() || attempt >= max_attempts {
                warn!(
                    sentence = %request.sentence,
                    generator = self.generator.name(),
                    attempt,
                    error = %err,
                    "generation failed"
                );
                return Err(err);
            }

            let delay = self.backoff.delay(attempt);
            debug!(
                sentence = %request.sentence,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying generation"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::ResourcePressure;
    use crate::model::RequestPriority;
    use crate::testing::{MockGenerator, MockOutcome};

    fn request(seq: u64) -> SceneRequest {
        SceneRequest {
            sentence: crate::model::SentenceRef::at(seq),
            fragments: vec!["a lighthouse at dusk".into()],
            elements: Vec::new(),
            tier: QualityTier::High,
            priority: RequestPriority {
                urgent: false,
                element_count: 0,
                seq,
                distance: 0,
            },
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::new()
            .with_retry(3, Duration::from_millis(10))
            .with_attempt_timeout(Duration::from_millis(500))
            .with_breaker(5, Duration::from_secs(10))
    }

    fn adapter(mock: Arc<MockGenerator>, env: EnvironmentSignals) -> GenerationAdapter {
        GenerationAdapter::new(mock, &config(), env, EventBus::new(64))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let mock = Arc::new(MockGenerator::new());
        let adapter = adapter(mock.clone(), EnvironmentSignals::new());
        let scene = adapter.generate(&request(1)).await.unwrap();
        assert_eq!(scene.sentence.seq, 1);
        assert_eq!(scene.tier, QualityTier::High);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let mock = Arc::new(MockGenerator::new());
        mock.script(1, vec![MockOutcome::NetworkError, MockOutcome::NetworkError]);
        let adapter = adapter(mock.clone(), EnvironmentSignals::new());

        assert!(adapter.generate(&request(1)).await.is_ok());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let mock = Arc::new(MockGenerator::new());
        mock.script(1, vec![MockOutcome::NetworkError; 5]);
        let adapter = adapter(mock.clone(), EnvironmentSignals::new());

        let err = adapter.generate(&request(1)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Network(_)));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_retries_one_tier_lower() {
        let mock = Arc::new(MockGenerator::new());
        mock.script(1, vec![MockOutcome::Delay(Duration::from_secs(5))]);
        let adapter = adapter(mock.clone(), EnvironmentSignals::new());

        let scene = adapter.generate(&request(1)).await.unwrap();
        assert_eq!(scene.tier, QualityTier::Standard);
        let tiers: Vec<QualityTier> = mock.calls().iter().map(|c| c.tier).collect();
        assert_eq!(tiers, vec![QualityTier::High, QualityTier::Standard]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_short_circuits() {
        let mock = Arc::new(MockGenerator::new());
        let env = EnvironmentSignals::new();
        env.set_network(NetworkClass::Offline);
        let adapter = adapter(mock.clone(), env);

        let err = adapter.generate(&request(1)).await.unwrap_err();
        assert!(matches!(err, GenerationError::Unavailable(_)));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pressure_lowers_requested_tier() {
        let mock = Arc::new(MockGenerator::new());
        let env = EnvironmentSignals::new();
        env.set_pressure(ResourcePressure::Critical);
        let adapter = adapter(mock.clone(), env);

        let scene = adapter.generate(&request(1)).await.unwrap();
        assert_eq!(scene.tier, QualityTier::Draft);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_skips_network() {
        let mock = Arc::new(MockGenerator::new());
        mock.fail_all(true);
        let adapter = GenerationAdapter::new(
            mock.clone(),
            &config().with_retry(1, Duration::from_millis(10)),
            EnvironmentSignals::new(),
            EventBus::new(64),
        );

        for seq in 0..5 {
            assert!(adapter.generate(&request(seq)).await.is_err());
        }
        assert_eq!(mock.call_count(), 5);

        let err = adapter.generate(&request(9)).await.unwrap_err();
        assert_eq!(err, GenerationError::Unavailable("circuit open".into()));
        assert_eq!(mock.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_sentence_rejected() {
        let mock = Arc::new(MockGenerator::new());
        mock.script(1, vec![MockOutcome::WrongSentence]);
        let adapter = adapter(mock.clone(), EnvironmentSignals::new());

        let err = adapter.generate(&request(1)).await.unwrap_err();
        assert!(matches!(err, GenerationError::InvalidResponse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_trial_reopens_circuit() {
        use crate::backend::CircuitState;
        use futures::FutureExt;
        use std::panic::AssertUnwindSafe;

        let mock = Arc::new(MockGenerator::new());
        let adapter = adapter(mock.clone(), EnvironmentSignals::new());
        for _ in 0..5 {
            adapter.breaker().record_failure();
        }
        assert_eq!(adapter.breaker().state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(11)).await;
        mock.script(1, vec![MockOutcome::Panic]);
        let outcome = AssertUnwindSafe(adapter.generate(&request(1))).catch_unwind().await;
        assert!(outcome.is_err());
        assert_eq!(adapter.breaker().state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(adapter.generate(&request(2)).await.is_ok());
        assert_eq!(adapter.breaker().state(), CircuitState::Closed);
    }
}
