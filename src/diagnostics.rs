//! System self-test.
//!
//! Verifies the microphone can be opened, the speech API is reachable with
//! the configured key, and audio contexts can be created at the call rates.

use owo_colors::OwoColorize;
use std::time::{Duration, Instant};

use crate::audio::device::AudioBackend;
use crate::config::{Config, LiveConfig};
use crate::defaults;
use crate::error::{ErrorKind, VoiceCallError};
use crate::permission::{CaptureConstraints, MicrophoneAccess};

/// API round trips slower than this get a recommendation.
const SLOW_API_LATENCY: Duration = Duration::from_secs(2);

const API_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult {
    /// Working, with a short description of what was found
    Ok(String),
    /// Nothing to check against (e.g. no API key configured)
    NotFound(String),
    /// Present but broken
    Failed(String),
}

impl CheckResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, CheckResult::Ok(_))
    }

    fn print(&self, label: &str) {
        match self {
            CheckResult::Ok(detail) => println!("{} {}: {}", "✓".green(), label, detail),
            CheckResult::NotFound(detail) => {
                println!("{} {}: {}", "✗".red(), label, detail.yellow())
            }
            CheckResult::Failed(detail) => println!("{} {}: {}", "✗".red(), label, detail.red()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemReport {
    pub microphone: CheckResult,
    pub api: CheckResult,
    pub api_latency: Option<Duration>,
    pub audio: CheckResult,
}

impl SystemReport {
    pub fn passed(&self) -> bool {
        self.microphone.is_ok() && self.api.is_ok() && self.audio.is_ok()
    }

    pub fn recommendations(&self) -> Vec<String> {
        let mut recommendations = Vec::new();
        if !self.microphone.is_ok() {
            recommendations.push("Fix microphone permissions".to_string());
        }
        if !self.api.is_ok() {
            recommendations.push("Fix Gemini API connection".to_string());
            if matches!(self.api, CheckResult::NotFound(_)) {
                for tip in ErrorKind::ApiKeyMissing.suggestions() {
                    recommendations.push(format!("  {}", tip));
                }
            }
        } else if self.api_latency.is_some_and(|l| l > SLOW_API_LATENCY) {
            recommendations.push("API latency is high - check internet connection".to_string());
        }
        if !self.audio.is_ok() {
            recommendations.push("Fix audio context initialization".to_string());
        }
        recommendations
    }

    pub fn print(&self) {
        println!("Voice call system check\n");
        self.microphone.print("Microphone");
        self.api.print("Gemini API");
        if let Some(latency) = self.api_latency {
            println!("  API latency: {}ms", latency.as_millis());
        }
        self.audio.print("Audio contexts");

        println!();
        if self.passed() {
            println!("Overall: {}", "PASS".green());
        } else {
            println!("Overall: {}", "FAIL".red());
        }

        let recommendations = self.recommendations();
        if !recommendations.is_empty() {
            println!("\nRecommendations:");
            for recommendation in recommendations {
                println!("  - {}", recommendation);
            }
        }
    }
}

/// Open and release the microphone with plain constraints.
pub async fn check_microphone(microphone: &dyn MicrophoneAccess) -> CheckResult {
    match microphone.probe(&CaptureConstraints::plain()).await {
        Ok(()) => CheckResult::Ok("microphone accessible".to_string()),
        Err(e) => {
            let error = VoiceCallError::from(e);
            CheckResult::Failed(error.kind().user_message().to_string())
        }
    }
}

/// List models with the configured key, timing the round trip.
pub async fn check_api(config: &LiveConfig) -> (CheckResult, Option<Duration>) {
    let Some(api_key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
        return (
            CheckResult::NotFound(format!("{} is not set", defaults::API_KEY_ENV)),
            None,
        );
    };

    let url = match reqwest::Url::parse_with_params(defaults::MODELS_ENDPOINT, &[("key", api_key)])
    {
        Ok(url) => url,
        Err(e) => return (CheckResult::Failed(format!("Invalid endpoint: {}", e)), None),
    };
    let client = match reqwest::Client::builder().timeout(API_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => return (CheckResult::Failed(format!("HTTP client: {}", e)), None),
    };

    let started = Instant::now();
    match client.get(url).send().await {
        Ok(response) if response.status().is_success() => {
            let latency = started.elapsed();
            (
                CheckResult::Ok(format!("connected ({})", response.status())),
                Some(latency),
            )
        }
        Ok(response) => (
            CheckResult::Failed(format!("API connection failed: {}", response.status())),
            None,
        ),
        Err(e) => (
            CheckResult::Failed(format!(
                "{} ({})",
                ErrorKind::NetworkError.user_message(),
                e
            )),
            None,
        ),
    }
}

/// Create both contexts at the call rates and close them again.
pub fn check_audio_contexts(backend: &dyn AudioBackend, config: &Config) -> CheckResult {
    let input = match backend.create_input(config.audio.input_sample_rate) {
        Ok(input) => input,
        Err(e) => return CheckResult::Failed(e.to_string()),
    };
    let output = match backend.create_output(config.audio.output_sample_rate) {
        Ok(output) => output,
        Err(e) => {
            input.close();
            return CheckResult::Failed(e.to_string());
        }
    };

    let resumed = input.resume().and_then(|()| output.resume());
    let detail = format!(
        "input {}Hz ({:.1}ms), output {}Hz ({:.1}ms)",
        input.sample_rate(),
        input.latency() * 1000.0,
        output.sample_rate(),
        output.latency() * 1000.0
    );
    input.close();
    output.close();

    match resumed {
        Ok(()) => CheckResult::Ok(detail),
        Err(e) => CheckResult::Failed(e.to_string()),
    }
}

/// Run every check against the real devices and network.
pub async fn run_system_check(config: &Config) -> SystemReport {
    use crate::audio::capture::{CpalBackend, CpalMicrophone};

    let microphone = CpalMicrophone::new(config.audio.input_device.clone());
    let backend = CpalBackend::new(
        config.audio.input_device.clone(),
        config.audio.output_device.clone(),
    );

    let microphone = check_microphone(&microphone).await;
    let (api, api_latency) = check_api(&config.live).await;
    let audio = check_audio_contexts(&backend, config);

    SystemReport {
        microphone,
        api,
        api_latency,
        audio,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockAudioBackend;
    use crate::permission::{MediaError, MockMicrophone};

    fn passing() -> SystemReport {
        SystemReport {
            microphone: CheckResult::Ok("ok".to_string()),
            api: CheckResult::Ok("ok".to_string()),
            api_latency: Some(Duration::from_millis(150)),
            audio: CheckResult::Ok("ok".to_string()),
        }
    }

    #[test]
    fn test_passing_report_has_no_recommendations() {
        let report = passing();
        assert!(report.passed());
        assert!(report.recommendations().is_empty());
    }

    #[test]
    fn test_slow_api_is_recommendation_not_failure() {
        let report = SystemReport {
            api_latency: Some(Duration::from_millis(2500)),
            ..passing()
        };
        assert!(report.passed());
        assert_eq!(
            report.recommendations(),
            vec!["API latency is high - check internet connection"]
        );
    }

    #[test]
    fn test_failures_each_recommend_a_fix() {
        let report = SystemReport {
            microphone: CheckResult::Failed("denied".to_string()),
            api: CheckResult::Failed("401".to_string()),
            api_latency: None,
            audio: CheckResult::Failed("no device".to_string()),
        };
        assert!(!report.passed());
        assert_eq!(
            report.recommendations(),
            vec![
                "Fix microphone permissions",
                "Fix Gemini API connection",
                "Fix audio context initialization",
            ]
        );
    }

    #[test]
    fn test_missing_key_lists_key_suggestions() {
        let report = SystemReport {
            api: CheckResult::NotFound("not set".to_string()),
            api_latency: None,
            ..passing()
        };
        let recommendations = report.recommendations();
        assert_eq!(recommendations[0], "Fix Gemini API connection");
        assert!(recommendations.iter().any(|r| r.contains("GEMINI_API_KEY")));
    }

    #[tokio::test]
    async fn test_check_api_without_key() {
        let (result, latency) = check_api(&LiveConfig::default()).await;
        assert!(matches!(result, CheckResult::NotFound(_)));
        assert!(latency.is_none());
    }

    #[tokio::test]
    async fn test_check_microphone() {
        assert!(check_microphone(&MockMicrophone::granted()).await.is_ok());

        let result = check_microphone(&MockMicrophone::failing(MediaError::NotFound(
            "none".to_string(),
        )))
        .await;
        assert_eq!(
            result,
            CheckResult::Failed(ErrorKind::NoMicrophone.user_message().to_string())
        );
    }

    #[test]
    fn test_check_audio_contexts_closes_what_it_opens() {
        let backend = MockAudioBackend::new().with_latency(0.01);
        let result = check_audio_contexts(&backend, &Config::default());

        assert_eq!(
            result,
            CheckResult::Ok("input 16000Hz (10.0ms), output 24000Hz (10.0ms)".to_string())
        );
        assert_eq!(backend.open_contexts(), 0);
    }

    #[test]
    fn test_check_audio_contexts_reports_failure() {
        let backend = MockAudioBackend::new().with_output_failure("no sink");
        let result = check_audio_contexts(&backend, &Config::default());

        assert!(matches!(result, CheckResult::Failed(ref m) if m.contains("no sink")));
        assert_eq!(backend.open_contexts(), 0);
    }
}
