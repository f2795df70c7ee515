//! Classifier adapter: scoring contract, validation, and providers.
//!
//! Dynamic, loosely-typed classifier responses are validated into a closed
//! result type right here at the boundary; nothing unvalidated crosses
//! into the event builder. Retry policy lives in the coordinator, not in
//! the providers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;
use crate::event::{RawItem, Sentiment};

/// Scores returned by the external classification service, one call per
/// item. Every field is range-checked before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub economic: f64,
    pub crypto: f64,
    pub privacy: f64,
    pub instability: f64,
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub overall_relevance: f64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_entities: Vec<String>,
}

impl ClassificationResult {
    /// Range check per the scoring contract. Scores are never clamped:
    /// clamping would corrupt the aggregate math downstream.
    pub fn validate(&self) -> Result<(), ClassifyError> {
        let scores = [
            ("economic", self.economic),
            ("crypto", self.crypto),
            ("privacy", self.privacy),
            ("instability", self.instability),
            ("overall_relevance", self.overall_relevance),
        ];
        for (name, v) in scores {
            if !v.is_finite() || !(0.0..=100.0).contains(&v) {
                return Err(ClassifyError::MalformedResponse(format!(
                    "{name} score {v} outside [0,100]"
                )));
            }
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ClassifyError::MalformedResponse(format!(
                "confidence {} outside [0,1]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// One external scoring call. Stateless per call; synchronous from the
/// pipeline's viewpoint even when the transport is async.
#[async_trait]
pub trait NewsClassifier: Send + Sync {
    async fn classify(&self, item: &RawItem) -> Result<ClassificationResult, ClassifyError>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

/// Convenient alias used by callers.
pub type DynClassifier = Arc<dyn NewsClassifier>;

// ------------------------------------------------------------
// HTTP provider (chat-completions style LLM call)
// ------------------------------------------------------------

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// LLM-backed classifier. Requires an API key; model and endpoint can be
/// overridden (the endpoint override is what tests point at a local stub).
pub struct HttpClassifier {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(api_key: impl Into<String>, model_override: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("crypto-news-signals/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(15))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key: api_key.into(),
            model: model_override.unwrap_or(DEFAULT_MODEL).to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = url.into();
        self
    }
}

#[async_trait]
impl NewsClassifier for HttpClassifier {
    async fn classify(&self, item: &RawItem) -> Result<ClassificationResult, ClassifyError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let sys = "You score crypto-market news. Reply with ONLY a JSON object: \
                   {\"economic\":0-100,\"crypto\":0-100,\"privacy\":0-100,\"instability\":0-100,\
                   \"sentiment\":\"bullish\"|\"bearish\"|\"neutral\",\"confidence\":0-1,\
                   \"overall_relevance\":0-100,\"summary\":\"one sentence\",\"key_entities\":[\"...\"]}. \
                   No prose, no code fences.";
        let user = format!(
            "author: {}\nengagement: {:.0}\ntext: {}",
            item.author, item.engagement_score, item.text
        );
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: sys,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.0,
            max_tokens: 300,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| ClassifyError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClassifyError::Transient(format!(
                "classifier HTTP status {status}"
            )));
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ClassifyError::Transient(e.to_string()))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ClassifyError::MalformedResponse("empty choices".to_string()))?;

        let parsed: ClassificationResult = serde_json::from_str(strip_code_fences(content))
            .map_err(|e| ClassifyError::MalformedResponse(format!("bad JSON payload: {e}")))?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn provider_name(&self) -> &'static str {
        "http"
    }
}

/// Models occasionally wrap the JSON in a fenced block despite the prompt.
/// Fences are transport noise, not contract data, so peeling them is safe.
fn strip_code_fences(s: &str) -> &str {
    let t = s.trim();
    let t = t
        .strip_prefix("```json")
        .or_else(|| t.strip_prefix("```"))
        .unwrap_or(t);
    t.strip_suffix("```").unwrap_or(t).trim()
}

// ------------------------------------------------------------
// Scripted provider (tests, mock mode)
// ------------------------------------------------------------

/// One scripted call outcome.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Result(ClassificationResult),
    Transient,
    Malformed,
}

/// Deterministic in-process classifier for tests and
/// `CLASSIFIER_TEST_MODE=mock` runs. Pops scripted outcomes in order and
/// falls back to a fixed result once the script is exhausted.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    fallback: ClassificationResult,
    delay: Duration,
    calls: AtomicU32,
}

impl ScriptedClassifier {
    pub fn always(result: ClassificationResult) -> Self {
        Self::from_script(Vec::new(), result)
    }

    pub fn from_script(script: Vec<ScriptedOutcome>, fallback: ClassificationResult) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// Sleep this long before every call (simulates a slow service).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Total classify calls observed (retries included).
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NewsClassifier for ScriptedClassifier {
    async fn classify(&self, _item: &RawItem) -> Result<ClassificationResult, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self
            .script
            .lock()
            .expect("classifier script mutex poisoned")
            .pop_front();
        match next {
            Some(ScriptedOutcome::Result(r)) => {
                r.validate()?;
                Ok(r)
            }
            Some(ScriptedOutcome::Transient) => {
                Err(ClassifyError::Transient("scripted outage".to_string()))
            }
            Some(ScriptedOutcome::Malformed) => Err(ClassifyError::MalformedResponse(
                "scripted schema violation".to_string(),
            )),
            None => Ok(self.fallback.clone()),
        }
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}
