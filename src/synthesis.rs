//! Boundary to the external content-synthesis service.
//!
//! The service is opaque: it receives a prompt and hands back filled-in report
//! text. [`CommandSynthesizer`] reaches it through an external program that
//! reads a JSON request on stdin and prints the generated text on stdout.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::model::{Citation, Report};

pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";
const DEFAULT_CONTEXT: &str =
    "A post-quantum hybrid semantic processing architecture for genomic adjudication.";
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;
const MAX_BACKOFF_SECS: u64 = 60;
const TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub thinking_budget: u32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.4,
            thinking_budget: 8000,
            timeout: Duration::from_secs(TIMEOUT_SECS),
            max_retries: MAX_RETRIES,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system_instruction: String,
    pub contents: String,
}

/// Text returned by the service plus any grounding sources it cited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generated {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<Citation>,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("content service unavailable: {0}")]
    Unavailable(String),
    #[error("content service rejected the request ({}): {message}", describe_exit(.code))]
    Rejected { code: Option<i32>, message: String },
    #[error("content service returned an empty response")]
    EmptyResponse,
    #[error("content service returned a malformed response: {0}")]
    Malformed(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit {}", code),
        None => "killed by signal".to_string(),
    }
}

impl ServiceError {
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ServiceError::Rejected { message, .. } => {
                let lower = message.to_lowercase();
                lower.contains("429")
                    || lower.contains("rate limit")
                    || lower.contains("rate-limit")
                    || lower.contains("too many requests")
            }
            _ => false,
        }
    }
}

pub trait ContentSynthesizer: Send + Sync {
    fn generate(
        &self,
        prompt: &Prompt,
    ) -> impl Future<Output = Result<Generated, ServiceError>> + Send;
}

/// Build the request for one report: its sections rendered as `## heading`
/// blocks separated by `---`, with the shared context in the system part.
pub fn build_prompt(report: &Report) -> Prompt {
    let context = report
        .context
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CONTEXT);

    let system_instruction = format!(
        "You are the lead validation engineer preparing a technical report.\n\
         Populate the report template using this system specification:\n\
         {context}\n\n\
         Guidelines:\n\
         - Replace every bracketed [placeholder] with specific, realistic synthetic data.\n\
         - Give performance metrics as ranges with confidence intervals.\n\
         - Keep the section structure, one '## ' heading per section.\n\
         - Output only the filled report text, without introductory remarks.\n\
         - Keep the tone formal, technical and precise."
    );

    let template = if report.sections.is_empty() {
        "(no sections defined yet; propose a suitable structure)".to_string()
    } else {
        report
            .sections
            .iter()
            .map(|s| format!("## {}\n\n{}", s.heading, s.content))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    };

    let contents = format!(
        "Report Title: \"{}\"\n\n\
         Current Template Sections to Populate:\n---\n{}\n---\n\n\
         Complete the report using synthetic but plausible data:",
        report.title, template
    );

    Prompt {
        system_instruction,
        contents,
    }
}

/// Retry rate-limited rejections with exponential backoff; any other outcome
/// is returned as is.
pub async fn generate_with_retry<S: ContentSynthesizer>(
    synth: &S,
    prompt: &Prompt,
    config: &GenerationConfig,
) -> Result<Generated, ServiceError> {
    let mut attempt = 0;
    loop {
        match synth.generate(prompt).await {
            Err(e) if e.is_rate_limited() && attempt < config.max_retries => {
                let backoff = backoff_delay(config.base_backoff, attempt);
                warn!(
                    "Rate limited (attempt {}/{}), backing off {:.1}s",
                    attempt + 1,
                    config.max_retries,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// `base * 2^attempt`, capped at a minute.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let cap = Duration::from_secs(MAX_BACKOFF_SECS);
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    model: &'a str,
    temperature: f32,
    thinking_budget: u32,
    system_instruction: &'a str,
    prompt: &'a str,
}

/// Runs an external program per request.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    config: GenerationConfig,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>, args: Vec<String>, config: GenerationConfig) -> Self {
        Self {
            program: program.into(),
            args,
            config,
        }
    }

    async fn run(&self, prompt: &Prompt) -> Result<Generated, ServiceError> {
        let request = serde_json::to_vec(&SynthesisRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            thinking_budget: self.config.thinking_budget,
            system_instruction: &prompt.system_instruction,
            prompt: &prompt.contents,
        })
        .map_err(|e| ServiceError::Malformed(e.to_string()))?;

        let output = tokio::time::timeout(self.config.timeout, self.exchange(request))
            .await
            .map_err(|_| {
                ServiceError::Unavailable(format!(
                    "{} timed out after {:.0}s",
                    self.program,
                    self.config.timeout.as_secs_f64()
                ))
            })??;

        if !output.status.success() {
            return Err(ServiceError::Rejected {
                code: output.status.code(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout =
            String::from_utf8(output.stdout).map_err(|e| ServiceError::Malformed(e.to_string()))?;
        decode_response(&stdout)
    }

    /// Spawn, feed the request and collect output. Stdin is written from its
    /// own task so a program that never reads it cannot stall the wait; the
    /// child is killed if this future is dropped.
    async fn exchange(&self, request: Vec<u8>) -> Result<std::process::Output, ServiceError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ServiceError::Unavailable(format!("{}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let program = self.program.clone();
            tokio::spawn(async move {
                // A program that ignores its input may exit before we finish writing.
                if let Err(e) = stdin.write_all(&request).await {
                    debug!("request not fully written to {}: {}", program, e);
                }
            });
        }

        child
            .wait_with_output()
            .await
            .map_err(|e| ServiceError::Unavailable(e.to_string()))
    }
}

impl ContentSynthesizer for CommandSynthesizer {
    fn generate(
        &self,
        prompt: &Prompt,
    ) -> impl Future<Output = Result<Generated, ServiceError>> + Send {
        self.run(prompt)
    }
}

/// Stdout is either a JSON object `{ "text", "sources" }` or plain text.
pub fn decode_response(raw: &str) -> Result<Generated, ServiceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::EmptyResponse);
    }

    if trimmed.starts_with('{') {
        let generated: Generated =
            serde_json::from_str(trimmed).map_err(|e| ServiceError::Malformed(e.to_string()))?;
        if generated.text.trim().is_empty() {
            return Err(ServiceError::EmptyResponse);
        }
        return Ok(generated);
    }

    Ok(Generated {
        text: trimmed.to_string(),
        sources: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::model::Section;

    fn report(sections: Vec<Section>, context: Option<&str>) -> Report {
        Report {
            id: "report-1".into(),
            title: "Report 1 — Provenance".into(),
            sections,
            context: context.map(str::to_string),
        }
    }

    #[test]
    fn prompt_renders_sections() {
        let r = report(
            vec![Section::new("Purpose", "Why."), Section::new("Manifest", "• [id]")],
            Some("CTX BLOB"),
        );
        let p = build_prompt(&r);
        assert!(p.system_instruction.contains("CTX BLOB"));
        assert!(p.contents.starts_with("Report Title: \"Report 1 — Provenance\""));
        assert!(p.contents.contains("## Purpose\n\nWhy.\n\n---\n\n## Manifest\n\n• [id]"));
    }

    #[test]
    fn prompt_falls_back_to_default_context() {
        let p = build_prompt(&report(vec![], None));
        assert!(p.system_instruction.contains(DEFAULT_CONTEXT));
        assert!(p.contents.contains("no sections defined yet"));
    }

    #[test]
    fn decode_plain_text() {
        let g = decode_response("\n## A\nbody\n").unwrap();
        assert_eq!(g.text, "## A\nbody");
        assert!(g.sources.is_empty());
    }

    #[test]
    fn decode_json_with_sources() {
        let g = decode_response(
            r###"{"text":"## A\nbody","sources":[{"uri":"https://example.org/a","title":"A"}]}"###,
        )
        .unwrap();
        assert_eq!(g.text, "## A\nbody");
        assert_eq!(
            g.sources,
            vec![Citation {
                uri: "https://example.org/a".into(),
                title: "A".into()
            }]
        );
    }

    #[test]
    fn decode_empty_and_malformed() {
        assert!(matches!(decode_response("  \n"), Err(ServiceError::EmptyResponse)));
        assert!(matches!(decode_response(r#"{"text":"  "}"#), Err(ServiceError::EmptyResponse)));
        assert!(matches!(decode_response("{not json"), Err(ServiceError::Malformed(_))));
    }

    #[test]
    fn rejection_message() {
        let err = ServiceError::Rejected {
            code: Some(2),
            message: "quota exceeded".into(),
        };
        assert_eq!(
            err.to_string(),
            "content service rejected the request (exit 2): quota exceeded"
        );
    }

    #[test]
    fn rate_limit_detection() {
        let limited = ServiceError::Rejected {
            code: Some(1),
            message: "HTTP 429 Too Many Requests".into(),
        };
        let auth = ServiceError::Rejected {
            code: Some(1),
            message: "invalid api key".into(),
        };
        assert!(limited.is_rate_limited());
        assert!(!auth.is_rate_limited());
        assert!(!ServiceError::EmptyResponse.is_rate_limited());
    }

    struct RateLimitedThenOk {
        failures: u32,
        calls: AtomicU32,
    }

    impl ContentSynthesizer for RateLimitedThenOk {
        fn generate(
            &self,
            _prompt: &Prompt,
        ) -> impl Future<Output = Result<Generated, ServiceError>> + Send {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let failures = self.failures;
            async move {
                if n < failures {
                    Err(ServiceError::Rejected {
                        code: Some(1),
                        message: "rate limit exceeded".into(),
                    })
                } else {
                    Ok(Generated {
                        text: "## Done\nok".into(),
                        sources: vec![],
                    })
                }
            }
        }
    }

    fn fast_config() -> GenerationConfig {
        GenerationConfig {
            base_backoff: Duration::from_millis(1),
            ..GenerationConfig::default()
        }
    }

    #[tokio::test]
    async fn retries_rate_limited_requests() {
        let synth = RateLimitedThenOk {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let prompt = build_prompt(&report(vec![], None));
        let g = generate_with_retry(&synth, &prompt, &fast_config()).await.unwrap();
        assert_eq!(g.text, "## Done\nok");
        assert_eq!(synth.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let synth = RateLimitedThenOk {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let prompt = build_prompt(&report(vec![], None));
        let err = generate_with_retry(&synth, &prompt, &fast_config()).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(synth.calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[cfg(unix)]
    fn sh(script: &str) -> CommandSynthesizer {
        CommandSynthesizer::new(
            "sh",
            vec!["-c".into(), script.into()],
            GenerationConfig::default(),
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_reads_stdout() {
        let synth = sh("cat > /dev/null; printf '## Purpose\\nfilled\\n'");
        let prompt = build_prompt(&report(vec![], None));
        let g = synth.generate(&prompt).await.unwrap();
        assert_eq!(g.text, "## Purpose\nfilled");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_receives_json_request() {
        let synth = sh("grep -q '\"temperature\":0.4' && echo ok");
        let prompt = build_prompt(&report(vec![], None));
        assert_eq!(synth.generate(&prompt).await.unwrap().text, "ok");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_failure_is_rejected() {
        let synth = sh("cat > /dev/null; echo 'quota exhausted' >&2; exit 3");
        let prompt = build_prompt(&report(vec![], None));
        match synth.generate(&prompt).await {
            Err(ServiceError::Rejected { code, message }) => {
                assert_eq!(code, Some(3));
                assert_eq!(message, "quota exhausted");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn backoff_is_capped() {
        let base = Duration::from_millis(BASE_BACKOFF_MS);
        assert_eq!(backoff_delay(base, 0), base);
        assert_eq!(backoff_delay(base, 2), base * 4);
        assert_eq!(backoff_delay(base, 10), Duration::from_secs(MAX_BACKOFF_SECS));
        assert_eq!(backoff_delay(base, 40), Duration::from_secs(MAX_BACKOFF_SECS));
        assert_eq!(backoff_delay(Duration::ZERO, 40), Duration::ZERO);
    }

    #[tokio::test]
    async fn many_retries_do_not_overflow_backoff() {
        let synth = RateLimitedThenOk {
            failures: 40,
            calls: AtomicU32::new(0),
        };
        let config = GenerationConfig {
            base_backoff: Duration::ZERO,
            max_retries: 40,
            ..GenerationConfig::default()
        };
        let prompt = build_prompt(&report(vec![], None));
        let g = generate_with_retry(&synth, &prompt, &config).await.unwrap();
        assert_eq!(g.text, "## Done\nok");
        assert_eq!(synth.calls.load(Ordering::SeqCst), 41);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_covers_unread_large_request() {
        let synth = CommandSynthesizer::new(
            "sh",
            vec!["-c".into(), "sleep 4".into()],
            GenerationConfig {
                timeout: Duration::from_millis(300),
                ..GenerationConfig::default()
            },
        );
        let big_context = "x".repeat(200 * 1024);
        let prompt = build_prompt(&report(vec![], Some(big_context.as_str())));

        let started = std::time::Instant::now();
        let res = synth.generate(&prompt).await;
        assert!(matches!(res, Err(ServiceError::Unavailable(ref m)) if m.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let synth = CommandSynthesizer::new(
            "definitely-not-a-real-program-3f9a",
            vec![],
            GenerationConfig::default(),
        );
        let prompt = build_prompt(&report(vec![], None));
        assert!(matches!(
            synth.generate(&prompt).await,
            Err(ServiceError::Unavailable(_))
        ));
    }
}
