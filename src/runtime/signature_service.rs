//! Crash signature extraction through the fuzzing service's stacktrace parser.

use serde::{Deserialize, Serialize};

use std::time::Duration;

use crate::{first_stacktrace_block, strip_html, CrashSignature, ReproError, ReproResult};

pub trait SignatureExtractor: Send + Sync {
    fn extract(&self, job_type: &str, stacktrace: &str) -> ReproResult<CrashSignature>;
}

#[derive(Debug, Serialize)]
struct ParseRequest<'a> {
    job: &'a str,
    stacktrace: &'a str,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    crash_state: String,
    crash_type: String,
}

#[derive(Debug, Clone)]
pub struct HttpSignatureExtractor {
    url: String,
    timeout: Duration,
}

impl HttpSignatureExtractor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl SignatureExtractor for HttpSignatureExtractor {
    fn extract(&self, job_type: &str, stacktrace: &str) -> ReproResult<CrashSignature> {
        let body = serde_json::to_string(&ParseRequest {
            job: job_type,
            stacktrace,
        })?;
        let response = ureq::post(&self.url)
            .timeout(self.timeout)
            .set("Content-Type", "application/json")
            .set("User-Agent", concat!("crashrepro/", env!("CARGO_PKG_VERSION")))
            .send_string(&body)
            .map_err(|err| match err {
                ureq::Error::Status(code, _) => {
                    ReproError::Signature(format!("{} answered with status {code}", self.url))
                }
                other => ReproError::Signature(format!("request to {} failed: {other}", self.url)),
            })?;
        let text = response
            .into_string()
            .map_err(|e| ReproError::Signature(format!("failed to read response from {}: {e}", self.url)))?;
        parse_response(&text)
    }
}

/// Signature of the stored crash: HTML is stripped and only the first stack trace block is sent.
pub fn original_signature<S: AsRef<str>>(
    extractor: &dyn SignatureExtractor,
    job_type: &str,
    stacktrace_lines: &[S],
) -> ReproResult<CrashSignature> {
    let block = first_stacktrace_block(&strip_html(stacktrace_lines));
    extractor.extract(job_type, &block.join("\n"))
}

pub(crate) fn parse_response(text: &str) -> ReproResult<CrashSignature> {
    let parsed: ParseResponse = serde_json::from_str(text)
        .map_err(|e| ReproError::Signature(format!("malformed signature response: {e}")))?;
    Ok(CrashSignature::from_service_fields(&parsed.crash_state, &parsed.crash_type))
}
