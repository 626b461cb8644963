//! Retry loop: run attempts until one produces a signature similar to the original.

use std::time::Duration;

use crate::{AttemptRecord, CancelToken, Clock, CrashReproducer, ReproResult, SignatureExtractor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    Reproduced,
    NotReproduced,
}

#[derive(Debug, Clone)]
pub struct ConvergenceOutcome {
    pub status: Convergence,
    pub attempts: Vec<AttemptRecord>,
    /// Output of the matching attempt.
    pub matched_output: Option<String>,
}

/// Runs at most `max_iterations` attempts, sleeping `backoff` between mismatches. Attempt errors
/// (missing tools, cancellation) abort the loop; signature-service failures count as a mismatch.
pub fn converge(
    reproducer: &mut dyn CrashReproducer,
    extractor: &dyn SignatureExtractor,
    max_iterations: u32,
    backoff: Duration,
    clock: &dyn Clock,
    cancel: &CancelToken,
) -> ReproResult<ConvergenceOutcome> {
    let mut attempts = Vec::new();
    tracing::info!("reproducing (up to {max_iterations} attempts)");

    for attempt in 1..=max_iterations {
        cancel.check()?;
        let output = reproducer.attempt()?;
        tracing::info!("attempt {attempt} output:\n{}", output.output);

        let mut record = AttemptRecord {
            attempt,
            exit_code: output.exit_code,
            timed_out: output.timed_out,
            signature: None,
            score: 0,
            required: reproducer.original().crash_state.len(),
            matched: false,
            warnings: output.warnings,
        };

        match extractor.extract(reproducer.job_type(), &output.output) {
            Ok(signature) => {
                let original = reproducer.original();
                let score = original.similarity(&signature);
                tracing::info!(
                    "new crash type: {}\nnew crash state:\n  {}\n\noriginal crash type: {}\noriginal crash state:\n  {}",
                    signature.crash_type,
                    signature.state_block(),
                    original.crash_type,
                    original.state_block()
                );
                record.score = score.score;
                record.required = score.required;
                record.matched = score.matched();
                record.signature = Some(signature);
            }
            Err(err) => {
                tracing::warn!("could not extract a signature from attempt {attempt}: {err}");
                record.warnings.push(format!("signature extraction failed: {err}"));
            }
        }

        let matched = record.matched;
        attempts.push(record);
        if matched {
            tracing::info!("the stacktrace seems similar to the original stacktrace");
            return Ok(ConvergenceOutcome {
                status: Convergence::Reproduced,
                attempts,
                matched_output: Some(output.output),
            });
        }

        tracing::info!("the stacktrace doesn't match the original stacktrace");
        if attempt < max_iterations {
            tracing::info!("trying again ({attempt} of {max_iterations}); press Ctrl+C to stop");
            clock.sleep(backoff, cancel)?;
        }
    }

    Ok(ConvergenceOutcome {
        status: Convergence::NotReproduced,
        attempts,
        matched_output: None,
    })
}
