use crate::{
    backend::{Backend, ExtractionResult, ExtractionStatus},
    document::DocumentHandle,
    error::{BackendFailure, ExtractError},
    extract::extract_with,
};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackPolicy {
    /// Also engage the secondary backend when the primary only managed a
    /// partial extraction. Off by default: partial results are accepted.
    pub fallback_on_partial: bool,
}

enum State {
    TryPrimary,
    TrySecondary {
        primary_failure: Option<BackendFailure>,
        primary_partial: Option<ExtractionResult>,
    },
    Failed(Vec<BackendFailure>),
}

/// Extract with `primary`, falling back to `secondary` when the primary
/// reports `Failure`.
///
/// Terminal outcomes are the accepted [`ExtractionResult`] (its
/// `extraction_method` names the backend that produced it) or
/// `AllBackendsFailed` carrying both reasons. Precondition errors such as
/// `PasswordProtected` end the run immediately.
pub fn extract_with_fallback(
    primary: &dyn Backend,
    secondary: &dyn Backend,
    doc: &DocumentHandle,
    policy: FallbackPolicy,
) -> Result<ExtractionResult, ExtractError> {
    let mut state = State::TryPrimary;
    loop {
        state = match state {
            State::TryPrimary => {
                let res = extract_with(primary, doc)?;
                match res.status {
                    ExtractionStatus::Success => return Ok(res),
                    ExtractionStatus::Partial if !policy.fallback_on_partial => return Ok(res),
                    ExtractionStatus::Partial => {
                        info!(
                            "{} partial on {}; trying {}",
                            primary.method(),
                            doc.file_name(),
                            secondary.method()
                        );
                        State::TrySecondary {
                            primary_failure: None,
                            primary_partial: Some(res),
                        }
                    }
                    ExtractionStatus::Failure => {
                        let failure = failure_of(&res);
                        warn!(
                            "{} failed on {}; trying {}: {}",
                            primary.method(),
                            doc.file_name(),
                            secondary.method(),
                            failure.reason
                        );
                        State::TrySecondary {
                            primary_failure: Some(failure),
                            primary_partial: None,
                        }
                    }
                }
            }
            State::TrySecondary {
                primary_failure,
                primary_partial,
            } => {
                let res = extract_with(secondary, doc)?;
                match (res.status, primary_partial) {
                    (ExtractionStatus::Failure, Some(partial)) => {
                        warn!(
                            "{} also failed on {}; keeping partial {} result",
                            secondary.method(),
                            doc.file_name(),
                            partial.extraction_method
                        );
                        return Ok(partial);
                    }
                    (ExtractionStatus::Failure, None) => {
                        let mut failures: Vec<BackendFailure> =
                            primary_failure.into_iter().collect();
                        failures.push(failure_of(&res));
                        State::Failed(failures)
                    }
                    (_, Some(partial)) if partial.degraded_pages() <= res.degraded_pages() => {
                        return Ok(partial);
                    }
                    _ => {
                        info!("using {} result for {}", res.extraction_method, doc.file_name());
                        return Ok(res);
                    }
                }
            }
            State::Failed(failures) => {
                warn!("all extraction backends failed for {}", doc.file_name());
                return Err(ExtractError::AllBackendsFailed {
                    name: doc.file_name().to_string(),
                    failures,
                });
            }
        };
    }
}

fn failure_of(res: &ExtractionResult) -> BackendFailure {
    BackendFailure {
        method: res.extraction_method,
        reason: res
            .failure
            .clone()
            .unwrap_or_else(|| "backend reported failure without a reason".to_string()),
    }
}
