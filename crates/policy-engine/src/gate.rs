use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::access::AccessMatcher;
use crate::decision::{FilterOutcome, Layer, Verdict};
use crate::evaluator::ContentFilter;
use crate::path::decode_path;
use crate::request::{AdmissionRequest, Operation};

/// Order in which the two policy layers are consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precedence {
    /// The access matcher runs first and its denial is final; the content
    /// filter can only narrow what the matcher admitted.
    #[default]
    FilterAfterGate,
    /// The content filter runs first; an explicit authorization from it
    /// skips the access matcher for that request.
    FilterOverridesGate,
}

impl fmt::Display for Precedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Precedence::FilterAfterGate => "filter_after_gate",
            Precedence::FilterOverridesGate => "filter_overrides_gate",
        })
    }
}

impl FromStr for Precedence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filter_after_gate" => Ok(Precedence::FilterAfterGate),
            "filter_overrides_gate" => Ok(Precedence::FilterOverridesGate),
            other => Err(format!(
                "unknown precedence '{other}' (expected filter_after_gate or filter_overrides_gate)"
            )),
        }
    }
}

/// Composes the access matcher and the content filter into a single
/// admission decision.
///
/// Immutable after construction; share it behind an `Arc`.
#[derive(Debug)]
pub struct AdmissionGate {
    matcher: AccessMatcher,
    filter: ContentFilter,
    precedence: Precedence,
}

impl AdmissionGate {
    pub fn new(matcher: AccessMatcher, filter: ContentFilter, precedence: Precedence) -> Self {
        Self {
            matcher,
            filter,
            precedence,
        }
    }

    pub fn matcher(&self) -> &AccessMatcher {
        &self.matcher
    }

    pub fn filter(&self) -> &ContentFilter {
        &self.filter
    }

    pub fn precedence(&self) -> Precedence {
        self.precedence
    }

    /// Whether the request body must be buffered before [`evaluate`] can
    /// decide. Only create bodies are read, and not when the coarse matcher
    /// will reject the request anyway.
    ///
    /// [`evaluate`]: AdmissionGate::evaluate
    pub fn buffers_body(&self, method: &str, raw_path: &str) -> bool {
        let Ok(path) = decode_path(raw_path) else {
            return false;
        };
        if !Operation::classify(method, &path).is_some_and(Operation::inspects_body) {
            return false;
        }
        match self.precedence {
            Precedence::FilterAfterGate => self.matcher.is_allowed(method, &path),
            Precedence::FilterOverridesGate => true,
        }
    }

    /// Decide whether `req` may be forwarded.
    ///
    /// `req.path` is the raw path from the request line. It is percent-decoded
    /// once here and both layers see only the decoded form.
    pub fn evaluate(&self, req: &AdmissionRequest<'_>) -> Verdict {
        let path = match decode_path(req.path) {
            Ok(path) => path,
            Err(e) => {
                warn!(method = req.method, path = req.path, error = %e, "request path rejected");
                return Verdict::Malformed {
                    detail: e.to_string(),
                };
            }
        };
        let req = &AdmissionRequest { path: &path, ..*req };

        let verdict = match self.precedence {
            Precedence::FilterAfterGate => self.gate_then_filter(req),
            Precedence::FilterOverridesGate => self.filter_then_gate(req),
        };
        debug!(method = req.method, path = req.path, ?verdict, "admission decision");
        verdict
    }

    fn gate_then_filter(&self, req: &AdmissionRequest<'_>) -> Verdict {
        if !self.matcher.is_allowed(req.method, req.path) {
            return Verdict::AccessDenied;
        }
        match self.run_filter(req) {
            Ok(FilterOutcome::Denied { kind, denial }) => Verdict::ContentDenied { kind, denial },
            Ok(FilterOutcome::Authorized(_)) => Verdict::Admit {
                layer: Layer::Content,
            },
            Ok(FilterOutcome::NoOpinion) => Verdict::Admit {
                layer: Layer::Access,
            },
            Err(verdict) => verdict,
        }
    }

    fn filter_then_gate(&self, req: &AdmissionRequest<'_>) -> Verdict {
        match self.run_filter(req) {
            Ok(FilterOutcome::Denied { kind, denial }) => Verdict::ContentDenied { kind, denial },
            Ok(FilterOutcome::Authorized(_)) => Verdict::Admit {
                layer: Layer::Content,
            },
            Ok(FilterOutcome::NoOpinion) if self.matcher.is_allowed(req.method, req.path) => {
                Verdict::Admit {
                    layer: Layer::Access,
                }
            }
            Ok(FilterOutcome::NoOpinion) => Verdict::AccessDenied,
            Err(verdict) => verdict,
        }
    }

    fn run_filter(&self, req: &AdmissionRequest<'_>) -> Result<FilterOutcome, Verdict> {
        self.filter.evaluate(req).map_err(|e| {
            warn!(method = req.method, path = req.path, error = %e, "request body could not be inspected");
            Verdict::Malformed {
                detail: e.to_string(),
            }
        })
    }
}
