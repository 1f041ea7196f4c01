//! Evaluation boundary
//!
//! Every flag evaluation passes through [`validate`] before the client is
//! touched, and the client's raw result is turned into a [`Treatment`] by
//! [`interpret`]. Both are synchronous; the provider calls them around a single
//! client lookup performed under the gate's shared lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::config::{CONTROL_TREATMENT, TARGETING_KEY};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::lifecycle::ProviderStatus;
use crate::traits::{Attributes, TreatmentResult};

/// Longest config preview included in a parse warning
const CONFIG_PREVIEW_CHARS: usize = 100;

/// Caller-supplied evaluation attributes, including the targeting key
pub type EvaluationContext = HashMap<String, serde_json::Value>;

/// Build an evaluation context holding only a targeting key
pub fn evaluation_context(targeting_key: impl Into<String>) -> EvaluationContext {
    let mut ctx = EvaluationContext::new();
    ctx.insert(
        TARGETING_KEY.to_string(),
        serde_json::Value::String(targeting_key.into()),
    );
    ctx
}

/// Successful evaluation outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    /// Treatment name served for the key
    pub variant: String,
    /// Parsed dynamic configuration, when present and well-formed
    pub config: Option<serde_json::Value>,
}

/// Check that an evaluation may proceed and extract the targeting key
///
/// # Errors
///
/// In order of precedence:
/// - [`Error::NotReady`] unless `status` is `Ready`
/// - [`Error::Cancelled`] when `ctx` is already cancelled or expired
/// - [`Error::TargetingKeyMissing`] when the key is absent
/// - [`Error::InvalidContext`] when the key is not a string
pub fn validate<'a>(
    status: ProviderStatus,
    ctx: &Context,
    eval_ctx: &'a EvaluationContext,
) -> Result<&'a str> {
    if status != ProviderStatus::Ready {
        return Err(Error::NotReady);
    }

    if let Some(cause) = ctx.err() {
        return Err(Error::Cancelled(cause));
    }

    match eval_ctx.get(TARGETING_KEY) {
        None => Err(Error::TargetingKeyMissing),
        Some(serde_json::Value::String(key)) => Ok(key.as_str()),
        Some(other) => Err(Error::invalid_context(format!(
            "targeting key must be a string, got {other}"
        ))),
    }
}

/// Attributes handed to the client: everything but the targeting key
pub fn client_attributes(eval_ctx: &EvaluationContext) -> Attributes {
    eval_ctx
        .iter()
        .filter(|(name, _)| name.as_str() != TARGETING_KEY)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Turn a raw client result into a [`Treatment`]
///
/// The control treatment and the empty treatment both mean the flag is
/// unknown to the client. Malformed dynamic configuration is dropped with a
/// warning rather than failing the evaluation.
pub fn interpret(flag: &str, result: TreatmentResult) -> Result<Treatment> {
    if result.treatment.is_empty() || result.treatment == CONTROL_TREATMENT {
        return Err(Error::flag_not_found(flag));
    }

    let config = result
        .config
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                let preview: String = raw.chars().take(CONFIG_PREVIEW_CHARS).collect();
                warn!(flag, error = %e, config_preview = %preview, "malformed dynamic configuration, ignoring");
                None
            }
        });

    Ok(Treatment {
        variant: result.treatment,
        config,
    })
}
