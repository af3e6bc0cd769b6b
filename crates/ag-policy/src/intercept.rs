// intercept.rs — The call surface external collaborators hit before a
// sensitive action.
//
// Stateless apart from the session's agent identity: builds a
// ValidationRequest, forwards it to the evaluator, and hands back the
// decision. On deny the caller must refuse and show the rationale.

use std::sync::Arc;

use ag_identity::AgentIdentity;

use crate::error::{InterceptError, ValidationError};
use crate::evaluator::{PolicyEvaluator, ValidationRequest, ValidationResult};

pub struct CommandInterceptor {
    evaluator: Arc<PolicyEvaluator>,
    identity: AgentIdentity,
}

impl CommandInterceptor {
    pub fn new(evaluator: Arc<PolicyEvaluator>, identity: AgentIdentity) -> Self {
        Self {
            evaluator,
            identity,
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Ask whether `operation` on `target` may proceed.
    pub fn intercept(
        &self,
        operation: &str,
        target: &str,
    ) -> Result<ValidationResult, ValidationError> {
        let request =
            ValidationRequest::new(operation, target).with_identity(self.identity.clone());
        let result = self.evaluator.evaluate(request)?;

        if result.is_denied() {
            tracing::warn!(
                agent = %self.identity.name,
                operation,
                target,
                rule_id = result.rule_id(),
                rationale = %result.rationale,
                "operation denied"
            );
        } else {
            tracing::debug!(agent = %self.identity.name, operation, target, "operation allowed");
        }
        Ok(result)
    }

    /// Decide several `(operation, target)` pairs against one rule-set
    /// snapshot. Results keep input order.
    pub fn intercept_batch<O, T>(
        &self,
        requests: &[(O, T)],
    ) -> Vec<Result<ValidationResult, ValidationError>>
    where
        O: AsRef<str>,
        T: AsRef<str>,
    {
        let results = self.evaluator.evaluate_batch(requests.iter().map(|(op, target)| {
            ValidationRequest::new(op.as_ref(), target.as_ref()).with_identity(self.identity.clone())
        }));
        let denied = results
            .iter()
            .filter(|r| matches!(r, Ok(result) if result.is_denied()))
            .count();
        tracing::debug!(
            agent = %self.identity.name,
            requests = results.len(),
            denied,
            "batch decided"
        );
        results
    }

    /// Like [`intercept`](Self::intercept), but a deny is an error so
    /// callers can bail out with `?`.
    pub fn guard(&self, operation: &str, target: &str) -> Result<ValidationResult, InterceptError> {
        let result = self.intercept(operation, target)?;
        if result.is_denied() {
            return Err(InterceptError::Refused {
                rule_id: result.rule_id().to_string(),
                rationale: result.rationale,
            });
        }
        Ok(result)
    }
}
