//! Exception policies and their resolution.
//!
//! A policy claims a set of failure kinds and says what to do when a
//! matching failure is caught: retry it, mark it handled, or continue
//! past it. Policies are collected into scopes ordered outermost to
//! innermost; resolution prefers the most specific kind match, then the
//! innermost scope.

use crate::errorhandler::RedeliveryPolicy;
use crate::errors::ConfigError;
use crate::exchange::{Exchange, FailureKind};
use crate::processor::Processor;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A runtime predicate over the exchange.
pub type Predicate = Arc<dyn Fn(&Exchange) -> bool + Send + Sync>;

/// A policy decision: fixed at build time or evaluated per exchange.
#[derive(Clone)]
pub enum PolicyDecision {
    /// Always the given answer.
    Fixed(bool),
    /// Evaluated against the exchange when the failure is caught.
    When(Predicate),
}

impl PolicyDecision {
    /// Evaluates the decision for the given exchange.
    #[must_use]
    pub fn evaluate(&self, exchange: &Exchange) -> bool {
        match self {
            Self::Fixed(value) => *value,
            Self::When(predicate) => predicate(exchange),
        }
    }
}

impl fmt::Debug for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(value) => f.debug_tuple("Fixed").field(value).finish(),
            Self::When(_) => f.write_str("When(..)"),
        }
    }
}

/// What to do when a failure matching one of `kinds` is caught.
#[derive(Clone)]
pub struct ExceptionPolicy {
    kinds: Vec<FailureKind>,
    only_when: Option<Predicate>,
    handled: PolicyDecision,
    continued: PolicyDecision,
    retry_while: Option<Predicate>,
    redelivery: Option<RedeliveryPolicy>,
    on_redelivery: Option<Arc<dyn Processor>>,
    on_exhausted: Option<Arc<dyn Processor>>,
}

impl ExceptionPolicy {
    /// Starts a policy claiming the given failure kind.
    #[must_use]
    pub fn for_kind(kind: impl Into<FailureKind>) -> Self {
        Self {
            kinds: vec![kind.into()],
            only_when: None,
            handled: PolicyDecision::Fixed(false),
            continued: PolicyDecision::Fixed(false),
            retry_while: None,
            redelivery: None,
            on_redelivery: None,
            on_exhausted: None,
        }
    }

    /// Adds another claimed failure kind.
    #[must_use]
    pub fn also_for(mut self, kind: impl Into<FailureKind>) -> Self {
        self.kinds.push(kind.into());
        self
    }

    /// Restricts the policy to exchanges matching the predicate. A
    /// non-matching policy is skipped during resolution.
    #[must_use]
    pub fn only_when(mut self, predicate: impl Fn(&Exchange) -> bool + Send + Sync + 'static) -> Self {
        self.only_when = Some(Arc::new(predicate));
        self
    }

    /// Marks caught failures as handled: the failure is cleared and the
    /// exchange completes successfully.
    #[must_use]
    pub fn handled(mut self, handled: bool) -> Self {
        self.handled = PolicyDecision::Fixed(handled);
        self
    }

    /// Like [`handled`](Self::handled), decided per exchange.
    #[must_use]
    pub fn handled_when(mut self, predicate: impl Fn(&Exchange) -> bool + Send + Sync + 'static) -> Self {
        self.handled = PolicyDecision::When(Arc::new(predicate));
        self
    }

    /// Marks caught failures as continued: the failure is cleared and
    /// processing carries on as if the step had succeeded.
    #[must_use]
    pub fn continued(mut self, continued: bool) -> Self {
        self.continued = PolicyDecision::Fixed(continued);
        self
    }

    /// Like [`continued`](Self::continued), decided per exchange.
    #[must_use]
    pub fn continued_when(mut self, predicate: impl Fn(&Exchange) -> bool + Send + Sync + 'static) -> Self {
        self.continued = PolicyDecision::When(Arc::new(predicate));
        self
    }

    /// Overrides the redelivery limit with a per-exchange predicate:
    /// redelivery keeps going while the predicate holds.
    #[must_use]
    pub fn retry_while(mut self, predicate: impl Fn(&Exchange) -> bool + Send + Sync + 'static) -> Self {
        self.retry_while = Some(Arc::new(predicate));
        self
    }

    /// Attaches a redelivery policy governing retry timing and limits.
    #[must_use]
    pub fn with_redelivery(mut self, redelivery: RedeliveryPolicy) -> Self {
        self.redelivery = Some(redelivery);
        self
    }

    /// Runs the processor on the exchange before every redelivery attempt.
    #[must_use]
    pub fn on_redelivery(mut self, processor: Arc<dyn Processor>) -> Self {
        self.on_redelivery = Some(processor);
        self
    }

    /// Runs the processor on the exchange once retries are exhausted,
    /// before the handled/continued decision. Typically substitutes a
    /// fallback message.
    #[must_use]
    pub fn on_exhausted(mut self, processor: Arc<dyn Processor>) -> Self {
        self.on_exhausted = Some(processor);
        self
    }

    /// The failure kinds this policy claims.
    #[must_use]
    pub fn kinds(&self) -> &[FailureKind] {
        &self.kinds
    }

    /// The attached redelivery policy, if any.
    #[must_use]
    pub fn redelivery(&self) -> Option<&RedeliveryPolicy> {
        self.redelivery.as_ref()
    }

    /// The pre-redelivery hook, if any.
    #[must_use]
    pub fn redelivery_hook(&self) -> Option<&Arc<dyn Processor>> {
        self.on_redelivery.as_ref()
    }

    /// The exhaustion hook, if any.
    #[must_use]
    pub fn exhausted_hook(&self) -> Option<&Arc<dyn Processor>> {
        self.on_exhausted.as_ref()
    }

    /// Evaluates the handled decision.
    #[must_use]
    pub fn is_handled(&self, exchange: &Exchange) -> bool {
        self.handled.evaluate(exchange)
    }

    /// Evaluates the continued decision.
    #[must_use]
    pub fn is_continued(&self, exchange: &Exchange) -> bool {
        self.continued.evaluate(exchange)
    }

    /// Decides whether another redelivery should happen after
    /// `redelivery_count` attempts so far. A `retry_while` predicate
    /// overrides the counted limit.
    #[must_use]
    pub fn should_redeliver(&self, exchange: &Exchange, redelivery_count: u32) -> bool {
        if let Some(predicate) = &self.retry_while {
            return predicate(exchange);
        }
        self.redelivery
            .as_ref()
            .is_some_and(|policy| policy.should_redeliver(redelivery_count))
    }

    /// How specifically this policy matches `kind`: the depth of the
    /// deepest claimed kind that `kind` is-a, or `None` for no match.
    #[must_use]
    pub fn match_specificity(&self, kind: &FailureKind) -> Option<usize> {
        self.kinds
            .iter()
            .filter(|claimed| kind.is_a(claimed))
            .map(FailureKind::depth)
            .max()
    }

    fn applies_to(&self, exchange: &Exchange) -> bool {
        self.only_when
            .as_ref()
            .map_or(true, |predicate| predicate(exchange))
    }
}

impl fmt::Debug for ExceptionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionPolicy")
            .field("kinds", &self.kinds)
            .field("handled", &self.handled)
            .field("continued", &self.continued)
            .field("has_retry_while", &self.retry_while.is_some())
            .field("redelivery", &self.redelivery)
            .finish_non_exhaustive()
    }
}

/// Registry of exception policies, grouped into nested scopes.
///
/// Scopes are ordered outermost to innermost; resolution prefers the most
/// specific kind match across all scopes, breaking ties toward the
/// innermost scope.
#[derive(Debug)]
pub struct ErrorPolicyRegistry {
    scopes: Vec<Scope>,
}

#[derive(Debug)]
struct Scope {
    name: String,
    policies: Vec<ExceptionPolicy>,
}

impl ErrorPolicyRegistry {
    /// Starts an empty registry builder.
    #[must_use]
    pub fn builder() -> ErrorPolicyRegistryBuilder {
        ErrorPolicyRegistryBuilder { scopes: Vec::new() }
    }

    /// An empty registry: every failure resolves to no policy.
    #[must_use]
    pub fn empty() -> Self {
        Self { scopes: Vec::new() }
    }

    /// Resolves the policy for a caught failure of kind `kind` on the
    /// given exchange, or `None` if no applicable policy claims it.
    #[must_use]
    pub fn resolve(&self, exchange: &Exchange, kind: &FailureKind) -> Option<&ExceptionPolicy> {
        let mut best: Option<(usize, usize, &ExceptionPolicy)> = None;
        for (scope_idx, scope) in self.scopes.iter().enumerate() {
            for policy in &scope.policies {
                let Some(specificity) = policy.match_specificity(kind) else {
                    continue;
                };
                if !policy.applies_to(exchange) {
                    continue;
                }
                // Innermost scope wins ties on specificity.
                let rank = (specificity, scope_idx);
                if best.map_or(true, |(s, i, _)| rank >= (s, i)) {
                    best = Some((specificity, scope_idx, policy));
                }
            }
        }
        best.map(|(_, _, policy)| policy)
    }
}

/// Builder validating the registry before any exchange flows.
#[derive(Debug)]
pub struct ErrorPolicyRegistryBuilder {
    scopes: Vec<Scope>,
}

impl ErrorPolicyRegistryBuilder {
    /// Adds a scope of policies. Call order runs outermost to innermost.
    #[must_use]
    pub fn scope(mut self, name: impl Into<String>, policies: Vec<ExceptionPolicy>) -> Self {
        self.scopes.push(Scope {
            name: name.into(),
            policies,
        });
        self
    }

    /// Validates and builds the registry.
    ///
    /// Rejects a failure kind claimed by more than one policy within the
    /// same scope, and any invalid redelivery policy.
    pub fn build(self) -> Result<ErrorPolicyRegistry, ConfigError> {
        for scope in &self.scopes {
            let mut claimed: HashMap<&str, ()> = HashMap::new();
            for policy in &scope.policies {
                if let Some(redelivery) = policy.redelivery() {
                    redelivery.validate()?;
                }
                for kind in policy.kinds() {
                    if claimed.insert(kind.as_str(), ()).is_some() {
                        return Err(ConfigError::AmbiguousPolicy {
                            kind: kind.as_str().to_string(),
                            scope: scope.name.clone(),
                        });
                    }
                }
            }
        }
        Ok(ErrorPolicyRegistry {
            scopes: self.scopes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry(scopes: Vec<(&str, Vec<ExceptionPolicy>)>) -> ErrorPolicyRegistry {
        let mut builder = ErrorPolicyRegistry::builder();
        for (name, policies) in scopes {
            builder = builder.scope(name, policies);
        }
        builder.build().expect("valid registry")
    }

    fn kinds_of(policy: &ExceptionPolicy) -> Vec<&str> {
        policy.kinds().iter().map(FailureKind::as_str).collect()
    }

    #[test]
    fn test_most_specific_kind_wins() {
        let registry = registry(vec![(
            "route",
            vec![
                ExceptionPolicy::for_kind("io"),
                ExceptionPolicy::for_kind("io.file-not-found"),
            ],
        )]);

        let exchange = Exchange::one_way(json!(1));
        let resolved = registry
            .resolve(&exchange, &FailureKind::new("io.file-not-found"))
            .expect("resolved");
        assert_eq!(kinds_of(resolved), vec!["io.file-not-found"]);
    }

    #[test]
    fn test_supertype_matches_descendant_failures() {
        let registry = registry(vec![("route", vec![ExceptionPolicy::for_kind("io")])]);

        let exchange = Exchange::one_way(json!(1));
        let resolved = registry.resolve(&exchange, &FailureKind::new("io.timeout.read"));
        assert!(resolved.is_some());
    }

    #[test]
    fn test_unclaimed_kind_resolves_to_none() {
        let registry = registry(vec![("route", vec![ExceptionPolicy::for_kind("io")])]);

        let exchange = Exchange::one_way(json!(1));
        assert!(registry
            .resolve(&exchange, &FailureKind::new("validation"))
            .is_none());
    }

    #[test]
    fn test_inner_scope_wins_ties() {
        let registry = registry(vec![
            ("global", vec![ExceptionPolicy::for_kind("io").handled(true)]),
            ("route", vec![ExceptionPolicy::for_kind("io").handled(false)]),
        ]);

        let exchange = Exchange::one_way(json!(1));
        let resolved = registry
            .resolve(&exchange, &FailureKind::new("io"))
            .expect("resolved");
        assert!(!resolved.is_handled(&exchange));
    }

    #[test]
    fn test_outer_specific_beats_inner_general() {
        let registry = registry(vec![
            (
                "global",
                vec![ExceptionPolicy::for_kind("io.file-not-found").handled(true)],
            ),
            ("route", vec![ExceptionPolicy::for_kind("io").handled(false)]),
        ]);

        let exchange = Exchange::one_way(json!(1));
        let resolved = registry
            .resolve(&exchange, &FailureKind::new("io.file-not-found"))
            .expect("resolved");
        assert!(resolved.is_handled(&exchange));
    }

    #[test]
    fn test_only_when_skips_non_matching_policy() {
        let registry = registry(vec![(
            "route",
            vec![
                ExceptionPolicy::for_kind("io.file-not-found")
                    .only_when(|exchange| exchange.property("vip").is_some())
                    .handled(true),
                ExceptionPolicy::for_kind("io").handled(false),
            ],
        )]);

        let exchange = Exchange::one_way(json!(1));
        let resolved = registry
            .resolve(&exchange, &FailureKind::new("io.file-not-found"))
            .expect("falls through to the general policy");
        assert_eq!(kinds_of(resolved), vec!["io"]);
    }

    #[test]
    fn test_ambiguous_claims_rejected_at_build() {
        let result = ErrorPolicyRegistry::builder()
            .scope(
                "route",
                vec![
                    ExceptionPolicy::for_kind("io"),
                    ExceptionPolicy::for_kind("validation").also_for("io"),
                ],
            )
            .build();

        assert!(matches!(
            result,
            Err(ConfigError::AmbiguousPolicy { kind, scope })
                if kind == "io" && scope == "route"
        ));
    }

    #[test]
    fn test_same_kind_in_different_scopes_is_fine() {
        let result = ErrorPolicyRegistry::builder()
            .scope("global", vec![ExceptionPolicy::for_kind("io")])
            .scope("route", vec![ExceptionPolicy::for_kind("io")])
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_redelivery_rejected_at_build() {
        let result = ErrorPolicyRegistry::builder()
            .scope(
                "route",
                vec![ExceptionPolicy::for_kind("io")
                    .with_redelivery(RedeliveryPolicy::new().with_backoff_multiplier(0.1))],
            )
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidRedeliveryPolicy(_))
        ));
    }

    #[test]
    fn test_retry_while_overrides_counted_limit() {
        let policy = ExceptionPolicy::for_kind("io")
            .with_redelivery(RedeliveryPolicy::new().with_maximum_redeliveries(1))
            .retry_while(|exchange| exchange.redelivery_count() < 5);

        let mut exchange = Exchange::one_way(json!(1));
        for _ in 0..4 {
            exchange.increment_redelivery_count();
        }
        // Counted limit of 1 exceeded, but the predicate still holds.
        assert!(policy.should_redeliver(&exchange, exchange.redelivery_count()));
        exchange.increment_redelivery_count();
        assert!(!policy.should_redeliver(&exchange, exchange.redelivery_count()));
    }

    #[test]
    fn test_handled_when_evaluated_per_exchange() {
        let policy = ExceptionPolicy::for_kind("io")
            .handled_when(|exchange| exchange.property("forgive").is_some());

        let mut exchange = Exchange::one_way(json!(1));
        assert!(!policy.is_handled(&exchange));
        exchange.set_property("forgive", json!(true)).expect("mutable");
        assert!(policy.is_handled(&exchange));
    }

    #[test]
    fn test_no_redelivery_without_policy() {
        let policy = ExceptionPolicy::for_kind("io").handled(true);
        let exchange = Exchange::one_way(json!(1));
        assert!(!policy.should_redeliver(&exchange, 0));
    }
}
