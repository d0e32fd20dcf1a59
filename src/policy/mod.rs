//! Access policy engine
//!
//! An app's policy is an ordered list of [`AccessPolicyRule`]s. Evaluation is
//! first-match: the first rule whose action, path pattern and role set all
//! match decides the outcome, and an exhausted list denies. An earlier broad
//! rule shadows any narrower rule after it.

mod rule;

pub use rule::*;

use regex::Regex;
use tracing::warn;

/// Outcome of evaluating a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,

    /// Index of the deciding rule, `None` for the implicit deny
    pub rule: Option<usize>,
}

impl Decision {
    const IMPLICIT_DENY: Decision = Decision {
        allowed: false,
        rule: None,
    };
}

#[derive(Debug)]
struct CompiledRule {
    patterns: Vec<Regex>,
    roles: Vec<String>,
    wildcard: bool,
    actions: Vec<String>,
    effect: Effect,
}

impl CompiledRule {
    fn matches_action(&self, method: &str) -> bool {
        self.actions.iter().any(|a| a == method)
    }

    fn matches_path(&self, path: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(path))
    }

    fn matches_roles(&self, roles: Option<&[String]>) -> bool {
        if self.wildcard {
            return true;
        }
        match roles {
            Some(roles) if !roles.is_empty() => roles.iter().any(|r| self.roles.contains(r)),
            _ => false,
        }
    }
}

/// A compiled, ready-to-evaluate policy.
#[derive(Debug, Default)]
pub struct PolicySet {
    rules: Vec<CompiledRule>,
}

impl PolicySet {
    /// Compile a rule list. Patterns that fail to compile are dropped (they
    /// can never match) and logged.
    pub fn compile(rules: &[AccessPolicyRule]) -> Self {
        let rules = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| CompiledRule {
                patterns: rule
                    .patterns
                    .iter()
                    .filter_map(|p| match Regex::new(p) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            warn!(rule = index, pattern = %p, error = %e, "Invalid policy pattern");
                            None
                        }
                    })
                    .collect(),
                roles: rule.roles.clone(),
                wildcard: rule.is_wildcard(),
                actions: rule.actions.iter().map(|a| a.to_lowercase()).collect(),
                effect: rule.effect,
            })
            .collect();

        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate a request against the policy.
    pub fn check(&self, method: &str, path: &str, roles: Option<&[String]>) -> Decision {
        let method = method.to_lowercase();

        self.rules
            .iter()
            .position(|rule| {
                rule.matches_action(&method)
                    && rule.matches_path(path)
                    && rule.matches_roles(roles)
            })
            .map(|index| Decision {
                allowed: self.rules[index].effect.is_allow(),
                rule: Some(index),
            })
            .unwrap_or(Decision::IMPLICIT_DENY)
    }
}

/// Compile and evaluate in one step.
pub fn check_access(
    rules: &[AccessPolicyRule],
    method: &str,
    path: &str,
    roles: Option<&[String]>,
) -> bool {
    PolicySet::compile(rules).check(method, path, roles).allowed
}
