use serde::{Deserialize, Serialize};

/// Role name that matches every caller, including anonymous ones.
pub const WILDCARD_ROLE: &str = "*";

/// What happens when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn is_allow(self) -> bool {
        matches!(self, Effect::Allow)
    }
}

/// One entry of an app's ordered access policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicyRule {
    /// Regular expressions searched against the request path
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Role names, `*` matches anyone
    #[serde(default)]
    pub roles: Vec<String>,

    /// Lower-case HTTP verbs (`get`, `post`, `options`, ...)
    #[serde(default)]
    pub actions: Vec<String>,

    pub effect: Effect,
}

impl AccessPolicyRule {
    /// Shorthand for an `allow` rule.
    pub fn allow<P, R, A>(patterns: P, roles: R, actions: A) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            roles: roles.into_iter().map(Into::into).collect(),
            actions: actions.into_iter().map(Into::into).collect(),
            effect: Effect::Allow,
        }
    }

    /// Same rule with a `deny` effect.
    pub fn denying(mut self) -> Self {
        self.effect = Effect::Deny;
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.roles.iter().any(|r| r == WILDCARD_ROLE)
    }
}
