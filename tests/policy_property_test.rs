//! Property-based tests using proptest.
//!
//! These tests verify policy-engine invariants that should hold for any
//! request and any role set.

use proptest::prelude::*;

use forward_gate::policy::{check_access, AccessPolicyRule, PolicySet, WILDCARD_ROLE};

// ============================================================================
// Custom Strategies
// ============================================================================

/// Generate an HTTP method in arbitrary case
fn arb_method() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("get".to_string()),
        Just("GET".to_string()),
        Just("Post".to_string()),
        Just("delete".to_string()),
        Just("OPTIONS".to_string()),
        "[a-zA-Z]{3,7}".prop_map(|s| s),
    ]
}

/// Generate a request path
fn arb_path() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("/".to_string()),
        Just("/api/v0/status".to_string()),
        "(/[a-z0-9_]{1,8}){1,4}".prop_map(|s| s),
    ]
}

/// Generate a role name that is never the wildcard
fn arb_role() -> impl Strategy<Value = String> {
    "[a-z]{1,10}"
}

/// Generate an optional caller role list
fn arb_roles() -> impl Strategy<Value = Option<Vec<String>>> {
    prop::option::of(prop::collection::vec(arb_role(), 0..4))
}

/// Generate an arbitrary rule over simple patterns
fn arb_rule() -> impl Strategy<Value = AccessPolicyRule> {
    (
        prop::collection::vec("\\^/[a-z]{0,4}", 1..3),
        prop::collection::vec(
            prop_oneof![Just(WILDCARD_ROLE.to_string()), arb_role()],
            0..3,
        ),
        prop::collection::vec(
            prop_oneof![Just("get"), Just("post"), Just("delete")].prop_map(String::from),
            1..3,
        ),
        any::<bool>(),
    )
        .prop_map(|(patterns, roles, actions, allow)| {
            let rule = AccessPolicyRule::allow(patterns, roles, actions);
            if allow {
                rule
            } else {
                rule.denying()
            }
        })
}

fn match_everything(roles: &[&str]) -> AccessPolicyRule {
    AccessPolicyRule::allow(
        [""],
        roles.iter().copied(),
        ["get", "post", "delete", "options", "patch", "put", "head"],
    )
}

// ============================================================================
// Invariants
// ============================================================================

proptest! {
    /// An empty policy denies everything.
    #[test]
    fn prop_empty_policy_denies(method in arb_method(), path in arb_path(), roles in arb_roles()) {
        prop_assert!(!check_access(&[], &method, &path, roles.as_deref()));
    }

    /// A matching wildcard allow admits anonymous callers.
    #[test]
    fn prop_wildcard_admits_anyone(path in arb_path(), roles in arb_roles()) {
        let rules = vec![match_everything(&[WILDCARD_ROLE])];

        prop_assert!(check_access(&rules, "GET", &path, roles.as_deref()));
        prop_assert!(check_access(&rules, "GET", &path, None));
    }

    /// Without roles, a rule naming only concrete roles never matches.
    #[test]
    fn prop_no_roles_fail_concrete_rules(
        method in arb_method(),
        path in arb_path(),
        required in prop::collection::vec(arb_role(), 1..4),
    ) {
        let rules = vec![AccessPolicyRule::allow([""], required, [method.to_lowercase()])];
        let empty: Vec<String> = Vec::new();

        prop_assert!(!check_access(&rules, &method, &path, None));
        prop_assert!(!check_access(&rules, &method, &path, Some(empty.as_slice())));
    }

    /// A caller holding one of the rule's roles is allowed.
    #[test]
    fn prop_shared_role_allows(
        path in arb_path(),
        mut held in prop::collection::vec(arb_role(), 0..3),
        required in arb_role(),
    ) {
        held.push(required.clone());
        let rules = vec![AccessPolicyRule::allow([""], [required], ["get"])];

        prop_assert!(check_access(&rules, "get", &path, Some(held.as_slice())));
    }

    /// Method matching ignores case.
    #[test]
    fn prop_method_case_insensitive(
        method in arb_method(),
        path in arb_path(),
        rules in prop::collection::vec(arb_rule(), 0..5),
        roles in arb_roles(),
    ) {
        let policy = PolicySet::compile(&rules);
        prop_assert_eq!(
            policy.check(&method.to_uppercase(), &path, roles.as_deref()),
            policy.check(&method.to_lowercase(), &path, roles.as_deref()),
        );
    }

    /// The first matching rule decides; later rules cannot override it.
    #[test]
    fn prop_first_match_wins(
        method in arb_method(),
        path in arb_path(),
        rules in prop::collection::vec(arb_rule(), 0..5),
        roles in arb_roles(),
    ) {
        let denied = {
            let mut all = vec![match_everything(&[WILDCARD_ROLE]).denying()];
            all.extend(rules.iter().cloned());
            all
        };
        let decision = PolicySet::compile(&denied).check(&method, &path, roles.as_deref());
        if ["get", "post", "delete", "options", "patch", "put", "head"]
            .contains(&method.to_lowercase().as_str())
        {
            prop_assert!(!decision.allowed);
            prop_assert_eq!(decision.rule, Some(0));
        }

        let policy = PolicySet::compile(&rules);
        let before = policy.check(&method, &path, roles.as_deref());
        if before.rule.is_some() {
            let mut extended = rules.clone();
            extended.push(match_everything(&[WILDCARD_ROLE]));
            let after = PolicySet::compile(&extended).check(&method, &path, roles.as_deref());
            prop_assert_eq!(before, after);
        }
    }

    /// Compiling once and evaluating many times agrees with one-shot checks.
    #[test]
    fn prop_compiled_matches_one_shot(
        method in arb_method(),
        path in arb_path(),
        rules in prop::collection::vec(arb_rule(), 0..5),
        roles in arb_roles(),
    ) {
        let policy = PolicySet::compile(&rules);
        prop_assert_eq!(
            policy.check(&method, &path, roles.as_deref()).allowed,
            check_access(&rules, &method, &path, roles.as_deref()),
        );
    }
}
