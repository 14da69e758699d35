//! Client-certificate auto-selection policy.
//!
//! Chrome accepts a per-launch `--auto-select-certificate-for-urls` switch
//! whose value is a JSON list of `{pattern, filter}` entries. When the
//! gateway requests a client certificate and exactly one installed
//! certificate matches the filter, the browser answers the TLS prompt
//! without showing any dialog.

use serde::Serialize;

use crate::certs::SelectionFilter;

/// One entry of the auto-selection policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoSelectRule {
    /// URL pattern of the origin that requests the certificate.
    pub pattern: String,
    /// Certificate filter.
    pub filter: RuleFilter,
}

/// Subject/issuer constraints of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFilter {
    /// Subject constraint.
    #[serde(rename = "SUBJECT", skip_serializing_if = "Option::is_none")]
    pub subject: Option<NameFilter>,
    /// Issuer constraint.
    #[serde(rename = "ISSUER", skip_serializing_if = "Option::is_none")]
    pub issuer: Option<NameFilter>,
}

/// Distinguished-name attribute constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameFilter {
    /// Common name.
    #[serde(rename = "CN")]
    pub common_name: String,
}

impl AutoSelectRule {
    /// Builds a rule for `pattern` matching the filter's subject and issuer.
    /// Empty names are left unconstrained.
    #[must_use]
    pub fn new(pattern: &str, filter: &SelectionFilter) -> Self {
        let name = |cn: &str| {
            let cn = cn.trim();
            (!cn.is_empty()).then(|| NameFilter {
                common_name: cn.to_string(),
            })
        };
        Self {
            pattern: pattern.to_string(),
            filter: RuleFilter {
                subject: name(&filter.subject_cn),
                issuer: name(&filter.issuer_cn),
            },
        }
    }
}

/// Renders the policy for `patterns` as the JSON value of the browser
/// switch.
#[must_use]
pub fn auto_select_policy(patterns: &[String], filter: &SelectionFilter) -> String {
    let rules: Vec<AutoSelectRule> = patterns
        .iter()
        .map(|pattern| AutoSelectRule::new(pattern, filter))
        .collect();
    // Plain structs with string fields always serialize.
    serde_json::to_string(&rules).unwrap_or_else(|_| "[]".to_string())
}
