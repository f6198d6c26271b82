//! Group to role mapping

use adauth_core::ROLE_PREFIX;
use std::collections::HashSet;

/// Map directory group names to role identifiers.
///
/// `"Domain Admins"` becomes `"ROLE_DOMAIN_ADMINS"`. Output keeps first-seen
/// order. Only byte-identical group names are collapsed; two different names
/// that transform to the same role are both kept.
pub fn map_roles<S: AsRef<str>>(groups: &[S]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(groups.len());
    let mut roles = Vec::with_capacity(groups.len());

    for group in groups {
        let group = group.as_ref();
        if seen.insert(group) {
            roles.push(role_for_group(group));
        }
    }

    roles
}

/// Role identifier for a single group name
pub fn role_for_group(group: &str) -> String {
    format!("{}{}", ROLE_PREFIX, group.replace(' ', "_").to_ascii_uppercase())
}
