//! Rule matching: determines whether an [`Alert`] matches an [`AlertRule`].
//!
//! Each filter field in a rule is optional. When present, it must match for the
//! rule to fire. When absent, that dimension is unconstrained. All present
//! filters must match (logical AND).

use glob::Pattern;
use verity_types::AlertRule;

use crate::Alert;

/// Check whether an alert matches all filters of an alert rule.
pub fn matches(rule: &AlertRule, alert: &Alert) -> bool {
    if !rule.kinds.is_empty() && !rule.kinds.contains(&alert.kind) {
        return false;
    }

    if alert.severity < rule.min_severity {
        return false;
    }

    if let Some(ref stream_glob) = rule.stream_glob {
        // An invalid pattern skips the filter instead of silencing the rule.
        if let Ok(pattern) = Pattern::new(stream_glob) {
            if !pattern.matches(alert.stream_id.as_str()) {
                return false;
            }
        }
    }

    true
}
