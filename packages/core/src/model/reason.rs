//! The `Reason` a resize is proposed, and its priority ordering (§3, §4.4, §9).
//!
//! §9's open question flags that the original dispatcher relied on the
//! lexical ordering of the reason strings (`critical < high < low`
//! happens to hold alphabetically). This makes the priority explicit: the
//! enum's declaration order *is* its `Ord`, and the resize-execution claim
//! query (§4.4) orders by this discriminant rather than a string column.

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "operation_reason", rename_all = "snake_case")]
#[repr(u8)]
pub enum Reason {
    Critical = 0,
    High = 1,
    Low = 2,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Critical => "critical",
            Reason::High => "high",
            Reason::Low => "low",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_outranks_high_outranks_low() {
        assert!(Reason::Critical < Reason::High);
        assert!(Reason::High < Reason::Low);
    }

    #[test]
    fn ordering_does_not_depend_on_string_spelling() {
        let mut reasons = vec![Reason::Low, Reason::Critical, Reason::High];
        reasons.sort();
        assert_eq!(reasons, vec![Reason::Critical, Reason::High, Reason::Low]);
    }
}
