//! Log substrings that mark a repository as unbuildable.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoisonRule {
    pub needle: String,
    /// Shown to users instead of the generic `failed` status.
    pub reason: String,
}

impl PoisonRule {
    pub fn new(needle: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            needle: needle.into(),
            reason: reason.into(),
        }
    }
}

pub fn default_poison_rules() -> Vec<PoisonRule> {
    vec![
        PoisonRule::new(
            "could not read Username for 'https://github.com': No such device or address",
            "unable to build private repositories",
        ),
        PoisonRule::new(
            "no buildable Go source files in",
            "no buildable source files present",
        ),
    ]
}

/// First rule whose needle occurs in the log.
pub fn find_poison<'a>(log: &str, rules: &'a [PoisonRule]) -> Option<&'a PoisonRule> {
    rules.iter().find(|rule| log.contains(&rule.needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_private_repository() {
        let log = "Cloning...\nfatal: could not read Username for 'https://github.com': No such device or address\n";
        let rules = default_poison_rules();
        let rule = find_poison(log, &rules).unwrap();
        assert_eq!(rule.reason, "unable to build private repositories");
    }

    #[test]
    fn test_clean_log_has_no_poison() {
        assert!(find_poison("go build ./...\nok\n", &default_poison_rules()).is_none());
    }
}
