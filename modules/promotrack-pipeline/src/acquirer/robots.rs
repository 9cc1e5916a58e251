//! Minimal robots.txt evaluation for the `User-agent: *` group.

/// Allow/disallow rules that apply to every crawler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq)]
struct Rule {
    allow: bool,
    pattern: String,
}

impl RobotsRules {
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse a robots.txt body, keeping only the wildcard group(s).
    pub fn parse(body: &str) -> Self {
        let mut rules = Vec::new();
        let mut in_wildcard_group = false;
        let mut group_has_rules = false;

        for raw in body.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            match field.as_str() {
                "user-agent" => {
                    // A user-agent line after rules starts a new group.
                    if group_has_rules {
                        in_wildcard_group = false;
                        group_has_rules = false;
                    }
                    if value == "*" {
                        in_wildcard_group = true;
                    }
                }
                "allow" | "disallow" => {
                    group_has_rules = true;
                    if in_wildcard_group && !value.is_empty() {
                        rules.push(Rule {
                            allow: field == "allow",
                            pattern: value.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }

        Self { rules }
    }

    /// Longest matching pattern wins; `Allow` wins a tie.
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut best: Option<(usize, bool)> = None;
        for rule in &self.rules {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            let len = rule.pattern.len();
            best = match best {
                Some((best_len, best_allow))
                    if best_len > len || (best_len == len && best_allow) =>
                {
                    Some((best_len, best_allow))
                }
                _ => Some((len, rule.allow)),
            };
        }
        best.map(|(_, allow)| allow).unwrap_or(true)
    }
}

/// Prefix match supporting `*` wildcards and a trailing `$` anchor.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };

    let remaining: Vec<&str> = parts.collect();
    for (i, part) in remaining.iter().enumerate() {
        let is_last = i + 1 == remaining.len();
        if is_last && anchored {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }

    !anchored || rest.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROBOTS: &str = "\
User-agent: Googlebot
Disallow: /

User-agent: *
Disallow: /checkout
Disallow: /*.pdf$
Allow: /checkout/help
";

    #[test]
    fn only_wildcard_group_applies() {
        let rules = RobotsRules::parse(ROBOTS);
        assert!(rules.is_allowed("/"));
        assert!(rules.is_allowed("/sale"));
    }

    #[test]
    fn longest_match_wins() {
        let rules = RobotsRules::parse(ROBOTS);
        assert!(!rules.is_allowed("/checkout/cart"));
        assert!(rules.is_allowed("/checkout/help/faq"));
    }

    #[test]
    fn wildcards_and_anchor() {
        let rules = RobotsRules::parse(ROBOTS);
        assert!(!rules.is_allowed("/files/catalog.pdf"));
        assert!(rules.is_allowed("/files/catalog.pdf?download=1"));
    }

    #[test]
    fn empty_disallow_allows_everything() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow:\n");
        assert!(rules.is_allowed("/anything"));
    }

    #[test]
    fn disallow_root_blocks_everything() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /\n");
        assert!(!rules.is_allowed("/"));
        assert!(!rules.is_allowed("/deals"));
    }
}
