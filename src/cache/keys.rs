use std::collections::BTreeMap;

pub const SUBJECTS_ALL: &str = "subjects:all";
pub const STATS_SUBJECTS: &str = "stats:subjects";
pub const QUICK_LINKS_ALL: &str = "quick_links:all";

pub const LEADERBOARD: &str = "leaderboard";
pub const CURRICULUM: &str = "curriculum";

pub const LEADERBOARD_PARAMS: &[&str] = &[
    "admission_year",
    "name",
    "seat_number",
    "min_cgpa",
    "max_cgpa",
    "page",
    "limit",
    "sort_by",
    "sort_order",
    "semester",
    "view",
];

pub const CURRICULUM_PARAMS: &[&str] = &["year", "branch"];

/// An exact key plus the glob matching everything nested beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFamily {
    pub exact: String,
    pub pattern: String,
}

impl KeyFamily {
    pub fn new(exact: impl Into<String>) -> Self {
        let exact = exact.into();
        let pattern = format!("{}:*", escape_glob(&exact));
        Self { exact, pattern }
    }
}

/// Derive a cache key from a resource name and query parameters.
///
/// Only allow-listed parameters take part; blank values are dropped, values
/// are trimmed and parameters are sorted by name, so equivalent queries land
/// on the same key.
pub fn derive_key<'a, I>(resource: &str, allowed: &[&str], params: I) -> String
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let normalized: BTreeMap<&str, String> = params
        .into_iter()
        .filter(|(name, _)| allowed.contains(name))
        .map(|(name, value)| (name, value.trim().to_string()))
        .filter(|(_, value)| !value.is_empty())
        .collect();

    if normalized.is_empty() {
        return resource.to_string();
    }

    let mut key = resource.to_string();
    for (name, value) in normalized {
        key.push(':');
        key.push_str(name);
        key.push('=');
        key.push_str(&value);
    }
    key
}

pub fn subject_key(subject: &str, module: Option<&str>) -> String {
    match module.map(str::trim).filter(|m| !m.is_empty()) {
        Some(module) => format!("subject:{subject}:module={module}"),
        None => format!("subject:{subject}"),
    }
}

pub fn subject_family(subject: &str) -> KeyFamily {
    KeyFamily::new(subject_key(subject, None))
}

pub fn leaderboard_family() -> KeyFamily {
    KeyFamily::new(LEADERBOARD)
}

pub fn curriculum_family() -> KeyFamily {
    KeyFamily::new(CURRICULUM)
}

pub fn quick_links_subject_key(subject: &str) -> String {
    format!("quick_links:subject={subject}")
}

/// Keys to drop after a quick-link write: the "all" listing plus every
/// subject listing the link was or now is attached to.
pub fn quick_link_invalidation_keys(previous: &[String], current: &[String]) -> Vec<String> {
    let mut keys = vec![QUICK_LINKS_ALL.to_string()];
    for subject in previous.iter().chain(current.iter()) {
        let key = quick_links_subject_key(subject);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Redis-style glob: `*`, `?` and backslash escapes.
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, c));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                c += 1;
                continue;
            }
            Some('\\') if p + 1 < pattern.len() => {
                if pattern[p + 1] == candidate[c] {
                    p += 2;
                    c += 1;
                    continue;
                }
            }
            Some(ch) if *ch == candidate[c] => {
                p += 1;
                c += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star, matched)) => {
                p = star + 1;
                c = matched + 1;
                backtrack = Some((star, matched + 1));
            }
            None => return false,
        }
    }

    while pattern.get(p) == Some(&'*') {
        p += 1;
    }
    p == pattern.len()
}

pub fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equivalent_queries_share_a_key() {
        let first = derive_key(
            LEADERBOARD,
            LEADERBOARD_PARAMS,
            [
                ("page", "1".to_string()),
                ("admission_year", "2024".to_string()),
            ],
        );
        let second = derive_key(
            LEADERBOARD,
            LEADERBOARD_PARAMS,
            [
                ("admission_year", " 2024 ".to_string()),
                ("utm_source", "mail".to_string()),
                ("name", "".to_string()),
                ("page", "1".to_string()),
            ],
        );
        assert_eq!(first, second);
        assert_eq!(first, "leaderboard:admission_year=2024:page=1");
    }

    #[test]
    fn bare_resource_when_no_params_survive() {
        let key = derive_key(CURRICULUM, CURRICULUM_PARAMS, [("x", "1".to_string())]);
        assert_eq!(key, "curriculum");
    }

    #[test]
    fn subject_keys_nest_module() {
        assert_eq!(subject_key("dsa", None), "subject:dsa");
        assert_eq!(subject_key("dsa", Some("3")), "subject:dsa:module=3");
        assert_eq!(subject_key("dsa", Some(" ")), "subject:dsa");
        assert_eq!(subject_family("dsa").pattern, "subject:dsa:*");
    }

    #[test]
    fn quick_link_keys_cover_old_and_new_subjects() {
        let keys = quick_link_invalidation_keys(
            &["dsa".to_string(), "dbms".to_string()],
            &["dbms".to_string(), "os".to_string()],
        );
        assert_eq!(
            keys,
            vec![
                "quick_links:all",
                "quick_links:subject=dsa",
                "quick_links:subject=dbms",
                "quick_links:subject=os",
            ]
        );
    }

    #[test]
    fn glob_handles_wildcards_and_escapes() {
        assert!(glob_match("leaderboard:*", "leaderboard:page=2"));
        assert!(!glob_match("leaderboard:*", "leaderboard"));
        assert!(glob_match("subject:?sa", "subject:dsa"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
        assert!(glob_match(r"subject:c\*\*:*", "subject:c**:module=1"));
        assert!(!glob_match(r"subject:c\*\*:*", "subject:cpp:module=1"));
    }

    #[test]
    fn family_pattern_escapes_subject_name() {
        let family = subject_family("c*");
        assert_eq!(family.pattern, r"subject:c\*:*");
        assert!(glob_match(&family.pattern, "subject:c*:module=1"));
        assert!(!glob_match(&family.pattern, "subject:cpp:module=1"));
    }
}
