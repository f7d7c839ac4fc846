use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_]+)").expect("mention pattern is valid"));

/// Usernames mentioned as `@name`, de-duplicated in first-seen order.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    MENTION
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
