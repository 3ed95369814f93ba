/// Strips a trailing `#` comment and surrounding whitespace from one line of
/// a keel project file. `\#` escapes a literal hash inside the data portion.
pub fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'#') {
            out.push('#');
            chars.next();
            continue;
        }
        if c == '#' {
            break;
        }
        out.push(c);
    }
    out.trim().to_string()
}

pub fn data_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(strip_comment)
        .filter(|l| !l.is_empty())
        .collect()
}

/// Splits `name@expression` into its parts. A line without `@` is a bare
/// name. An empty name (e.g. `@1.2.3`) yields `None`; such lines are inert.
pub fn split_entry(data: &str) -> Option<(String, Option<String>)> {
    let (name, expr) = match data.split_once('@') {
        Some((n, e)) => (n.trim(), Some(e.trim().to_string())),
        None => (data.trim(), None),
    };
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), expr.filter(|e| !e.is_empty())))
}

#[cfg(test)]
mod tests {
    use super::{data_lines, split_entry, strip_comment};

    #[test]
    fn strip_comment_trims_and_drops_trailing_comment() {
        assert_eq!(strip_comment("  alpha@1.2  # pinned"), "alpha@1.2");
        assert_eq!(strip_comment("# whole line"), "");
        assert_eq!(strip_comment("   "), "");
    }

    #[test]
    fn escaped_hash_stays_in_data() {
        assert_eq!(strip_comment("weird\\#name # but not this"), "weird#name");
    }

    #[test]
    fn data_lines_skips_blanks_and_comments() {
        let text = "# header\n\nalpha\nbeta@^2 # note\n";
        assert_eq!(data_lines(text), vec!["alpha", "beta@^2"]);
    }

    #[test]
    fn split_entry_handles_bare_and_versioned_names() {
        assert_eq!(split_entry("alpha"), Some(("alpha".into(), None)));
        assert_eq!(
            split_entry("alpha@^1.2"),
            Some(("alpha".into(), Some("^1.2".into())))
        );
        assert_eq!(split_entry("alpha@"), Some(("alpha".into(), None)));
        assert_eq!(split_entry("@1.2.3"), None);
        assert_eq!(split_entry(""), None);
    }
}
