//! Strategic-customer rule parsing: `get_planning_setting("strategic_customers")`
//! returns newline-separated `Label|PATTERN1,PATTERN2` entries.
//! Parsing must be bin-exact: patterns are uppercased, punctuation stripped,
//! whitespace collapsed.

use crate::domain::StrategicCustomer;

/// Normalize a customer name (or raw pattern) for matching: uppercase,
/// strip anything that isn't alphanumeric or space, collapse runs of
/// whitespace to a single space, trim.
pub fn normalize(raw: &str) -> String {
    let upper = raw.to_uppercase();
    let stripped: String = upper
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse the `strategic_customers` planning setting text into a compiled
/// pattern list. Blank lines and lines starting with `#` are comments.
/// Per-line syntax: `Label|PATTERN1,PATTERN2,...`. Flags beyond the base
/// patterns aren't encoded in this text format; a full rule set also keyed
/// by `label` can be supplied separately via `StrategicRules` and merged in.
pub fn parse_patterns(text: &str) -> Vec<(String, Vec<String>)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (label, patterns_csv) = line.split_once('|')?;
            let patterns: Vec<String> = patterns_csv
                .split(',')
                .map(|p| normalize(p.trim()))
                .filter(|p| !p.is_empty())
                .collect();
            Some((label.trim().to_string(), patterns))
        })
        .collect()
}

/// A compiled, ready-to-match strategic customer list. Holds the flags from
/// `StrategicCustomer` keyed by `label` so `compile` can join the parsed
/// patterns text against admin-edited flag rows.
#[derive(Debug, Clone, Default)]
pub struct StrategicRules {
    customers: Vec<StrategicCustomer>,
}

impl StrategicRules {
    /// Build a compiled rule set directly from full `StrategicCustomer` rows
    /// (flags + patterns already joined, as the storage layer would return
    /// them). Patterns are normalized once here.
    pub fn new(mut customers: Vec<StrategicCustomer>) -> Self {
        for c in &mut customers {
            c.patterns = c.patterns.iter().map(|p| normalize(p)).collect();
        }
        Self { customers }
    }

    /// Join raw `strategic_customers` setting text against a flags table
    /// keyed by label, for callers that only have the bare text format plus
    /// a separate admin flags source.
    pub fn from_text_and_flags(text: &str, flags_by_label: &[StrategicCustomer]) -> Self {
        let parsed = parse_patterns(text);
        let mut customers = Vec::with_capacity(parsed.len());
        for (label, patterns) in parsed {
            let flags = flags_by_label
                .iter()
                .find(|c| c.label.eq_ignore_ascii_case(&label));
            customers.push(StrategicCustomer {
                key: flags.map(|f| f.key.clone()).unwrap_or_else(|| label.clone()),
                label: label.clone(),
                patterns,
                default_due_date_flex_days: flags.and_then(|f| f.default_due_date_flex_days),
                no_mix: flags.map(|f| f.no_mix).unwrap_or(false),
                default_wedge_51: flags.map(|f| f.default_wedge_51).unwrap_or(false),
                requires_return_to_origin: flags.map(|f| f.requires_return_to_origin).unwrap_or(false),
                ignore_for_optimization: flags.map(|f| f.ignore_for_optimization).unwrap_or(false),
            });
        }
        Self { customers }
    }

    /// Match `cust_name` against every compiled pattern list, case-insensitively
    /// (both sides already normalized), substring match. First match wins.
    pub fn match_customer(&self, cust_name: &str) -> Option<&StrategicCustomer> {
        let normalized = normalize(cust_name);
        self.customers
            .iter()
            .find(|c| c.patterns.iter().any(|p| normalized.contains(p.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_punctuation_and_whitespace() {
        assert_eq!(normalize("Lowe's  Home   Centers, Inc."), "LOWE S HOME CENTERS INC");
    }

    #[test]
    fn parses_label_pattern_lines_and_skips_comments() {
        let text = "# comment\nLowe's|LOWES,LOWE'S HOME\n\nJoe's Hardware|JOES HARDWARE\n";
        let parsed = parse_patterns(text);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, "Lowe's");
        assert_eq!(parsed[0].1, vec!["LOWES".to_string(), "LOWE S HOME".to_string()]);
    }

    #[test]
    fn matches_case_insensitively_by_substring() {
        let customers = vec![StrategicCustomer {
            key: "lowes".into(),
            label: "Lowe's".into(),
            patterns: vec!["LOWES".into()],
            default_due_date_flex_days: None,
            no_mix: true,
            default_wedge_51: false,
            requires_return_to_origin: true,
            ignore_for_optimization: false,
        }];
        let rules = StrategicRules::new(customers);
        let found = rules.match_customer("lowes home centers #4821").unwrap();
        assert!(found.no_mix);
        assert!(found.requires_return_to_origin);
    }
}
