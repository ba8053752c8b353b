//! The text exposition of a metrics snapshot.
//!
//! Each metric becomes a `# TYPE <name> gauge` line followed by
//! `<name> <value>`. Names are normalized to `app_<lowercased>` with every
//! run of non-alphanumeric characters collapsed into a single underscore and
//! no leading or trailing underscore after the prefix.

use std::{collections::BTreeMap, fmt::Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metric `{name}` has a non-finite value")]
    NonFinite { name: String },
}

/// Renders a snapshot. A single non-finite value fails the whole scrape.
pub fn render(metrics: &BTreeMap<String, f64>) -> Result<String, MetricsError> {
    let mut out = String::new();
    for (name, value) in metrics {
        if !value.is_finite() {
            return Err(MetricsError::NonFinite { name: name.clone() });
        }
        let name = normalize(name);
        // writing to a String cannot fail
        let _ = writeln!(out, "# TYPE {name} gauge");
        let _ = writeln!(out, "{name} {value}");
    }
    Ok(out)
}

fn normalize(name: &str) -> String {
    let mut out = String::from("app_");
    let mut pending_separator = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && out.len() > "app_".len() {
                out.push('_');
            }
            pending_separator = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    // a name with no alphanumeric characters still needs a valid identifier
    if out.len() == "app_".len() {
        out.push_str("metric");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_normalized() {
        assert_eq!(normalize("Requests-Per-Sec"), "app_requests_per_sec");
        assert_eq!(normalize("Bad Name!!"), "app_bad_name");
        assert_eq!(normalize("__wild__"), "app_wild");
        assert_eq!(normalize("a//b"), "app_a_b");
        assert_eq!(normalize("UPPER"), "app_upper");
        assert_eq!(normalize("!!!"), "app_metric");
    }

    #[test]
    fn normalized_names_are_well_formed() {
        for raw in [
            "Requests-Per-Sec",
            "Bad Name!!",
            " lead and trail ",
            "many___underscores",
            "x",
            "Mixed 123 Things?",
        ] {
            let name = normalize(raw);
            assert!(name.starts_with("app_"));
            let rest = &name["app_".len()..];
            assert!(!rest.is_empty());
            assert!(rest
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_'));
            assert!(!rest.starts_with('_'));
            assert!(!rest.ends_with('_'));
            assert!(!rest.contains("__"));
        }
    }

    #[test]
    fn renders_gauge_lines() {
        let metrics = BTreeMap::from([
            ("Requests-Per-Sec".to_string(), 12.0),
            ("Bad Name!!".to_string(), 3.0),
        ]);
        assert_eq!(
            render(&metrics).unwrap(),
            "# TYPE app_bad_name gauge\napp_bad_name 3\n\
             # TYPE app_requests_per_sec gauge\napp_requests_per_sec 12\n"
        );
    }

    #[test]
    fn non_finite_values_fail_the_scrape() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let metrics = BTreeMap::from([("ok".to_string(), 1.0), ("bad".to_string(), bad)]);
            assert!(matches!(
                render(&metrics),
                Err(MetricsError::NonFinite { name }) if name == "bad"
            ));
        }
    }
}
