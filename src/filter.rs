//! Blocked-domain filter: case-insensitive exact match plus suffix match for
//! parent domains. The list is loaded read-only before the workers start.
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{info, warn};

use crate::error::DnsResult;

#[derive(Debug, Default)]
pub struct Filter {
    blocked: HashSet<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a blocklist: one domain per line, `#` comments; hosts-file lines
    /// of the form `address domain` are accepted too, keeping their last
    /// field. Unparsable lines are skipped with a warning.
    pub fn from_path(path: &Path) -> DnsResult<Self> {
        let file = File::open(path)?;
        let mut filter = Filter::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            // hosts-file form: the domain is the last whitespace field
            match line.split_whitespace().last() {
                Some(domain) if domain.contains('.') => filter.add(domain),
                _ => warn!("{}:{}: skipping unparsable line", path.display(), lineno + 1),
            }
        }
        info!("{} domains loaded from {}", filter.len(), path.display());
        Ok(filter)
    }

    pub fn add(&mut self, domain: &str) {
        self.blocked.insert(domain.to_ascii_lowercase());
    }

    /// A domain is blocked when it, or any parent domain, is on the list.
    /// Matching is per label: `ads.example.com` blocks `x.ads.example.com`
    /// but not `pads.example.com`.
    ///
    /// ```
    /// use dohlib::filter::Filter;
    ///
    /// let mut filter = Filter::new();
    /// filter.add("ads.example.com");
    /// assert!(filter.is_blocked("ads.example.com"));
    /// assert!(filter.is_blocked("Tracker.ADS.example.com"));
    /// assert!(!filter.is_blocked("example.com"));
    /// ```
    pub fn is_blocked(&self, domain: &str) -> bool {
        let domain = domain.to_ascii_lowercase();
        let mut rest = domain.as_str();
        loop {
            if self.blocked.contains(rest) {
                return true;
            }
            match rest.find('.') {
                Some(dot) => rest = &rest[dot + 1..],
                None => return false,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn exact_and_suffix_match() {
        let mut filter = Filter::new();
        filter.add("doubleclick.net");

        assert!(filter.is_blocked("doubleclick.net"));
        assert!(filter.is_blocked("ad.doubleclick.net"));
        assert!(filter.is_blocked("static.ad.doubleclick.net"));
        assert!(!filter.is_blocked("example.com"));
    }

    #[test]
    fn label_boundaries_are_respected() {
        let mut filter = Filter::new();
        filter.add("example.com");

        // not a parent-domain match, only a string suffix
        assert!(!filter.is_blocked("notexample.com"));
        assert!(!filter.is_blocked("com"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let mut filter = Filter::new();
        filter.add("Ads.Example.COM");
        assert!(filter.is_blocked("ads.example.com"));
        assert!(filter.is_blocked("ADS.EXAMPLE.COM"));
    }

    #[test]
    fn blocklist_file_formats() {
        let dir = std::env::temp_dir();
        let path = dir.join("dohproxy-filter-test.txt");
        {
            let mut f = File::create(&path).unwrap();
            writeln!(f, "# comment").unwrap();
            writeln!(f).unwrap();
            writeln!(f, "plain.example.com").unwrap();
            writeln!(f, "127.0.0.1 hosts.example.com").unwrap();
            writeln!(f, "0.0.0.0\ttabbed.example.com").unwrap();
            writeln!(f, "localhost").unwrap(); // no dot, skipped
        }
        let filter = Filter::from_path(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(filter.len(), 3);
        assert!(filter.is_blocked("plain.example.com"));
        assert!(filter.is_blocked("hosts.example.com"));
        assert!(filter.is_blocked("sub.tabbed.example.com"));
        assert!(!filter.is_blocked("localhost"));
    }
}
