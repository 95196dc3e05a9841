//! URL matchers used to classify requests.

use regex::Regex;
use url::Url;

/// A single URL matcher.
#[derive(Debug, Clone)]
pub enum UrlPattern {
    /// Whole URL equals the string.
    Exact(String),
    /// URL starts with the string.
    Prefix(String),
    /// URL contains the substring anywhere.
    Contains(String),
    /// Host contains the substring (e.g. a backend vendor name).
    HostContains(String),
    /// Regular expression searched in the whole URL.
    Regex(Regex),
}

impl UrlPattern {
    pub fn exact(url: &str) -> Self {
        Self::Exact(url.to_string())
    }

    pub fn prefix(prefix: &str) -> Self {
        Self::Prefix(prefix.to_string())
    }

    pub fn contains(substring: &str) -> Self {
        Self::Contains(substring.to_string())
    }

    pub fn host_contains(substring: &str) -> Self {
        Self::HostContains(substring.to_string())
    }

    /// Compile a regular expression pattern.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Regex)
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let url_str = url.as_str();
        match self {
            UrlPattern::Exact(s) => url_str == s,
            UrlPattern::Prefix(s) => url_str.starts_with(s.as_str()),
            UrlPattern::Contains(s) => url_str.contains(s.as_str()),
            UrlPattern::HostContains(s) => url.host_str().is_some_and(|h| h.contains(s.as_str())),
            UrlPattern::Regex(re) => re.is_match(url_str),
        }
    }

    /// The source text of the pattern, for logs.
    pub fn as_str(&self) -> &str {
        match self {
            UrlPattern::Exact(s)
            | UrlPattern::Prefix(s)
            | UrlPattern::Contains(s)
            | UrlPattern::HostContains(s) => s,
            UrlPattern::Regex(re) => re.as_str(),
        }
    }
}

/// Any-of set of patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<UrlPattern>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a list of regular expressions into a set.
    pub fn from_regexes<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| UrlPattern::regex(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn push(&mut self, pattern: UrlPattern) {
        self.patterns.push(pattern);
    }

    pub fn with(mut self, pattern: UrlPattern) -> Self {
        self.push(pattern);
        self
    }

    /// First pattern matching the URL, if any.
    pub fn find(&self, url: &Url) -> Option<&UrlPattern> {
        self.patterns.iter().find(|p| p.matches(url))
    }

    pub fn matches(&self, url: &Url) -> bool {
        self.find(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_exact() {
        let pattern = UrlPattern::exact("https://example.com/");
        assert!(pattern.matches(&url("https://example.com/")));
        assert!(!pattern.matches(&url("https://example.com/page")));
    }

    #[test]
    fn test_prefix_and_contains() {
        assert!(UrlPattern::prefix("https://example.com/").matches(&url("https://example.com/page")));
        assert!(UrlPattern::contains("tracking").matches(&url("https://example.com/tracking/pixel")));
    }

    #[test]
    fn test_host_contains_ignores_path() {
        let pattern = UrlPattern::host_contains("appwrite");
        assert!(pattern.matches(&url("https://nyc.cloud.appwrite.io/v1/teams")));
        assert!(!pattern.matches(&url("https://example.com/appwrite/docs")));
    }

    #[test]
    fn test_regex() {
        let pattern = UrlPattern::regex(r"/v1/databases/.*/collections/.*/documents").unwrap();
        assert!(pattern.matches(&url(
            "https://api.example.com/v1/databases/main/collections/grades/documents?limit=5"
        )));
        assert!(!pattern.matches(&url("https://api.example.com/v1/databases/main")));
    }

    #[test]
    fn test_invalid_regex() {
        assert!(UrlPattern::regex("(unclosed").is_err());
    }

    #[test]
    fn test_pattern_set() {
        let set = PatternSet::from_regexes([r"/v1/account", r"/v1/databases/.*/documents"])
            .unwrap()
            .with(UrlPattern::host_contains("appwrite"));

        assert_eq!(set.len(), 3);
        assert!(set.matches(&url("https://example.com/v1/account/sessions")));
        assert!(set.matches(&url("https://cloud.appwrite.io/v1/storage")));
        assert!(!set.matches(&url("https://example.com/dashboard")));
        assert_eq!(
            set.find(&url("https://example.com/v1/account")).map(|p| p.as_str()),
            Some("/v1/account")
        );
    }
}
