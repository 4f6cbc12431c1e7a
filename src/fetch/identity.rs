//! Client identities (browser-like header sets) rotated across retry attempts.

use crate::config::ConfigError;

/// Referer sent with every default identity.
pub const DEFAULT_REFERER: &str = "https://book.douban.com/";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7";

/// Real browser User-Agent strings, in rotation order.
pub const BROWSER_USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

/// One simulated client: a User-Agent plus the headers a real browser would send with it.
///
/// `Accept` is left to the engine (it depends on the expected content kind) and
/// `Accept-Encoding` to the HTTP client, which only advertises what it can decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    user_agent: String,
    headers: Vec<(String, String)>,
}

impl Identity {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers<I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.headers.extend(headers);
        self
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Companion headers, in insertion order, excluding User-Agent.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Full header list for a request: User-Agent first, then the companions.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.headers.len() + 1);
        out.push(("User-Agent".to_string(), self.user_agent.clone()));
        out.extend(self.headers.iter().cloned());
        out
    }
}

/// Browser companion headers shared by every default identity.
pub fn browser_headers(referer: &str, accept_language: &str) -> Vec<(String, String)> {
    [
        ("Referer", referer),
        ("Accept-Language", accept_language),
        ("Cache-Control", "max-age=0"),
        ("DNT", "1"),
        ("Upgrade-Insecure-Requests", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Ordered, non-empty set of identities. Immutable after construction.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    identities: Vec<Identity>,
}

impl IdentityPool {
    /// Build a pool. An empty list is a configuration error.
    pub fn new(identities: Vec<Identity>) -> Result<Self, ConfigError> {
        if identities.is_empty() {
            return Err(ConfigError::EmptyIdentityPool);
        }
        Ok(Self { identities })
    }

    /// One identity per User-Agent, each carrying the same companion headers.
    pub fn from_user_agents<I, S>(
        user_agents: I,
        companions: &[(String, String)],
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let identities = user_agents
            .into_iter()
            .map(|ua| Identity::new(ua).with_headers(companions.iter().cloned()))
            .collect();
        Self::new(identities)
    }

    /// The five browser identities with default Referer and Accept-Language.
    pub fn browser_defaults() -> Self {
        let companions = browser_headers(DEFAULT_REFERER, DEFAULT_ACCEPT_LANGUAGE);
        Self {
            identities: BROWSER_USER_AGENTS
                .iter()
                .map(|ua| Identity::new(*ua).with_headers(companions.iter().cloned()))
                .collect(),
        }
    }

    /// Position in the pool used for the given zero-based attempt index.
    pub fn index_for(&self, attempt_index: u32) -> usize {
        attempt_index as usize % self.identities.len()
    }

    /// Identity for the given zero-based attempt index; periodic in the pool size.
    pub fn next(&self, attempt_index: u32) -> &Identity {
        &self.identities[self.index_for(attempt_index)]
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Always false: construction rejects empty pools.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(
            IdentityPool::new(Vec::new()),
            Err(ConfigError::EmptyIdentityPool)
        ));
    }

    #[test]
    fn rotation_follows_attempt_index_modulo_pool_size() -> Result<(), ConfigError> {
        let pool = IdentityPool::from_user_agents(["a", "b", "c"], &[])?;
        let order: Vec<&str> = (0..7).map(|i| pool.next(i).user_agent()).collect();
        assert_eq!(order, ["a", "b", "c", "a", "b", "c", "a"]);
        Ok(())
    }

    #[test]
    fn selection_is_periodic() {
        let pool = IdentityPool::browser_defaults();
        let size = pool.len() as u32;
        for i in 0..20 {
            assert_eq!(pool.next(i), pool.next(i + size));
        }
    }

    #[test]
    fn single_identity_pool_always_returns_it() -> Result<(), ConfigError> {
        let pool = IdentityPool::new(vec![Identity::new("only")])?;
        assert_eq!(pool.next(0).user_agent(), "only");
        assert_eq!(pool.next(u32::MAX).user_agent(), "only");
        Ok(())
    }

    #[test]
    fn browser_defaults_carry_companion_headers() {
        let pool = IdentityPool::browser_defaults();
        assert_eq!(pool.len(), BROWSER_USER_AGENTS.len());
        let first = pool.next(0);
        assert!(first.user_agent().contains("Chrome/120"));
        assert!(first.has_header("referer"));
        assert!(first.has_header("Accept-Language"));
        assert!(!first.has_header("Accept-Encoding"));
        let headers = first.request_headers();
        assert_eq!(headers[0].0, "User-Agent");
        assert_eq!(headers[0].1, BROWSER_USER_AGENTS[0]);
    }
}
