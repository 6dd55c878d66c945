//! robots.txt parsing
//!
//! Allow/disallow evaluation is delegated to the robotstxt crate, which
//! implements Google's matching semantics: the most specific user-agent group
//! applies, the longest matching pattern within it wins, and ties break in
//! favor of Allow. `Sitemap:` and `Crawl-delay:` directives sit outside that
//! crate's API, so construction runs a single directive scan that collects
//! sitemap URLs and per-group crawl delays up front.

use robotstxt::DefaultMatcher;

/// A crawl delay attached to one user-agent group
#[derive(Debug, Clone)]
struct GroupDelay {
    /// Lowercased agent names the group was declared for (`*` included)
    agents: Vec<String>,
    seconds: f64,
}

/// Parsed robots.txt data for one host
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    /// Raw rules for the matcher; `None` means no policy, allow everything
    source: Option<String>,
    sitemaps: Vec<String>,
    delays: Vec<GroupDelay>,
}

impl ParsedRobots {
    /// Scans raw robots.txt content once, keeping the rule text for the
    /// matcher and pulling out the directives the matcher does not expose.
    pub fn from_content(content: &str) -> Self {
        let mut sitemaps = Vec::new();
        let mut delays = Vec::new();

        // Consecutive User-agent lines form a group preamble; the first rule
        // after them closes the preamble, and a later User-agent line starts
        // a fresh group.
        let mut group: Vec<String> = Vec::new();
        let mut in_preamble = false;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();

            match key.trim().to_lowercase().as_str() {
                "user-agent" => {
                    if !in_preamble {
                        group.clear();
                        in_preamble = true;
                    }
                    group.push(value.to_lowercase());
                }
                // Sitemap directives are independent of user-agent groups.
                "sitemap" if !value.is_empty() => sitemaps.push(value.to_string()),
                "crawl-delay" => {
                    in_preamble = false;
                    if let Ok(seconds) = value.parse::<f64>() {
                        delays.push(GroupDelay {
                            agents: group.clone(),
                            seconds,
                        });
                    }
                }
                "allow" | "disallow" => in_preamble = false,
                _ => {}
            }
        }

        let source = if content.trim().is_empty() {
            None
        } else {
            Some(content.to_string())
        };

        Self {
            source,
            sitemaps,
            delays,
        }
    }

    /// A permissive ParsedRobots used when no robots.txt exists.
    pub fn allow_all() -> Self {
        Self {
            source: None,
            sitemaps: Vec::new(),
            delays: Vec::new(),
        }
    }

    /// Checks whether a URL is allowed for the given user agent.
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        let Some(source) = &self.source else {
            return true;
        };
        DefaultMatcher::default().one_agent_allowed_by_robots(source, user_agent, url)
    }

    /// Every `Sitemap:` directive, in file order.
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// Crawl delay for a user agent. A group naming the effective agent
    /// takes precedence over one declared for `*`; within each tier the last
    /// declaration wins, as later lines override earlier ones.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        let agent = user_agent.to_lowercase();
        let mut wildcard = None;
        let mut named = None;

        for delay in &self.delays {
            if delay
                .agents
                .iter()
                .any(|a| a != "*" && agent.contains(a.as_str()))
            {
                named = Some(delay.seconds);
            } else if delay.agents.iter().any(|a| a == "*") {
                wildcard = Some(delay.seconds);
            }
        }

        named.or(wildcard)
    }
}
