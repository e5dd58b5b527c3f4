//! robots.txt parsing and path checks.

use url::Url;

/// Path rules that apply to one crawler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsPolicy {
    allow: Vec<String>,
    disallow: Vec<String>,
}

#[derive(Debug, Default)]
struct Group {
    agents: Vec<String>,
    allow: Vec<String>,
    disallow: Vec<String>,
}

impl RobotsPolicy {
    /// Policy that allows every path.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parses `content` and keeps the group that applies to `user_agent`.
    ///
    /// A group naming a token contained in the user agent wins over `*`.
    /// Consecutive `User-agent` lines share the rules that follow them.
    pub fn parse(content: &str, user_agent: &str) -> Self {
        let agent = user_agent.to_ascii_lowercase();
        let mut groups: Vec<Group> = Vec::new();
        let mut open_agents = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match directive.trim().to_ascii_lowercase().as_str() {
                "user-agent" => {
                    if !open_agents {
                        groups.push(Group::default());
                        open_agents = true;
                    }
                    if let Some(group) = groups.last_mut() {
                        group.agents.push(value.to_ascii_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    open_agents = false;
                    let Some(group) = groups.last_mut() else {
                        continue;
                    };
                    if value.is_empty() {
                        continue;
                    }
                    if directive.trim().eq_ignore_ascii_case("allow") {
                        group.allow.push(value.to_string());
                    } else {
                        group.disallow.push(value.to_string());
                    }
                }
                _ => open_agents = false,
            }
        }

        let specific = groups.iter().find(|group| {
            group
                .agents
                .iter()
                .any(|name| name != "*" && !name.is_empty() && agent.contains(name.as_str()))
        });
        let chosen = specific.or_else(|| {
            groups
                .iter()
                .find(|group| group.agents.iter().any(|name| name == "*"))
        });
        match chosen {
            Some(group) => Self {
                allow: group.allow.clone(),
                disallow: group.disallow.clone(),
            },
            None => Self::allow_all(),
        }
    }

    /// Longest matching prefix decides; `Allow` wins ties.
    pub fn is_allowed(&self, path: &str) -> bool {
        let longest = |rules: &[String]| {
            rules
                .iter()
                .filter(|rule| path.starts_with(rule.as_str()))
                .map(String::len)
                .max()
        };
        match (longest(&self.allow), longest(&self.disallow)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(allow), Some(disallow)) => allow >= disallow,
        }
    }

    /// Checks the path and query of `url`.
    pub fn allows(&self, url: &Url) -> bool {
        match url.query() {
            Some(query) => self.is_allowed(&format!("{}?{query}", url.path())),
            None => self.is_allowed(url.path()),
        }
    }
}

/// Location of the robots file for the site serving `url`.
pub fn robots_url(url: &Url) -> Option<Url> {
    url.join("/robots.txt").ok()
}
