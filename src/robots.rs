use std::sync::Arc;

use dashmap::DashMap;
use reqwest::{Client, StatusCode, Url};

/// Allow/Disallow rules from the robots.txt group that applies to us.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRules {
    rules: Vec<Rule>,
    disallow_all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

impl RobotsRules {
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn disallow_all() -> Self {
        Self {
            rules: Vec::new(),
            disallow_all: true,
        }
    }

    /// Picks the group naming `user_agent` (matched on its product token,
    /// case-insensitive), falling back to the `*` group.
    pub fn parse(body: &str, user_agent: &str) -> Self {
        let product = user_agent
            .split('/')
            .next()
            .unwrap_or(user_agent)
            .trim()
            .to_lowercase();

        let mut groups: Vec<Group> = Vec::new();
        let mut in_rules = true;
        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();
            match key.as_str() {
                "user-agent" => {
                    if in_rules || groups.is_empty() {
                        groups.push(Group::default());
                    }
                    in_rules = false;
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(group) = groups.last_mut() {
                        group.agents.push(value.to_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    in_rules = true;
                    // an empty Disallow allows everything
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(group) = groups.last_mut() {
                        group.rules.push(Rule {
                            allow: key == "allow",
                            pattern: value.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }

        let specific = groups
            .iter()
            .position(|g| g.agents.iter().any(|a| a != "*" && product.contains(a.as_str())));
        let wildcard = groups.iter().position(|g| g.agents.iter().any(|a| a == "*"));
        match specific.or(wildcard) {
            Some(idx) => Self {
                rules: groups.swap_remove(idx).rules,
                disallow_all: false,
            },
            None => Self::allow_all(),
        }
    }

    /// Longest matching pattern wins; on a tie Allow wins.
    pub fn is_allowed(&self, path: &str) -> bool {
        if self.disallow_all {
            return false;
        }
        let mut best: Option<(usize, bool)> = None;
        for rule in &self.rules {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            let len = rule.pattern.len();
            best = match best {
                Some((best_len, best_allow))
                    if best_len > len || (best_len == len && best_allow) =>
                {
                    Some((best_len, best_allow))
                }
                _ => Some((len, rule.allow)),
            };
        }
        best.map(|(_, allow)| allow).unwrap_or(true)
    }
}

/// Prefix match supporting `*` (any run of characters) and a trailing `$`
/// (end of path).
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };
    let parts: Vec<&str> = parts.collect();
    for (i, part) in parts.iter().enumerate() {
        let is_last = i + 1 == parts.len();
        if is_last && anchored {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    !anchored || rest.is_empty()
}

/// Site-policy check backed by one robots.txt download per origin.
pub struct RobotsPolicy {
    client: Client,
    user_agent: String,
    cache: DashMap<String, Arc<RobotsRules>>,
}

impl RobotsPolicy {
    pub fn new(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            cache: DashMap::new(),
        }
    }

    pub async fn can_fetch(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            log::warn!("refusing to fetch unparseable url {url}");
            return false;
        };
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return false;
        }
        let origin = parsed.origin().ascii_serialization();

        let rules = match self.cache.get(&origin) {
            Some(rules) => rules.clone(),
            None => {
                let rules = Arc::new(self.load(&origin).await);
                self.cache.insert(origin, rules.clone());
                rules
            }
        };

        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }
        rules.is_allowed(&path)
    }

    async fn load(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{origin}/robots.txt");
        let response = match self.client.get(&robots_url).send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("could not fetch {robots_url}: {e}, assuming allowed");
                return RobotsRules::allow_all();
            }
        };

        match response.status() {
            status if status.is_success() => match response.text().await {
                Ok(body) => RobotsRules::parse(&body, &self.user_agent),
                Err(e) => {
                    log::warn!("could not read {robots_url}: {e}, assuming allowed");
                    RobotsRules::allow_all()
                }
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RobotsRules::disallow_all(),
            status if status.is_client_error() => RobotsRules::allow_all(),
            status => {
                log::warn!("{robots_url} responded with {status}, treating site as disallowed");
                RobotsRules::disallow_all()
            }
        }
    }
}
