// Parsing of `uses:` references to remote actions.
//
// Grammar: `[scheme://host/[extra-segment/]]org/repo[/subpath]@version`.
// The version is mandatory; an unpinned reference never parses.

use std::fmt;

use action_common::constants;
use action_common::ActionError;
use action_sdk::UrlUtil;

/// A parsed remote action reference. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReference {
    /// `scheme://host[/extra-segment]` when the reference names its host.
    pub url: Option<String>,
    pub org: String,
    pub repo: String,
    /// Path of the action inside the repository, empty for the root.
    pub path: String,
    /// The pinned branch, tag or commit.
    pub git_ref: String,
}

/// Decides which hosts nest `org/repo` one path segment deeper.
///
/// Each prefix is `host/segment` (no scheme). A reference whose
/// `host/path` starts with a prefix followed by `/` is service-hosted.
#[derive(Debug, Clone, Default)]
pub struct ServicePrefixPolicy {
    prefixes: Vec<String>,
}

impl ServicePrefixPolicy {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| p.as_ref().trim().trim_matches('/').to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Whether `host_and_path` (as produced by [`UrlUtil::host_and_path`])
    /// falls under a configured service prefix.
    pub fn matches(&self, host_and_path: &str) -> bool {
        let candidate = host_and_path.to_lowercase();
        self.prefixes.iter().any(|prefix| {
            candidate
                .strip_prefix(prefix.as_str())
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
        })
    }
}

impl ActionReference {
    /// Parse a `uses` string. Returns [`ActionError::Parse`] for anything
    /// that does not fully match the grammar; there is no partial result.
    pub fn parse(uses: &str, policy: &ServicePrefixPolicy) -> Result<Self, ActionError> {
        let fail = || ActionError::Parse {
            uses: uses.to_string(),
        };

        let (location, version) = uses.rsplit_once('@').ok_or_else(fail)?;
        if version.trim().is_empty() {
            return Err(fail());
        }

        let (url, remainder) = match split_scheme(location) {
            Some((scheme, after_scheme)) => {
                let (host, path) = after_scheme.split_once('/').ok_or_else(fail)?;
                if host.is_empty() || host.contains('@') {
                    return Err(fail());
                }
                let service_hosted = UrlUtil::host_and_path(&format!("{}://{}", scheme, after_scheme))
                    .map(|hp| policy.matches(&hp))
                    .unwrap_or(false);
                if service_hosted {
                    let (extra, rest) = path.split_once('/').ok_or_else(fail)?;
                    if extra.contains('@') {
                        return Err(fail());
                    }
                    (Some(format!("{}://{}/{}", scheme, host, extra)), rest)
                } else {
                    (Some(format!("{}://{}", scheme, host)), path)
                }
            }
            None => (None, location),
        };

        let mut segments = remainder.splitn(3, '/');
        let org = segments.next().unwrap_or_default();
        let repo = segments.next().unwrap_or_default();
        // The subpath is kept verbatim and may itself contain `@`.
        let path = segments.next().unwrap_or_default();
        if org.is_empty() || repo.is_empty() || org.contains('@') || repo.contains('@') {
            return Err(fail());
        }

        Ok(Self {
            url,
            org: org.to_string(),
            repo: repo.to_string(),
            path: path.to_string(),
            git_ref: version.to_string(),
        })
    }

    /// Repository URL to clone. References without a host resolve against
    /// `default_instance`.
    pub fn clone_url(&self, default_instance: &str) -> String {
        let base = match &self.url {
            Some(url) => url.clone(),
            None => UrlUtil::ensure_scheme(default_instance),
        };
        format!("{}/{}/{}", base.trim_end_matches('/'), self.org, self.repo)
    }

    /// `org/repo`.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }

    /// Whether this is the canonical checkout action.
    pub fn is_checkout(&self) -> bool {
        self.org == constants::checkout::ORG && self.repo == constants::checkout::REPO
    }
}

impl fmt::Display for ActionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(url) = &self.url {
            write!(f, "{}/", url)?;
        }
        write!(f, "{}/{}", self.org, self.repo)?;
        if !self.path.is_empty() {
            write!(f, "/{}", self.path)?;
        }
        write!(f, "@{}", self.git_ref)
    }
}

fn split_scheme(location: &str) -> Option<(&'static str, &str)> {
    if let Some(rest) = location.strip_prefix("https://") {
        Some(("https", rest))
    } else if let Some(rest) = location.strip_prefix("http://") {
        Some(("http", rest))
    } else {
        None
    }
}
