use url::Url;

/// URL utility functions.
pub struct UrlUtil;

impl UrlUtil {
    /// Prefix `https://` unless the value already carries an http(s) scheme.
    pub fn ensure_scheme(instance: &str) -> String {
        if instance.starts_with("http://") || instance.starts_with("https://") {
            instance.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", instance.trim_end_matches('/'))
        }
    }

    /// Whether `candidate` lives under the `origin` URL.
    ///
    /// Scheme, host and effective port must match exactly and the origin's
    /// path (if any) must be a whole-segment prefix of the candidate's path.
    /// An empty or unparsable origin never matches.
    pub fn is_under_origin(candidate: &str, origin: &str) -> bool {
        if origin.trim().is_empty() {
            return false;
        }
        let (candidate, origin) = match (Url::parse(candidate), Url::parse(origin)) {
            (Ok(c), Ok(o)) => (c, o),
            _ => return false,
        };

        if candidate.scheme() != origin.scheme()
            || candidate.host_str() != origin.host_str()
            || candidate.port_or_known_default() != origin.port_or_known_default()
        {
            return false;
        }

        let origin_path = origin.path().trim_end_matches('/');
        if origin_path.is_empty() {
            return true;
        }
        let candidate_path = candidate.path();
        candidate_path == origin_path
            || candidate_path
                .strip_prefix(origin_path)
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    }

    /// `host[:port]/path` of a URL without scheme or trailing slash.
    pub fn host_and_path(value: &str) -> Option<String> {
        let url = Url::parse(value).ok()?;
        let host = url.host_str()?;
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Some(format!("{}{}", authority, url.path().trim_end_matches('/')))
    }
}
