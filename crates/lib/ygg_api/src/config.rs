//! API configuration.

/// Settings the HTTP layer needs beyond the engines.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Display name advertised in the metadata document.
    pub server_name: String,
    /// Public site root, e.g. `https://skins.example`.
    pub site_url: String,
    /// Take client addresses from `X-Forwarded-For` / `X-Real-IP`. Only
    /// safe when every request arrives through a proxy that sets them.
    pub trust_proxy_headers: bool,
}

impl ApiConfig {
    pub fn new(server_name: impl Into<String>, site_url: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            site_url: site_url.into().trim_end_matches('/').to_string(),
            trust_proxy_headers: false,
        }
    }

    pub fn with_trusted_proxy_headers(mut self, trusted: bool) -> Self {
        self.trust_proxy_headers = trusted;
        self
    }

    /// Host part of the site URL, the only domain textures are served from.
    pub fn skin_domains(&self) -> Vec<String> {
        url::Url::parse(&self.site_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_url_is_normalized() {
        let config = ApiConfig::new("Ygg", "https://skins.example:8443/");
        assert_eq!(config.site_url, "https://skins.example:8443");
        assert_eq!(config.skin_domains(), vec!["skins.example".to_string()]);
        assert!(!config.trust_proxy_headers);
    }

    #[test]
    fn unparseable_site_url_has_no_domains() {
        assert!(ApiConfig::new("Ygg", "not a url").skin_domains().is_empty());
    }
}
