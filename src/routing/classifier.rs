//! Ordered (predicate, class) table. The first matching rule wins.
//!
//! Precedence:
//! 1. authoritative API hosts/paths (any method)
//! 2. font extensions
//! 3. icon-library stylesheets
//! 4. CDN/library hosts
//! 5. navigations
//! 6. critical shell URLs, then every other GET
//! 7. everything else passes through
//!
//! Rules 2–6 only match GET requests.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::trace;
use url::Url;

use crate::request::ProxyRequest;

use super::config::RoutingConfig;

/// Category that selects the caching algorithm for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingClass {
    CriticalShell,
    FontAsset,
    IconStyleAsset,
    CdnLibrary,
    AuthoritativeApi,
    NavigationDocument,
    GenericStatic,
    /// Non-GET traffic that is never cached.
    Passthrough,
}

impl RoutingClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingClass::CriticalShell => "critical-shell",
            RoutingClass::FontAsset => "font-asset",
            RoutingClass::IconStyleAsset => "icon-style-asset",
            RoutingClass::CdnLibrary => "cdn-library",
            RoutingClass::AuthoritativeApi => "authoritative-api",
            RoutingClass::NavigationDocument => "navigation-document",
            RoutingClass::GenericStatic => "generic-static",
            RoutingClass::Passthrough => "passthrough",
        }
    }
}

impl std::fmt::Display for RoutingClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request predicate used by a [`Rule`].
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Host equals a pattern or is a subdomain of it.
    Host(Vec<String>),
    PathPrefix(Vec<String>),
    /// Lowercased extension of the last path segment.
    Extension(Vec<String>),
    PathContains(Vec<String>),
    Navigation,
    /// Exact URL (fragment ignored) from a fixed list.
    Listed(HashSet<String>),
    AnyOf(Vec<Predicate>),
    Always,
}

fn host_matches(host: &str, pattern: &str) -> bool {
    let pattern = pattern.trim_start_matches("*.").to_ascii_lowercase();
    host == pattern
        || host
            .strip_suffix(pattern.as_str())
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn without_fragment(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

impl Predicate {
    pub fn matches(&self, request: &ProxyRequest) -> bool {
        match self {
            Predicate::Host(patterns) => request
                .host()
                .is_some_and(|host| patterns.iter().any(|p| host_matches(&host, p))),
            Predicate::PathPrefix(prefixes) => {
                let path = request.url.path();
                prefixes.iter().any(|p| path.starts_with(p.as_str()))
            }
            Predicate::Extension(exts) => request
                .extension()
                .is_some_and(|ext| exts.iter().any(|e| e.eq_ignore_ascii_case(&ext))),
            Predicate::PathContains(needles) => {
                let path = request.url.path().to_ascii_lowercase();
                needles
                    .iter()
                    .any(|n| path.contains(n.to_ascii_lowercase().as_str()))
            }
            Predicate::Navigation => request.is_navigation(),
            Predicate::Listed(urls) => urls.contains(&without_fragment(&request.url)),
            Predicate::AnyOf(preds) => preds.iter().any(|p| p.matches(request)),
            Predicate::Always => true,
        }
    }
}

/// One row of the classification table.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: &'static str,
    pub class: RoutingClass,
    pub predicate: Predicate,
    pub get_only: bool,
}

impl Rule {
    pub fn matches(&self, request: &ProxyRequest) -> bool {
        (!self.get_only || request.is_get()) && self.predicate.matches(request)
    }
}

/// Pure, total request classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    /// Build the rule table from routing config and the critical shell URLs.
    pub fn new(config: &RoutingConfig, shell_urls: &[Url]) -> Self {
        let shell: HashSet<String> = shell_urls.iter().map(without_fragment).collect();
        let rules = vec![
            Rule {
                name: "authoritative-api",
                class: RoutingClass::AuthoritativeApi,
                predicate: Predicate::AnyOf(vec![
                    Predicate::Host(config.api_hosts.clone()),
                    Predicate::PathPrefix(config.api_path_prefixes.clone()),
                ]),
                get_only: false,
            },
            Rule {
                name: "font-extension",
                class: RoutingClass::FontAsset,
                predicate: Predicate::Extension(config.font_extensions.clone()),
                get_only: true,
            },
            Rule {
                name: "icon-library",
                class: RoutingClass::IconStyleAsset,
                predicate: Predicate::PathContains(config.icon_paths.clone()),
                get_only: true,
            },
            Rule {
                name: "cdn-host",
                class: RoutingClass::CdnLibrary,
                predicate: Predicate::Host(config.cdn_hosts.clone()),
                get_only: true,
            },
            Rule {
                name: "navigation",
                class: RoutingClass::NavigationDocument,
                predicate: Predicate::Navigation,
                get_only: true,
            },
            Rule {
                name: "critical-shell",
                class: RoutingClass::CriticalShell,
                predicate: Predicate::Listed(shell),
                get_only: true,
            },
            Rule {
                name: "generic-get",
                class: RoutingClass::GenericStatic,
                predicate: Predicate::Always,
                get_only: true,
            },
            Rule {
                name: "passthrough",
                class: RoutingClass::Passthrough,
                predicate: Predicate::Always,
                get_only: false,
            },
        ];
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The first rule matching `request`.
    pub fn explain(&self, request: &ProxyRequest) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(request))
    }

    pub fn classify(&self, request: &ProxyRequest) -> RoutingClass {
        let class = self
            .explain(request)
            .map(|rule| rule.class)
            .unwrap_or(RoutingClass::Passthrough);
        trace!(url = %request.url, method = %request.method, class = %class, "Classified request");
        class
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    fn classifier() -> Classifier {
        let shell = vec![
            Url::parse("https://app.test/").unwrap(),
            Url::parse("https://app.test/index.html").unwrap(),
            Url::parse("https://app.test/manifest.json").unwrap(),
        ];
        Classifier::new(&RoutingConfig::default(), &shell)
    }

    fn get(url: &str) -> ProxyRequest {
        ProxyRequest::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_api_host_beats_font_extension() {
        let c = classifier();
        let req = get("https://firestore.googleapis.com/v1/fonts/Inter.woff2");
        assert_eq!(c.classify(&req), RoutingClass::AuthoritativeApi);
    }

    #[test]
    fn test_api_matches_any_method() {
        let c = classifier();
        let req = ProxyRequest::new(
            Method::POST,
            Url::parse("https://securetoken.googleapis.com/v1/token").unwrap(),
        );
        assert_eq!(c.classify(&req), RoutingClass::AuthoritativeApi);
    }

    #[test]
    fn test_api_path_prefix() {
        let config = RoutingConfig {
            api_path_prefixes: vec!["/api/".into()],
            ..Default::default()
        };
        let c = Classifier::new(&config, &[]);
        assert_eq!(
            c.classify(&get("https://app.test/api/orders")),
            RoutingClass::AuthoritativeApi
        );
        assert_eq!(
            c.classify(&get("https://app.test/apix")),
            RoutingClass::GenericStatic
        );
    }

    #[test]
    fn test_font_on_cdn_host_is_font() {
        let c = classifier();
        let req = get("https://cdn.jsdelivr.net/npm/inter/Inter.ttf");
        assert_eq!(c.classify(&req), RoutingClass::FontAsset);
    }

    #[test]
    fn test_icon_library_on_cdn_is_icon() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("https://unpkg.com/@phosphor-icons/web")),
            RoutingClass::IconStyleAsset
        );
    }

    #[test]
    fn test_cdn_host_and_subdomain() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("https://unpkg.com/react@18/umd/react.production.min.js")),
            RoutingClass::CdnLibrary
        );
        assert_eq!(
            c.classify(&get("https://evilunpkg.com/x.js")),
            RoutingClass::GenericStatic
        );
    }

    #[test]
    fn test_navigation_beats_shell_listing() {
        let c = classifier();
        let nav = ProxyRequest::navigate(Url::parse("https://app.test/index.html").unwrap());
        assert_eq!(c.classify(&nav), RoutingClass::NavigationDocument);
        let sub = get("https://app.test/index.html#section");
        assert_eq!(c.classify(&sub), RoutingClass::CriticalShell);
    }

    #[test]
    fn test_generic_get_and_passthrough() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("https://app.test/img/logo.png")),
            RoutingClass::GenericStatic
        );
        let post = ProxyRequest::new(Method::POST, Url::parse("https://app.test/upload").unwrap());
        assert_eq!(c.classify(&post), RoutingClass::Passthrough);
        let font_put = ProxyRequest::new(
            Method::PUT,
            Url::parse("https://app.test/fonts/a.woff").unwrap(),
        );
        assert_eq!(c.classify(&font_put), RoutingClass::Passthrough);
    }

    #[test]
    fn test_explain_names_rule() {
        let c = classifier();
        let rule = c.explain(&get("https://cdn.tailwindcss.com/")).unwrap();
        assert_eq!(rule.name, "cdn-host");
        assert_eq!(c.rules().len(), 8);
    }

    #[test]
    fn test_host_matches() {
        assert!(host_matches("a.example.com", "example.com"));
        assert!(host_matches("example.com", "*.example.com"));
        assert!(!host_matches("badexample.com", "example.com"));
    }
}
