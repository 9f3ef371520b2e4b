//! Routing predicates supplied by configuration.

use serde::{Deserialize, Serialize};

/// Hosts, paths and extensions the classifier matches against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Identity, token, session and storage hosts of the backing data service.
    /// A pattern matches the host itself and any subdomain of it.
    pub api_hosts: Vec<String>,
    /// Path prefixes treated as authoritative on any host (e.g. `/api/`).
    pub api_path_prefixes: Vec<String>,
    /// Font file extensions, without the dot.
    pub font_extensions: Vec<String>,
    /// Path fragments identifying icon-library stylesheets.
    pub icon_paths: Vec<String>,
    /// Script/style delivery networks.
    pub cdn_hosts: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            api_hosts: vec![
                "firestore.googleapis.com".into(),
                "identitytoolkit.googleapis.com".into(),
                "securetoken.googleapis.com".into(),
                "firebasestorage.googleapis.com".into(),
                "firebaseinstallations.googleapis.com".into(),
            ],
            api_path_prefixes: Vec::new(),
            font_extensions: ["woff", "woff2", "ttf", "otf", "eot"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            icon_paths: vec![
                "@phosphor-icons".into(),
                "font-awesome".into(),
                "material-icons".into(),
                "bootstrap-icons".into(),
            ],
            cdn_hosts: vec![
                "cdn.tailwindcss.com".into(),
                "unpkg.com".into(),
                "cdn.jsdelivr.net".into(),
                "cdnjs.cloudflare.com".into(),
                "www.gstatic.com".into(),
                "fonts.googleapis.com".into(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_font_extensions() {
        let cfg = RoutingConfig::default();
        for ext in ["woff", "woff2", "ttf", "otf", "eot"] {
            assert!(cfg.font_extensions.iter().any(|e| e == ext));
        }
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let cfg: RoutingConfig = serde_json::from_str(r#"{"api_path_prefixes": ["/api/"]}"#).unwrap();
        assert_eq!(cfg.api_path_prefixes, vec!["/api/"]);
        assert!(cfg.cdn_hosts.iter().any(|h| h == "unpkg.com"));
    }
}
