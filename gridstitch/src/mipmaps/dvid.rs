//! Rewriting of `dvid://` root URLs.
//!
//! Tile stacks stored in DVID are addressed with a `dvid://<instance>/...`
//! scheme; the instance name resolves to an HTTP endpoint through the
//! `dvidinstances` configuration records. Unknown instances fall back to a
//! plain scheme swap so a misconfigured name still yields a syntactically
//! valid URL.

use crate::config::Config;
use std::collections::BTreeMap;

const DVID_SCHEME: &str = "dvid://";
const DVID_TILE_API_BASE: &str = "/api/node";

/// Mapping of DVID instance names to their HTTP endpoints.
#[derive(Debug, Clone, Default)]
pub struct DvidUrlMap {
    endpoints: BTreeMap<String, String>,
}

impl DvidUrlMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the mapping from the `dvidinstances` configuration records
    /// (`name` and `dvid` host per record).
    pub fn from_config(resources: &Config) -> Self {
        let mut map = Self::new();
        for record in resources.get_record_array("dvidinstances") {
            let (Some(name), Some(host)) = (record.get("name"), record.get("dvid")) else {
                continue;
            };
            map.insert(name, &format!("http://{host}{DVID_TILE_API_BASE}"));
        }
        map
    }

    pub fn insert(&mut self, name: &str, endpoint: &str) {
        self.endpoints.insert(name.to_string(), endpoint.to_string());
    }

    /// Rewrites a `dvid://` root URL to its HTTP endpoint; other URLs pass
    /// through unchanged.
    pub fn format_root_url(&self, url: &str) -> String {
        let Some(rest) = url.strip_prefix(DVID_SCHEME) else {
            return url.to_string();
        };
        let instance = rest.split('/').next().unwrap_or(rest);
        match self.endpoints.get(instance) {
            Some(endpoint) => url.replacen(&format!("{DVID_SCHEME}{instance}"), endpoint, 1),
            None => url.replacen(DVID_SCHEME, "http://", 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_instance_is_rewritten() {
        let mut map = DvidUrlMap::new();
        map.insert("localdvid", "http://127.0.0.1:7000/api/node");
        assert_eq!(
            map.format_root_url("dvid://localdvid/uuid/tiles"),
            "http://127.0.0.1:7000/api/node/uuid/tiles"
        );
    }

    #[test]
    fn test_unknown_instance_swaps_scheme() {
        let map = DvidUrlMap::new();
        assert_eq!(
            map.format_root_url("dvid://elsewhere/uuid/tiles"),
            "http://elsewhere/uuid/tiles"
        );
    }

    #[test]
    fn test_non_dvid_urls_pass_through() {
        let map = DvidUrlMap::new();
        assert_eq!(
            map.format_root_url("http://tiles.internal/stack"),
            "http://tiles.internal/stack"
        );
    }

    #[test]
    fn test_from_config() {
        let mut cfg = Config::default();
        cfg.insert(
            "dvidinstances",
            json!([
                { "name": "localdvid", "dvid": "127.0.0.1:8000", "dvid-kv-store": "127.0.0.1:9000" },
                { "name": "backup", "dvid": "10.1.1.1:8000" }
            ]),
        );
        let map = DvidUrlMap::from_config(&cfg);
        assert_eq!(
            map.format_root_url("dvid://backup/uuid/tiles"),
            "http://10.1.1.1:8000/api/node/uuid/tiles"
        );
    }
}
