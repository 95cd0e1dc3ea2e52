//! Mock proxy configuration behind `$config`
//!
//! State is shared across runs in one process, like the host app's own
//! configuration would be.

use std::collections::BTreeMap;

use serde::Serialize;

/// Proxy configuration as reported by `$config.getConfig()`
#[derive(Debug, Clone, Serialize)]
pub struct PolicyState {
    pub running_model: u8,
    pub all_buildin_nodes: Vec<String>,
    pub global_proxy: String,
    pub all_policy_groups: Vec<String>,
    pub ssid: String,
    #[serde(rename = "final")]
    pub final_policy: String,
    pub policy_select: BTreeMap<String, String>,
}

impl Default for PolicyState {
    fn default() -> Self {
        let policy_select = [
            ("Proxy", "DIRECT"),
            ("Direct", "DIRECT"),
            ("AdBlock", "REJECT"),
        ]
        .into_iter()
        .map(|(group, choice)| (group.to_string(), choice.to_string()))
        .collect();

        Self {
            running_model: 1,
            all_buildin_nodes: vec!["DIRECT".to_string(), "REJECT".to_string()],
            global_proxy: "Proxy".to_string(),
            all_policy_groups: vec![
                "Proxy".to_string(),
                "Direct".to_string(),
                "AdBlock".to_string(),
            ],
            ssid: "test-wifi".to_string(),
            final_policy: "Proxy".to_string(),
            policy_select,
        }
    }
}

impl PolicyState {
    /// JSON text of the whole configuration
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Select `choice` for `group`
    pub fn select(&mut self, group: &str, choice: &str) {
        self.policy_select
            .insert(group.to_string(), choice.to_string());
    }

    pub fn selected(&self, group: &str) -> String {
        self.policy_select
            .get(group)
            .cloned()
            .unwrap_or_else(|| "DIRECT".to_string())
    }

    /// Sub-policies of a group (fixed list)
    pub fn sub_policies(&self, _group: &str) -> Vec<String> {
        ["Policy 1", "Policy 2", "DIRECT", "REJECT"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Switch running model: 0 global direct, 1 rule based, 2 global proxy
    pub fn set_running_model(&mut self, model: i64) -> bool {
        match u8::try_from(model) {
            Ok(model) if model <= 2 => {
                self.running_model = model;
                true
            }
            _ => false,
        }
    }
}
