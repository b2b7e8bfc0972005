//! Orchestrator-level settings and the default worker trio.

use std::path::PathBuf;

use maestro_config::{AgentConfig, ProxyConfig, TransportKind, WorkerConfig};
use maestro_upstream::SessionOptions;
use serde_json::json;

/// Settings shared by the planning session and every worker.
///
/// Per-worker fields (workspace, proxy, model, tools) override these when
/// present.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    /// Shared workspace root.
    pub workspace: PathBuf,
    /// Worker definitions.
    pub workers: Vec<WorkerConfig>,
    /// Default model for planning and workers.
    pub model: Option<String>,
    /// Proxy settings.
    pub proxy: Option<ProxyConfig>,
    /// Upstream binary override.
    pub binary: Option<PathBuf>,
    /// Credentials file override.
    pub apps_json: Option<PathBuf>,
    /// Worker transport.
    pub transport: TransportKind,
}

impl OrchestratorSettings {
    /// Settings for a workspace and worker set; an empty worker set gets
    /// the default trio.
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>, workers: Vec<WorkerConfig>) -> Self {
        let mut settings = Self {
            workspace: workspace.into(),
            workers,
            ..Default::default()
        };
        if settings.workers.is_empty() {
            settings.workers = default_workers(None);
        }
        settings
    }

    /// Settings from an orchestrator agent config.
    #[must_use]
    pub fn from_agent_config(config: &AgentConfig, workspace: PathBuf) -> Self {
        let mut settings = Self::new(
            config.workspace_root.clone().unwrap_or(workspace),
            config.workers.clone(),
        );
        settings.model = config.model.clone();
        settings.proxy = config.proxy.clone();
        settings.transport = config.transport.unwrap_or_default();
        settings
    }

    /// Roles in declaration order.
    #[must_use]
    pub fn roles(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.role.clone()).collect()
    }

    /// Session options for the orchestrator's own chat-only planning
    /// session.
    #[must_use]
    pub fn planning_session_options(&self) -> SessionOptions {
        SessionOptions {
            workspace: self.workspace.clone(),
            agent_mode: false,
            binary: self.binary.clone(),
            apps_json: self.apps_json.clone(),
            proxy: self.proxy.clone(),
            ..Default::default()
        }
    }

    /// Session options for one worker, applying per-worker overrides.
    #[must_use]
    pub fn worker_session_options(&self, config: &WorkerConfig) -> SessionOptions {
        SessionOptions {
            workspace: config
                .workspace_root
                .clone()
                .unwrap_or_else(|| self.workspace.clone()),
            agent_mode: config.agent_mode,
            binary: self.binary.clone(),
            apps_json: self.apps_json.clone(),
            mcp_servers: config.mcp_servers.clone().unwrap_or_default(),
            lsp_servers: config.lsp_servers.clone().unwrap_or_default(),
            proxy: config.proxy.clone().or_else(|| self.proxy.clone()),
            tools: config.tools_enabled.clone(),
        }
    }
}

/// The default worker trio used when no workers are configured: a coder,
/// a read-only reviewer, and a tester.
#[must_use]
pub fn default_workers(model: Option<&str>) -> Vec<WorkerConfig> {
    let worker = |value: serde_json::Value| -> WorkerConfig {
        serde_json::from_value(value).expect("static worker config")
    };
    vec![
        worker(json!({
            "role": "coder",
            "system_prompt": "You are a skilled software engineer. Read code, understand \
                the codebase, make edits, and run commands as needed. Focus on clean, \
                working implementations.",
            "model": model,
            "agent_mode": true,
        })),
        worker(json!({
            "role": "reviewer",
            "system_prompt": "You are a code review expert. Examine code for bugs, style \
                issues, security vulnerabilities, and suggest improvements. Do NOT edit \
                files, only report findings.",
            "model": model,
            "agent_mode": true,
            "tools_enabled": [
                "read_file", "list_dir", "file_search", "grep_search",
                "get_errors", "search_workspace_symbols",
            ],
        })),
        worker(json!({
            "role": "tester",
            "system_prompt": "You are a testing specialist. Write comprehensive tests, run \
                the test suite, and report results. Ensure good coverage of edge cases \
                and failure modes.",
            "model": model,
            "agent_mode": true,
        })),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_config::ToolSelection;

    #[test]
    fn empty_workers_get_default_trio() {
        let settings = OrchestratorSettings::new("/tmp/ws", Vec::new());
        assert_eq!(settings.roles(), ["coder", "reviewer", "tester"]);

        let reviewer = &settings.workers[1];
        assert!(matches!(&reviewer.tools_enabled, ToolSelection::Named(names)
            if names.iter().any(|n| n == "read_file")
            && !names.iter().any(|n| n == "run_in_terminal")));
    }

    #[test]
    fn worker_overrides_beat_defaults() {
        let mut settings = OrchestratorSettings::new(
            "/tmp/ws",
            vec![serde_json::from_value(json!({
                "role": "special",
                "workspace_root": "/tmp/other",
                "proxy": {"url": "http://worker-proxy:1"},
                "agent_mode": false,
            }))
            .unwrap()],
        );
        settings.proxy = Some(maestro_config::ProxyConfig {
            url: "http://default-proxy:1".into(),
            no_ssl_verify: false,
        });

        let options = settings.worker_session_options(&settings.workers[0]);
        assert_eq!(options.workspace, PathBuf::from("/tmp/other"));
        assert_eq!(options.proxy.unwrap().url, "http://worker-proxy:1");
        assert!(!options.agent_mode);

        let planning = settings.planning_session_options();
        assert!(!planning.agent_mode);
        assert_eq!(planning.proxy.unwrap().url, "http://default-proxy:1");
    }

    #[test]
    fn agent_config_maps_through() {
        let config: AgentConfig = serde_json::from_value(json!({
            "name": "team",
            "model": "gpt-4.1",
            "transport": "queue",
            "workers": [{"role": "coder"}],
        }))
        .unwrap();
        let settings =
            OrchestratorSettings::from_agent_config(&config, PathBuf::from("/tmp/ws"));
        assert_eq!(settings.model.as_deref(), Some("gpt-4.1"));
        assert_eq!(settings.transport, TransportKind::Queue);
        assert_eq!(settings.roles(), ["coder"]);
    }
}
