use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

use crate::models::Collection;

#[derive(Parser, Debug)]
#[command(name = "pawscan-admin", about = "PawScan administration console")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Serve seeded in-memory data instead of a real backend
    #[arg(long)]
    pub demo: bool,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub tables: TablesConfig,
    pub console: ConsoleConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BackendConfig {
    /// Project URL, e.g. `https://abc.supabase.co`
    pub url: String,
    /// Public anon key sent as `apikey`
    pub anon_key: String,
    pub timeout_secs: u64,
}

/// Remote table behind each logical collection.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TablesConfig {
    pub posts: String,
    pub comments: String,
    pub likes: String,
    pub analysis_history: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ConsoleConfig {
    pub cookie_name: String,
    /// Characters of analysis text shown before the row is expanded
    pub truncate_length: usize,
    pub max_consoles: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            timeout_secs: 15,
        }
    }
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            posts: "newsfeed_posts".to_string(),
            comments: "newsfeed_comments".to_string(),
            likes: "newsfeed_likes".to_string(),
            analysis_history: "analysis_history".to_string(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            cookie_name: "pawscan_console".to_string(),
            truncate_length: 50,
            max_consoles: 256,
        }
    }
}

impl TablesConfig {
    pub fn table_for(&self, collection: Collection) -> &str {
        match collection {
            Collection::Posts => &self.posts,
            Collection::Comments => &self.comments,
            Collection::Likes => &self.likes,
            Collection::AnalysisHistory => &self.analysis_history,
        }
    }
}

pub const BACKEND_URL_ENV: &str = "PAWSCAN_BACKEND_URL";
pub const ANON_KEY_ENV: &str = "PAWSCAN_ANON_KEY";

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let config_path = match &cli.config {
            Some(path) => path.clone(),
            None => Self::data_dir(cli)?.join("config.toml"),
        };

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // Secrets may come from the environment instead of the file
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            config.backend.url = url;
        }
        if let Ok(key) = std::env::var(ANON_KEY_ENV) {
            config.backend.anon_key = key;
        }

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> anyhow::Result<PathBuf> {
        match &cli.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::home_dir()
                .map(|home| home.join(".pawscan-admin"))
                .ok_or_else(|| anyhow::anyhow!("Could not determine home directory")),
        }
    }

    /// Whether enough backend settings are present to talk to a project.
    pub fn backend_configured(&self) -> bool {
        !self.backend.url.trim().is_empty() && !self.backend.anon_key.trim().is_empty()
    }
}
