use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "agathon.duckdb".to_string(),
        }
    }
}

/// A static bearer token and the profile it authenticates as.
#[derive(Debug, Deserialize, Clone)]
pub struct TokenEntry {
    pub token: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

impl AuthConfig {
    pub fn user_for_token(&self, token: &str) -> Option<&str> {
        self.tokens
            .iter()
            .find(|entry| !entry.token.is_empty() && entry.token == token)
            .map(|entry| entry.user_id.as_str())
    }
}

/// An OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl ProviderConfig {
    /// OpenRouter with an image-capable model.
    pub fn premium_default() -> Self {
        Self {
            name: "openrouter".to_string(),
            api_base: "https://openrouter.ai/api/v1".to_string(),
            api_key: String::new(),
            model: "google/gemini-2.5-flash-image-preview".to_string(),
            timeout_secs: 120,
        }
    }

    /// Hack Club AI, text only.
    pub fn free_default() -> Self {
        Self {
            name: "hackclub".to_string(),
            api_base: "https://ai.hackclub.com".to_string(),
            api_key: String::new(),
            model: "qwen/qwen3-32b".to_string(),
            timeout_secs: 60,
        }
    }
}

/// A provider section as written in the file. Unset fields keep the tier default.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ProviderOverrides {
    name: Option<String>,
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

impl ProviderOverrides {
    fn apply(self, base: ProviderConfig) -> ProviderConfig {
        ProviderConfig {
            name: self.name.unwrap_or(base.name),
            api_base: self.api_base.unwrap_or(base.api_base),
            api_key: self.api_key.unwrap_or(base.api_key),
            model: self.model.unwrap_or(base.model),
            timeout_secs: self.timeout_secs.unwrap_or(base.timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ProvidersSection {
    premium: ProviderOverrides,
    free: ProviderOverrides,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(from = "ProvidersSection")]
pub struct ProvidersConfig {
    pub premium: ProviderConfig,
    pub free: ProviderConfig,
}

impl From<ProvidersSection> for ProvidersConfig {
    fn from(section: ProvidersSection) -> Self {
        Self {
            premium: section.premium.apply(ProviderConfig::premium_default()),
            free: section.free.apply(ProviderConfig::free_default()),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersSection::default().into()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CreditsConfig {
    pub generate_solution_cost: i64,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            generate_solution_cost: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub max_results: usize,
    pub max_terms: usize,
    pub snippet_window: usize,
    pub snippet_step: usize,
    pub max_content_chars: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            max_results: 3,
            max_terms: 5,
            snippet_window: 400,
            snippet_step: 50,
            max_content_chars: 50_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ComposioConfig {
    pub api_base: String,
    pub api_key: String,
    /// Connector provider name (e.g. "googledrive") to the action that lists its documents.
    pub actions: HashMap<String, String>,
}

impl Default for ComposioConfig {
    fn default() -> Self {
        let mut actions = HashMap::new();
        actions.insert("googledrive".to_string(), "GOOGLEDRIVE_LIST_FILES".to_string());
        actions.insert(
            "googleclassroom".to_string(),
            "GOOGLE_CLASSROOM_COURSES_LIST".to_string(),
        );
        Self {
            api_base: "https://backend.composio.dev/api/v2".to_string(),
            api_key: String::new(),
            actions,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    #[serde(default)]
    pub composio: ComposioConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    pub max_history_messages: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_history_messages: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub credits: CreditsConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("AGATHON").separator("__"))
            .build()?;

        let mut app_config: AppConfig = settings.try_deserialize()?;

        // Expand environment variables if present like ${OPENROUTER_API_KEY}
        app_config.server.host = expand_env(&app_config.server.host);
        app_config.database.path = expand_env(&app_config.database.path);
        app_config.providers.premium.api_key = expand_env(&app_config.providers.premium.api_key);
        app_config.providers.free.api_key = expand_env(&app_config.providers.free.api_key);
        app_config.connectors.composio.api_key = expand_env(&app_config.connectors.composio.api_key);
        for entry in app_config.auth.tokens.iter_mut() {
            entry.token = expand_env(&entry.token);
        }

        Ok(app_config)
    }
}

pub fn expand_env(val: &str) -> String {
    if val.starts_with("${") && val.ends_with('}') {
        let var_name = &val[2..val.len() - 1];
        std::env::var(var_name).unwrap_or_default()
    } else {
        val.to_string()
    }
}
