use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "quillpad", about = "Content backend for a blog and community platform")]
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
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub google: GoogleConfig,
    pub mail: MailConfig,
    pub cors: CorsConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL used when building links sent by email.
    pub public_url: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
    /// Prefix for public object URLs (avatars and post images). The default
    /// `/media` is served by this process.
    pub public_base_url: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
    pub access_token_minutes: i64,
    pub refresh_token_minutes: i64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: Option<String>,
    pub certs_url: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MailConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub from_email: String,
    pub contact_email: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            public_url: "http://localhost:8000".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            public_base_url: "/media".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            access_token_minutes: 10 * 24 * 60,
            refresh_token_minutes: 30 * 24 * 60,
        }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            certs_url: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: "https://api.sendgrid.com/v3/mail/send".to_string(),
            from_email: "no-reply@localhost".to_string(),
            contact_email: "contact@localhost".to_string(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // Secrets may come from the environment instead of the file
        config.apply_env(|key| std::env::var(key).ok());

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("quillpad.db"));
        }
        if config.storage.path.is_none() {
            config.storage.path = Some(data_dir.join("media"));
        }

        Ok(config)
    }

    /// Apply environment overrides through `lookup` so tests can feed a fake environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup("QUILLPAD_JWT_SECRET").filter(|s| !s.is_empty()) {
            self.auth.jwt_secret = Some(secret);
        }
        if let Some(client_id) = lookup("GOOGLE_CLIENT_ID").filter(|s| !s.is_empty()) {
            self.google.client_id = Some(client_id);
        }
        if let Some(api_key) = lookup("SENDGRID_API_KEY").filter(|s| !s.is_empty()) {
            self.mail.api_key = Some(api_key);
        }
        if let Some(from) = lookup("DEFAULT_FROM_EMAIL").filter(|s| !s.is_empty()) {
            self.mail.from_email = from;
        }
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".quillpad")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("quillpad.db"))
    }

    pub fn media_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("media"))
    }

    pub fn access_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.auth.access_token_minutes)
    }

    pub fn refresh_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.auth.refresh_token_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cli(data_dir: Option<PathBuf>) -> Cli {
        Cli {
            config: None,
            host: None,
            port: None,
            data_dir,
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.auth.access_token_minutes, 14_400);
        assert_eq!(config.auth.refresh_token_minutes, 43_200);
        assert_eq!(config.storage.public_base_url, "/media");
        assert!(config.auth.jwt_secret.is_none());
        assert!(config.database.path.is_none());
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let cli = cli(Some(PathBuf::from("/tmp/test-quillpad")));
        assert_eq!(Config::data_dir(&cli), PathBuf::from("/tmp/test-quillpad"));
    }

    #[test]
    fn data_dir_defaults_to_dot_quillpad() {
        let dir = Config::data_dir(&cli(None));
        assert!(dir.ends_with(".quillpad"));
    }

    #[test]
    fn load_with_no_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&cli(Some(tmp.path().to_path_buf()))).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.db_path(), tmp.path().join("quillpad.db"));
        assert_eq!(config.media_path(), tmp.path().join("media"));
    }

    #[test]
    fn load_reads_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
port = 9000

[auth]
jwt_secret = "from-file"
access_token_minutes = 15

[cors]
allowed_origins = ["https://blog.example.com"]
"#,
        )
        .unwrap();

        let mut cli = cli(Some(tmp.path().to_path_buf()));
        cli.config = Some(config_path);
        cli.port = Some(4000);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.auth.access_token_minutes, 15);
        assert_eq!(config.auth.refresh_token_minutes, 43_200);
        assert_eq!(config.cors.allowed_origins, vec!["https://blog.example.com"]);
        assert_eq!(config.access_ttl(), chrono::Duration::minutes(15));
    }

    #[test]
    fn env_overrides_secrets() {
        let env: HashMap<&str, &str> = [
            ("QUILLPAD_JWT_SECRET", "s3cret"),
            ("GOOGLE_CLIENT_ID", "client.apps.googleusercontent.com"),
            ("SENDGRID_API_KEY", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.auth.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(
            config.google.client_id.as_deref(),
            Some("client.apps.googleusercontent.com")
        );
        // Empty values do not clobber the file setting
        assert!(config.mail.api_key.is_none());
    }
}
