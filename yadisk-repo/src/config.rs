use anyhow::Context;

pub const DEFAULT_API_URL: &str = "https://cloud-api.yandex.net";
const DEFAULT_PAGE_SIZE: u64 = 100;

/// Settings read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub api_url: String,
    pub page_size: u32,
    /// Skip the Disk trash when deleting.
    pub delete_permanently: bool,
    /// Same as `--yes`.
    pub assume_yes: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("YADISK_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            page_size: u32::try_from(read_u64_env("YADISK_PAGE_SIZE", DEFAULT_PAGE_SIZE))
                .unwrap_or(u32::MAX),
            delete_permanently: read_bool_env("YADISK_DELETE_PERMANENTLY", false),
            assume_yes: read_bool_env("YADISK_ASSUME_YES", false),
        }
    }

    /// OAuth token for the Disk API; only remote commands need it.
    pub fn token() -> anyhow::Result<String> {
        std::env::var("YADISK_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty())
            .context("YADISK_TOKEN is not set")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE as u32,
            delete_permanently: false,
            assume_yes: false,
        }
    }
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}
