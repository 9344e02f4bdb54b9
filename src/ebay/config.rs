use crate::config::{env_or, env_parse};

const PROD_ROOT: &str = "https://api.ebay.com";
const SANDBOX_ROOT: &str = "https://api.sandbox.ebay.com";

pub const APP_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";

/// Cars & Trucks under eBay Motors.
pub const DEFAULT_MOTORS_CATEGORY_ID: &str = "6001";

#[derive(Debug, Clone)]
pub struct EbayConfig {
    pub root: String,
    pub app_id: String,
    pub app_secret: String,
    pub marketplace_id: String,
    pub category_id: String,
    pub page_size: u32,
}

impl EbayConfig {
    pub fn from_env() -> Self {
        let env = env_or("EBAY_ENV", "SANDBOX");
        let root = std::env::var("EBAY_API_ROOT").unwrap_or_else(|_| root_for(&env).to_string());
        Self {
            root: root.trim_end_matches('/').to_string(),
            app_id: std::env::var("EBAY_APP_ID").unwrap_or_default(),
            app_secret: std::env::var("EBAY_CERT_ID").unwrap_or_default(),
            marketplace_id: env_or("EBAY_MARKETPLACE_ID", "EBAY_US"),
            category_id: env_or("EBAY_MOTORS_CATEGORY_ID", DEFAULT_MOTORS_CATEGORY_ID),
            page_size: env_parse::<u32>("EBAY_SEARCH_PAGE_SIZE")
                .filter(|v| (1..=200).contains(v))
                .unwrap_or(200),
        }
    }

    pub fn with_root(root: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_end_matches('/').to_string(),
            app_id: String::new(),
            app_secret: String::new(),
            marketplace_id: "EBAY_US".into(),
            category_id: DEFAULT_MOTORS_CATEGORY_ID.into(),
            page_size: 200,
        }
    }

    pub fn with_credentials(mut self, app_id: &str, app_secret: &str) -> Self {
        self.app_id = app_id.to_string();
        self.app_secret = app_secret.to_string();
        self
    }

    pub fn oauth_token_url(&self) -> String {
        format!("{}/identity/v1/oauth2/token", self.root)
    }

    pub fn search_url(&self) -> String {
        format!("{}/buy/browse/v1/item_summary/search", self.root)
    }

    pub fn has_credentials(&self) -> bool {
        !self.app_id.trim().is_empty() && !self.app_secret.trim().is_empty()
    }
}

fn root_for(env: &str) -> &'static str {
    if env.eq_ignore_ascii_case("PROD") {
        PROD_ROOT
    } else {
        SANDBOX_ROOT
    }
}
