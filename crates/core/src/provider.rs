#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Missing API key for {provider_name} ({env_var})")]
    MissingApiKey {
        provider_name: String,
        env_var: String,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Provider {
    #[default]
    Gemini,
    Openai,
    Grok,
}

pub struct ProviderConfig {
    pub api_url: &'static str,
    pub model: &'static str,
    pub env_var: &'static str,
}

impl Provider {
    pub fn config(&self) -> ProviderConfig {
        match self {
            Provider::Gemini => ProviderConfig {
                api_url: "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
                model: "gemini-2.0-flash",
                env_var: "GEMINI_API_KEY",
            },
            Provider::Openai => ProviderConfig {
                api_url: "https://api.openai.com/v1/chat/completions",
                model: "gpt-4.1-mini",
                env_var: "OPENAI_API_KEY",
            },
            Provider::Grok => ProviderConfig {
                api_url: "https://api.x.ai/v1/chat/completions",
                model: "grok-4-fast",
                env_var: "XAI_API_KEY",
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Gemini => "Gemini",
            Provider::Openai => "OpenAI",
            Provider::Grok => "Grok",
        }
    }

    /// Validate that the API key is set for this provider
    pub fn validate_api_key(&self) -> Result<String, ProviderError> {
        let config = self.config();
        std::env::var(config.env_var).map_err(|_| ProviderError::MissingApiKey {
            provider_name: self.name().to_string(),
            env_var: config.env_var.to_string(),
        })
    }
}

/// A concrete chat-completions endpoint: provider defaults plus overrides.
#[derive(Clone, Debug)]
pub struct InferenceEndpoint {
    pub provider: Provider,
    pub api_url: String,
    pub model: String,
    pub api_key: String,
}

impl InferenceEndpoint {
    /// Resolves the endpoint for `provider`, reading the API key from the environment.
    pub fn from_env(
        provider: Provider,
        api_url: Option<String>,
        model: Option<String>,
    ) -> Result<Self, ProviderError> {
        let api_key = provider.validate_api_key()?;
        Ok(Self::new(provider, api_key).with_overrides(api_url, model))
    }

    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        let config = provider.config();
        Self {
            provider,
            api_url: config.api_url.to_string(),
            model: config.model.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_overrides(mut self, api_url: Option<String>, model: Option<String>) -> Self {
        if let Some(api_url) = api_url {
            self.api_url = api_url;
        }
        if let Some(model) = model {
            self.model = model;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_defaults() {
        let endpoint = InferenceEndpoint::new(Provider::Openai, "key")
            .with_overrides(Some("http://localhost:9000/v1".into()), None);
        assert_eq!(endpoint.api_url, "http://localhost:9000/v1");
        assert_eq!(endpoint.model, Provider::Openai.config().model);
        assert_eq!(endpoint.api_key, "key");
    }

    #[test]
    fn gemini_is_the_default_provider() {
        assert_eq!(Provider::default(), Provider::Gemini);
        assert_eq!(Provider::default().config().env_var, "GEMINI_API_KEY");
    }
}
