//! Tenant theme loading.
//!
//! A tenant may override any subset of the theme tokens; everything it leaves unset
//! falls back to [`ThemeTokens::default`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Errors from [`load_tenant_theme`]. `E` is the theme source's own error.
#[derive(thiserror::Error, Debug)]
pub enum ThemeError<E: std::error::Error + 'static> {
    #[error("Missing tenantId for theme lookup.")]
    MissingTenant,
    #[error("theme source failed: {0}")]
    Source(#[source] E),
}

/// Resolved CSS colour tokens shared by the booking widget and dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeTokens {
    pub primary: String,
    pub secondary: String,
    pub background: String,
    pub surface: String,
    pub text: String,
}

impl Default for ThemeTokens {
    fn default() -> Self {
        Self {
            primary: "#2d5bff".into(),
            secondary: "#f4f6fb".into(),
            background: "#ffffff".into(),
            surface: "#ffffff".into(),
            text: "#0f172a".into(),
        }
    }
}

impl ThemeTokens {
    /// Overlay the tokens a tenant set on top of these.
    pub fn merged(mut self, overrides: &PartialThemeTokens) -> Self {
        let slots = [
            (&mut self.primary, &overrides.primary),
            (&mut self.secondary, &overrides.secondary),
            (&mut self.background, &overrides.background),
            (&mut self.surface, &overrides.surface),
            (&mut self.text, &overrides.text),
        ];
        for (slot, value) in slots {
            if let Some(value) = value {
                slot.clone_from(value);
            }
        }
        self
    }
}

/// Tokens as stored per tenant; any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialThemeTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A stored tenant theme document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantThemeDocument {
    pub tenant_id: String,
    pub tokens: PartialThemeTokens,
    pub updated_at: DateTime<Utc>,
}

/// Where tenant theme documents come from (a document database in production).
#[async_trait]
pub trait ThemeSource: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn find_one(&self, tenant_id: &str) -> Result<Option<TenantThemeDocument>, Self::Error>;
}

/// Load a tenant's theme merged over the defaults.
pub async fn load_tenant_theme<S>(
    source: &S,
    tenant_id: &str,
) -> Result<ThemeTokens, ThemeError<S::Error>>
where
    S: ThemeSource + ?Sized,
{
    if tenant_id.is_empty() {
        return Err(ThemeError::MissingTenant);
    }

    let document = source.find_one(tenant_id).await.map_err(ThemeError::Source)?;
    Ok(match document {
        Some(doc) => ThemeTokens::default().merged(&doc.tokens),
        None => {
            tracing::debug!(tenant_id, "no theme stored for tenant, using defaults");
            ThemeTokens::default()
        }
    })
}
