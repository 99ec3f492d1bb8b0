//! Payee-provided success action attached to Lightning payments

use serde::{Deserialize, Serialize};

/// Longest description/text a payee may attach
pub const MAX_SUCCESS_ACTION_LEN: usize = 144;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessAction {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl SuccessAction {
    /// Check the payload shape. Returns the reason it is unusable.
    pub fn check(&self) -> Result<(), String> {
        let fields = [&self.description, &self.text, &self.url];
        if fields.iter().all(|f| f.as_deref().map_or(true, str::is_empty)) {
            return Err("empty payload".to_string());
        }

        for (name, value) in [("description", &self.description), ("text", &self.text)] {
            if let Some(value) = value {
                if value.chars().count() > MAX_SUCCESS_ACTION_LEN {
                    return Err(format!("{name} longer than {MAX_SUCCESS_ACTION_LEN} chars"));
                }
            }
        }

        if let Some(url) = &self.url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(format!("unsupported url scheme: {url}"));
            }
        }

        Ok(())
    }

    /// Keep a well-formed payload, drop a garbled one with a warning.
    pub fn sanitize(action: Option<SuccessAction>, swap_id: &str) -> Option<SuccessAction> {
        let action = action?;
        match action.check() {
            Ok(()) => Some(action),
            Err(reason) => {
                tracing::warn!("Dropping success action for swap {}: {}", swap_id, reason);
                None
            }
        }
    }
}
