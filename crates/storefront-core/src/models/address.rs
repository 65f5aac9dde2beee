use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    #[serde(default)]
    pub is_default: bool,
}

impl Address {
    /// Single-line rendering for lists
    pub fn one_line(&self) -> String {
        let mut parts = vec![self.line1.clone()];
        if let Some(ref line2) = self.line2 {
            if !line2.is_empty() {
                parts.push(line2.clone());
            }
        }
        parts.push(self.city.clone());
        if let Some(ref state) = self.state {
            parts.push(format!("{} {}", state, self.postal_code));
        } else {
            parts.push(self.postal_code.clone());
        }
        parts.push(self.country.clone());
        parts.join(", ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub line1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    #[serde(default)]
    pub is_default: bool,
}
