use crate::CredentialData;
use serde::{Deserialize, Serialize};

/// Sentinel sent to clients in place of a secret value
pub const REDACTED_CREDENTIAL_VALUE: &str = "_CHATFLOW_BLANK_07167752-1a71-43b1-bf8f-4f32252165db";

/// Declared shape of a credential type, e.g. `openAIApi`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSchema {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<CredentialInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialInput {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub input_type: String,
    #[serde(default)]
    pub optional: bool,
}

impl CredentialSchema {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            description: String::new(),
            inputs: Vec::new(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, input_type: impl Into<String>) -> Self {
        let name = name.into();
        self.inputs.push(CredentialInput {
            label: name.clone(),
            name,
            input_type: input_type.into(),
            optional: false,
        });
        self
    }

    pub fn is_password(&self, field: &str) -> bool {
        self.inputs
            .iter()
            .any(|input| input.input_type == "password" && input.name == field)
    }
}

/// Copy of `data` with every password-typed field replaced by the sentinel.
pub fn redact_password_fields(schema: &CredentialSchema, data: &CredentialData) -> CredentialData {
    data.iter()
        .map(|(field, value)| {
            let value = if schema.is_password(field) {
                serde_json::Value::String(REDACTED_CREDENTIAL_VALUE.to_string())
            } else {
                value.clone()
            };
            (field.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_password_fields_are_blanked() {
        let schema = CredentialSchema::new("openAIApi", "OpenAI API")
            .with_input("openAIApiKey", "password")
            .with_input("basePath", "string");
        let data = CredentialData::from([
            ("openAIApiKey".to_string(), json!("sk-secret")),
            ("basePath".to_string(), json!("https://api.example.com")),
            ("extra".to_string(), json!({ "nested": [1, 2] })),
        ]);

        let redacted = redact_password_fields(&schema, &data);

        assert_eq!(redacted["openAIApiKey"], json!(REDACTED_CREDENTIAL_VALUE));
        assert_eq!(redacted["basePath"], data["basePath"]);
        assert_eq!(redacted["extra"], data["extra"]);
        assert_eq!(redacted.len(), data.len());
    }
}
