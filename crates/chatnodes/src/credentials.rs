use chatvault::CredentialSchema;

/// Credential read by `textChain`
pub fn openai_api_credential() -> CredentialSchema {
    let mut schema = CredentialSchema::new("openAIApi", "OpenAI API").with_input("openAIApiKey", "password");
    schema.inputs[0].label = "OpenAI Api Key".to_string();
    schema
}
