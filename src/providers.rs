use serde::{Deserialize, Serialize};

/// Persona preamble sent with every upstream call. Pins the reply language
/// to Sorani Kurdish whatever language the user writes in.
pub const SYSTEM_PROMPT: &str = "You are زیرەکی دەستکردی قەڵا (AI Castle), a smart and fast assistant that ALWAYS responds in Sorani Kurdish \
regardless of what language the user writes in. Always keep responses concise, direct and useful. \
The Sorani Kurdish language uses Arabic script and is read right-to-left. \
Your responses should be informative, accurate, and culturally appropriate for Kurdish speakers. \
Remember to NEVER respond in any language other than Sorani Kurdish under any circumstances.";

// -- Cohere chat types ------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CohereChatRequest {
    pub message: String,
    pub model: String,
    pub stream: bool,
    pub preamble: String,
    pub temperature: f32,
    pub p: f32,
    pub max_tokens: u32,
}

/// One line of the streamed response body. Only `text` is consumed; the
/// other fields are kept for logging.
#[derive(Debug, Deserialize)]
pub struct CohereStreamEvent {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub is_finished: Option<bool>,
    #[serde(default)]
    pub text: Option<String>,
}
