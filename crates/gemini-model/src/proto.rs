use chatline_model::{ErrorKind, ModelMessage, ModelRequest};
use serde::{Deserialize, Serialize};

use crate::Error;

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub status: Option<String>,
}

// -----------
// Conversions
// -----------

/// Builds the request from the whole history. Gemini calls the assistant
/// role `model`.
pub fn create_request(req: &ModelRequest) -> GenerateContentRequest {
    let contents = req
        .messages
        .iter()
        .map(|msg| Content {
            role: match msg {
                ModelMessage::User(_) => "user",
                ModelMessage::Assistant(_) => "model",
            },
            parts: vec![Part {
                text: msg.text().to_owned(),
            }],
        })
        .collect();
    GenerateContentRequest { contents }
}

/// Extracts the reply text from the first candidate.
pub fn extract_reply(resp: GenerateContentResponse) -> Result<String, Error> {
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(Error::new(
            format!("the prompt was blocked: {reason}"),
            ErrorKind::Moderated,
        ));
    }

    let Some(candidate) = resp.candidates.into_iter().next() else {
        return Err(Error::new("no candidates in the reply", ErrorKind::Other));
    };
    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(Error::new(
            "the reply was blocked for safety reasons",
            ErrorKind::Moderated,
        ));
    }

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();
    Ok(text)
}
