use serde::{Deserialize, Serialize};

use super::TextRequest;

const NOTES_SYSTEM_PROMPT: &str = "You are an expert study assistant. Generate clear, comprehensive study notes that help students learn effectively. Format the notes with:
- Clear headings and structure
- Key concepts highlighted
- Examples where relevant
- Summary points at the end

Keep the tone educational but engaging.";

const DOUBT_SYSTEM_PROMPT: &str = "You are an expert tutor who helps students understand concepts clearly. When answering questions:
- Break down complex topics into simple steps
- Provide clear explanations with examples
- Use analogies when helpful
- If it's a math or science problem, show the working/steps
- Be encouraging and supportive

Always aim to help the student understand, not just get the answer.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Brief,
    #[default]
    Medium,
    Detailed,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailLevel::Brief => "brief",
            DetailLevel::Medium => "medium",
            DetailLevel::Detailed => "detailed",
        }
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn notes_request(topic: &str, subject: Option<&str>, detail: DetailLevel) -> TextRequest {
    let subject_clause = present(subject)
        .map(|s| format!(" in the subject of {}", s))
        .unwrap_or_default();

    let user_prompt = format!(
        "Generate detailed study notes on the topic: \"{}\"{}.
Detail level: {}

Please provide comprehensive notes that cover:
1. Key concepts and definitions
2. Important points to remember
3. Examples and applications
4. Summary of main takeaways",
        topic.trim(),
        subject_clause,
        detail.as_str()
    );

    TextRequest {
        system_prompt: NOTES_SYSTEM_PROMPT.to_string(),
        user_prompt,
        image: None,
    }
}

/// Bare base64 payloads are assumed to be JPEG.
pub fn image_data_url(image: &str) -> String {
    if image.starts_with("data:") {
        image.to_string()
    } else {
        format!("data:image/jpeg;base64,{}", image)
    }
}

pub fn doubt_request(question: &str, subject: Option<&str>, image: Option<&str>) -> TextRequest {
    let user_prompt = match present(subject) {
        Some(subject) => format!("[Subject: {}]\n\n{}", subject, question.trim()),
        None => question.trim().to_string(),
    };

    TextRequest {
        system_prompt: DOUBT_SYSTEM_PROMPT.to_string(),
        user_prompt,
        image: present(image).map(image_data_url),
    }
}
