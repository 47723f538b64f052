//! src/generate.rs — AI email copy generation: prompt assembly from prospect
//! facts and defensive parsing of the model's JSON output.
use anyhow::{bail, Context, Result};
use async_openai::{config::OpenAIConfig, types::*, Client};
use async_trait::async_trait;
use serde::Deserialize;

use crate::locale;
use crate::prospect::Prospect;

/// Bodies shorter than this are rejected as degenerate model output.
const MIN_BODY_CHARS: usize = 40;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GeneratedEmail {
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedEmail>;
}

/// Facts required before a prospect may be sent to the generator. Returns the
/// missing field name so the generation error is descriptive.
pub fn missing_required_fact(p: &Prospect) -> Option<&'static str> {
    if p.first_name.as_deref().map_or(true, |s| s.trim().is_empty()) {
        return Some("first_name");
    }
    if p.job_title.as_deref().map_or(true, |s| s.trim().is_empty()) {
        return Some("job_title");
    }
    if p.company.as_deref().map_or(true, |s| s.trim().is_empty()) {
        return Some("company");
    }
    if p.country.as_deref().map_or(true, |s| s.trim().is_empty()) {
        return Some("country");
    }
    None
}

/// Language for the generated copy: explicit field wins, else inferred from
/// the country.
pub fn content_language(p: &Prospect) -> &'static str {
    match p.language.as_deref() {
        Some(l) if !l.trim().is_empty() => locale::normalize_language(Some(l)),
        _ => locale::language_for_country(p.country.as_deref()),
    }
}

pub fn build_prompt(p: &Prospect, lang: &str) -> String {
    let language = if lang == "fr" { "French" } else { "English" };
    let mut facts = vec![
        format!("Name: {}", p.full_name()),
        format!("Job title: {}", p.job_title.as_deref().unwrap_or("")),
        format!("Company: {}", p.company.as_deref().unwrap_or("")),
        format!("Country: {}", p.country.as_deref().unwrap_or("")),
    ];
    if let Some(industry) = p.industry.as_deref() {
        facts.push(format!("Industry: {industry}"));
    }
    if let Some(location) = p.location.as_deref() {
        facts.push(format!("Location: {location}"));
    }
    for (key, value) in &p.facts {
        facts.push(format!("{key}: {value}"));
    }
    format!(
        "Write a short, personalized cold outreach email in {language} for this prospect.\n\
         Do not include a greeting, closing or signature; only the core message.\n\n\
         {}\n\n\
         Respond with a single JSON object: {{\"subject\": \"...\", \"body\": \"...\"}}",
        facts.join("\n")
    )
}

/// Models wrap JSON in code fences, preface it with prose, or sneak in
/// comments. Cut down to the outermost object and drop comments before
/// parsing.
fn clean_model_output(raw: &str) -> Result<String> {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        text = stripped;
    } else if let Some(stripped) = text.strip_prefix("```") {
        text = stripped;
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped;
    }
    let start = text.find('{').context("no JSON object in model output")?;
    let end = text.rfind('}').context("unterminated JSON object in model output")?;
    if end < start {
        bail!("malformed JSON object in model output");
    }
    Ok(strip_comments(&text[start..=end]))
}

/// Remove `//` comments outside string literals.
fn strip_comments(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for line in json.lines() {
        let mut in_string = false;
        let mut escaped = false;
        let mut cut = line.len();
        let mut prev = '\0';
        for (i, c) in line.char_indices() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    in_string = false;
                }
            } else if c == '"' {
                in_string = true;
            } else if c == '/' && prev == '/' {
                cut = i - 1;
                break;
            }
            prev = c;
        }
        out.push_str(line[..cut].trim_end());
        out.push('\n');
    }
    out
}

/// Clean, parse and validate a raw model response.
pub fn parse_generated(raw: &str) -> Result<GeneratedEmail> {
    let cleaned = clean_model_output(raw)?;
    let email: GeneratedEmail =
        serde_json::from_str(&cleaned).context("parse generated email JSON")?;
    if email.subject.trim().is_empty() {
        bail!("generated email has an empty subject");
    }
    if email.body.trim().len() < MIN_BODY_CHARS {
        bail!(
            "generated email body too short ({} chars)",
            email.body.trim().len()
        );
    }
    Ok(email)
}

pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(api_key: String, model: String) -> Self {
        OpenAiGenerator {
            client: Client::with_config(OpenAIConfig::new().with_api_key(api_key)),
            model,
        }
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedEmail> {
        let req = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: "You write concise, personalized cold outreach emails. \
                              Respond with a single JSON object only."
                        .into(),
                    ..Default::default()
                }),
                ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                    content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                    ..Default::default()
                }),
            ])
            .max_tokens(600u16)
            .build()
            .context("build chat completion request")?;

        let resp = self
            .client
            .chat()
            .create(req)
            .await
            .context("chat completion call")?;
        let content = resp
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or("");
        parse_generated(content)
    }
}
