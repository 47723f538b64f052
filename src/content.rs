//! src/content.rs — wraps the generator's core body in a locale-appropriate
//! greeting/closing/unsubscribe frame and converts plain text to HTML.

pub struct MessageFrame<'a> {
    pub first_name: &'a str,
    pub sender_name: &'a str,
    pub unsubscribe_url: &'a str,
}

/// Full plain-text message around the AI-generated core body. Only the
/// phrasing differs between French and the default English frame.
pub fn compose_body(lang: &str, core_body: &str, frame: &MessageFrame<'_>) -> String {
    let (greeting, closing, unsubscribe) = if lang == "fr" {
        (
            format!("Bonjour {},", frame.first_name),
            format!("Bien cordialement,\n{}", frame.sender_name),
            format!(
                "Si vous ne souhaitez plus recevoir nos emails : {}",
                frame.unsubscribe_url
            ),
        )
    } else {
        (
            format!("Hi {},", frame.first_name),
            format!("Best regards,\n{}", frame.sender_name),
            format!(
                "If you'd rather not hear from us again, unsubscribe here: {}",
                frame.unsubscribe_url
            ),
        )
    };
    format!(
        "{greeting}\n\n{}\n\n{closing}\n\n{unsubscribe}",
        core_body.trim()
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Plain text → HTML: escape, blank-line-separated blocks become paragraphs,
/// single line breaks become `<br>`.
pub fn text_to_html(text: &str) -> String {
    text.replace("\r\n", "\n")
        .split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(|block| format!("<p>{}</p>", escape_html(block.trim()).replace('\n', "<br>")))
        .collect::<Vec<_>>()
        .join("\n")
}
