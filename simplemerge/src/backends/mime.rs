//! RFC 5322 rendering of outgoing messages

use base64::{Engine as _, engine::general_purpose::STANDARD};
use simplemerge_campaign::OutgoingMessage;

/// Longest encoded body line
const LINE_LENGTH: usize = 76;

/// Characters that force a display name to be encoded
const SPECIALS: &[char] = &['(', ')', '<', '>', '[', ']', ':', ';', '@', '\\', ',', '"'];

/// Render `message` as a single-part HTML message.
///
/// The body is base64 encoded so arbitrary HTML survives transit untouched.
#[must_use]
pub fn compose(message: &OutgoingMessage) -> String {
    let mut raw = String::new();

    push_header(&mut raw, "From", &from_header(message));
    push_header(&mut raw, "To", &message.to);
    push_header(&mut raw, "Subject", &encode_word(&message.subject));
    push_header(&mut raw, "MIME-Version", "1.0");
    push_header(&mut raw, "Content-Type", "text/html; charset=\"UTF-8\"");
    push_header(&mut raw, "Content-Transfer-Encoding", "base64");

    if let Some(in_reply_to) = &message.in_reply_to {
        push_header(&mut raw, "In-Reply-To", in_reply_to);
    }
    if let Some(references) = &message.references {
        push_header(&mut raw, "References", references);
    }

    raw.push_str("\r\n");

    let encoded = STANDARD.encode(message.body.as_bytes());
    for line in encoded.as_bytes().chunks(LINE_LENGTH) {
        raw.push_str(&String::from_utf8_lossy(line));
        raw.push_str("\r\n");
    }

    raw
}

fn push_header(raw: &mut String, name: &str, value: &str) {
    raw.push_str(name);
    raw.push_str(": ");
    // Folding is left to the provider; line breaks would start new headers
    raw.extend(value.chars().map(|c| if c == '\r' || c == '\n' { ' ' } else { c }));
    raw.push_str("\r\n");
}

fn from_header(message: &OutgoingMessage) -> String {
    let name = message.display_name.trim();
    if name.is_ascii() && !name.contains(SPECIALS) {
        message.from_header()
    } else {
        format!("{} <{}>", encode_word(name), message.from)
    }
}

/// RFC 2047 encoded word for non-ASCII text; ASCII passes through
fn encode_word(text: &str) -> String {
    if text.is_ascii() {
        text.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(text.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn message() -> OutgoingMessage {
        OutgoingMessage::new(
            "a@x.com",
            "Recruitment Team",
            "jane@y.com",
            "Opening at Acme",
            "<p>Hi Jane</p>",
        )
    }

    fn body_of(raw: &str) -> String {
        let (_, body) = raw.split_once("\r\n\r\n").unwrap();
        let bytes = STANDARD.decode(body.replace("\r\n", "")).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn composes_html_message() {
        let raw = compose(&message());

        assert!(raw.starts_with("From: Recruitment Team <a@x.com>\r\nTo: jane@y.com\r\n"));
        assert!(raw.contains("Subject: Opening at Acme\r\n"));
        assert!(raw.contains("Content-Type: text/html; charset=\"UTF-8\"\r\n"));
        assert!(!raw.contains("In-Reply-To"));
        assert_eq!(body_of(&raw), "<p>Hi Jane</p>");
    }

    #[test]
    fn reply_headers_are_included() {
        let mut message = message();
        message.in_reply_to = Some("<abc@mail>".to_string());
        message.references = Some("<abc@mail>".to_string());

        let raw = compose(&message);
        assert!(raw.contains("In-Reply-To: <abc@mail>\r\n"));
        assert!(raw.contains("References: <abc@mail>\r\n"));
    }

    #[test]
    fn non_ascii_and_line_breaks_are_neutralised() {
        let mut message = message();
        message.subject = "Poste à Montréal".to_string();
        message.display_name = "Équipe RH".to_string();
        message.to = "jane@y.com\r\nBcc: evil@z.com".to_string();

        let raw = compose(&message);
        assert!(raw.contains("Subject: =?UTF-8?B?"));
        assert!(raw.contains("From: =?UTF-8?B?"));
        assert!(raw.contains("To: jane@y.com  Bcc: evil@z.com\r\n"));
        assert!(!raw.contains("\r\nBcc:"));
    }

    #[test]
    fn long_bodies_are_wrapped() {
        let mut message = message();
        message.body = "x".repeat(500);

        let raw = compose(&message);
        let (_, body) = raw.split_once("\r\n\r\n").unwrap();
        assert!(body.lines().all(|line| line.len() <= LINE_LENGTH));
        assert_eq!(body_of(&raw), "x".repeat(500));
    }
}
