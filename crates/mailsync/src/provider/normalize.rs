//! Provider message normalization
//!
//! Pure transform from a raw provider payload to the mirrored [`Message`]
//! record. Deliberately total: malformed input yields a best-effort record,
//! never an error, so one bad message can never abort a batch.

use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};

use super::api::{MessagePart, MessagePayload, RawMessage};
use crate::models::{Attachment, EmailAddress, Message, MessageId, ThreadId, WorkspaceId};

/// Bodies and attachments collected from one MIME part tree
#[derive(Default)]
struct ExtractedContent {
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

/// Normalize a raw provider message into a mirrored Message
pub fn normalize_message(
    raw: RawMessage,
    workspace_id: &WorkspaceId,
    integration_id: &str,
) -> Message {
    let id = MessageId::new(&raw.id);
    let thread_id = ThreadId::new(&raw.thread_id);

    let payload = raw.payload.unwrap_or_default();

    let from = extract_header(&payload, "From")
        .map(|s| EmailAddress::parse(&s))
        .unwrap_or_else(|| EmailAddress::new("unknown@unknown.com"));

    let to = extract_header(&payload, "To")
        .map(|s| EmailAddress::parse_list(&s))
        .unwrap_or_default();

    let cc = extract_header(&payload, "Cc")
        .map(|s| EmailAddress::parse_list(&s))
        .unwrap_or_default();

    let bcc = extract_header(&payload, "Bcc")
        .map(|s| EmailAddress::parse_list(&s))
        .unwrap_or_default();

    let subject = extract_header(&payload, "Subject").unwrap_or_default();

    // Internal date (milliseconds since epoch) drives received_at
    let internal_date: i64 = raw.internal_date.parse().unwrap_or(0);
    let received_at = Utc
        .timestamp_millis_opt(internal_date)
        .single()
        .unwrap_or_else(Utc::now);

    // The Date header is what the sender claims; fall back to the
    // provider's timestamp when it is missing or unparseable
    let sent_at = extract_header(&payload, "Date")
        .and_then(|s| parse_rfc2822_date(&s))
        .unwrap_or(received_at);

    let mut content = ExtractedContent::default();
    collect_payload_content(&payload, &mut content);

    let snippet = if raw.snippet.is_empty() {
        content.text.clone().unwrap_or_default()
    } else {
        decode_html_entities(&raw.snippet)
    };

    let labels = raw.label_ids.unwrap_or_default();

    Message::builder(id, workspace_id.clone(), thread_id)
        .integration_id(integration_id)
        .from(from)
        .to(to)
        .cc(cc)
        .bcc(bcc)
        .subject(subject)
        .snippet(snippet)
        .body_text(content.text)
        .body_html(content.html)
        .attachments(content.attachments)
        .labels(labels)
        .sent_at(sent_at)
        .received_at(received_at)
        .internal_date(internal_date)
        .build()
}

/// Extract a header value by name (case-insensitive)
fn extract_header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

/// Parse an RFC 2822 Date header
fn parse_rfc2822_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Collect bodies and attachments from the top-level payload
///
/// Single-part messages carry their data directly on the payload; multipart
/// messages nest it in an arbitrarily deep part tree.
fn collect_payload_content(payload: &MessagePayload, content: &mut ExtractedContent) {
    if let Some(body) = &payload.body
        && let Some(data) = &body.data
    {
        match payload.mime_type.as_deref() {
            Some(m) if m.starts_with("text/html") => {
                content.html = decode_base64_body(data);
            }
            _ => {
                // Unlabeled single-part bodies are treated as plain text
                content.text = decode_base64_body(data);
            }
        }
    }

    if let Some(parts) = &payload.parts {
        collect_parts(parts, content);
    }
}

/// Recursively walk the MIME part tree.
///
/// Keeps the first text/plain and first text/html leaf that is not an
/// attachment, and flattens every part carrying a filename plus an
/// attachment reference into the attachment list. Parts with neither
/// inline data nor an attachment ID contribute nothing.
fn collect_parts(parts: &[MessagePart], content: &mut ExtractedContent) {
    for part in parts {
        if let Some(attachment) = attachment_from_part(part) {
            content.attachments.push(attachment);
        } else if let Some(body) = &part.body
            && let Some(data) = &body.data
        {
            let mime = part.mime_type.as_deref().unwrap_or("");
            if mime.starts_with("text/plain") && content.text.is_none() {
                content.text = decode_base64_body(data);
            } else if mime.starts_with("text/html") && content.html.is_none() {
                content.html = decode_base64_body(data);
            }
        }

        if let Some(nested) = &part.parts {
            collect_parts(nested, content);
        }
    }
}

/// Treat a part as an attachment when it has a filename and an attachment
/// reference. Content stays remote; only metadata is mirrored.
fn attachment_from_part(part: &MessagePart) -> Option<Attachment> {
    let filename = part.filename.as_deref().filter(|f| !f.is_empty())?;
    let body = part.body.as_ref()?;
    let attachment_id = body.attachment_id.as_deref()?;

    Some(Attachment {
        provider_attachment_id: attachment_id.to_string(),
        filename: filename.to_string(),
        mime_type: part
            .mime_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        size: body.size.unwrap_or(0),
    })
}

/// Decode base64-encoded body data
///
/// The provider uses URL-safe base64 but padding can vary, so we try
/// multiple decoders.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    for decoder in decoders {
        if let Ok(decoded) = decoder.decode(data) {
            if let Ok(s) = String::from_utf8(decoded) {
                return Some(s);
            }
        }
    }

    None
}

/// Decode HTML entities in snippet text
fn decode_html_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::api::{Header, MessageBody};

    fn header(name: &str, value: &str) -> Header {
        Header {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn b64(s: &str) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(s)
    }

    fn text_part(mime: &str, body: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_string()),
            body: Some(MessageBody {
                size: Some(body.len() as u64),
                data: Some(b64(body)),
                attachment_id: None,
            }),
            ..Default::default()
        }
    }

    fn raw_with_payload(payload: MessagePayload) -> RawMessage {
        RawMessage {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
            snippet: "Hello &amp; welcome".to_string(),
            internal_date: "1700000000000".to_string(),
            payload: Some(payload),
        }
    }

    fn normalize(raw: RawMessage) -> Message {
        normalize_message(raw, &WorkspaceId::new("w1"), "i1")
    }

    #[test]
    fn test_simple_message() {
        let payload = MessagePayload {
            headers: Some(vec![
                header("From", "Alice <alice@example.com>"),
                header("To", "bob@example.com, Carol <carol@example.com>"),
                header("Subject", "Greetings"),
                header("Date", "Tue, 14 Nov 2023 10:00:00 +0000"),
            ]),
            mime_type: Some("text/plain".to_string()),
            body: Some(MessageBody {
                size: Some(5),
                data: Some(b64("Hello")),
                attachment_id: None,
            }),
            ..Default::default()
        };

        let msg = normalize(raw_with_payload(payload));
        assert_eq!(msg.from.email, "alice@example.com");
        assert_eq!(msg.from.name, Some("Alice".to_string()));
        assert_eq!(msg.to.len(), 2);
        assert_eq!(msg.subject, "Greetings");
        assert_eq!(msg.body_text, Some("Hello".to_string()));
        assert_eq!(msg.snippet, "Hello & welcome");
        assert!(!msg.flags.is_read); // UNREAD label present
        assert_eq!(msg.sent_at.timestamp(), 1699956000);
    }

    #[test]
    fn test_nested_multipart_picks_first_leaves() {
        let inner = MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            parts: Some(vec![
                text_part("text/plain", "plain body"),
                text_part("text/html", "<p>html body</p>"),
            ]),
            ..Default::default()
        };
        let payload = MessagePayload {
            mime_type: Some("multipart/mixed".to_string()),
            parts: Some(vec![inner, text_part("text/plain", "second plain")]),
            ..Default::default()
        };

        let msg = normalize(raw_with_payload(payload));
        assert_eq!(msg.body_text, Some("plain body".to_string()));
        assert_eq!(msg.body_html, Some("<p>html body</p>".to_string()));
    }

    #[test]
    fn test_attachment_metadata_collected() {
        let attachment = MessagePart {
            mime_type: Some("application/pdf".to_string()),
            filename: Some("report.pdf".to_string()),
            body: Some(MessageBody {
                size: Some(12345),
                data: None,
                attachment_id: Some("att-1".to_string()),
            }),
            ..Default::default()
        };
        let payload = MessagePayload {
            mime_type: Some("multipart/mixed".to_string()),
            parts: Some(vec![text_part("text/plain", "see attached"), attachment]),
            ..Default::default()
        };

        let msg = normalize(raw_with_payload(payload));
        assert_eq!(msg.attachments.len(), 1);
        let att = &msg.attachments[0];
        assert_eq!(att.provider_attachment_id, "att-1");
        assert_eq!(att.filename, "report.pdf");
        assert_eq!(att.mime_type, "application/pdf");
        assert_eq!(att.size, 12345);
        assert_eq!(msg.body_text, Some("see attached".to_string()));
    }

    #[test]
    fn test_malformed_message_still_produces_record() {
        // No payload, unparseable internal date: best effort, not an error
        let raw = RawMessage {
            id: "broken".to_string(),
            thread_id: "t-broken".to_string(),
            label_ids: None,
            snippet: String::new(),
            internal_date: "not-a-number".to_string(),
            payload: None,
        };

        let msg = normalize(raw);
        assert_eq!(msg.id.as_str(), "broken");
        assert_eq!(msg.from.email, "unknown@unknown.com");
        assert!(msg.body_text.is_none());
        assert!(msg.labels.is_empty());
        assert!(msg.flags.is_read);
    }

    #[test]
    fn test_bad_date_header_falls_back_to_internal_date() {
        let payload = MessagePayload {
            headers: Some(vec![header("Date", "yesterday-ish")]),
            ..Default::default()
        };
        let msg = normalize(raw_with_payload(payload));
        assert_eq!(msg.sent_at, msg.received_at);
    }

    #[test]
    fn test_decode_base64_body() {
        // "Hello, World!" in base64url
        let encoded = "SGVsbG8sIFdvcmxkIQ";
        let decoded = decode_base64_body(encoded);
        assert_eq!(decoded, Some("Hello, World!".to_string()));
    }

    #[test]
    fn test_extract_header_case_insensitive() {
        let payload = MessagePayload {
            headers: Some(vec![header("FROM", "test@example.com")]),
            ..Default::default()
        };
        assert_eq!(
            extract_header(&payload, "from"),
            Some("test@example.com".to_string())
        );
    }
}
