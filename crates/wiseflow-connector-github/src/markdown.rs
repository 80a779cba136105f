//! Renders GitHub API payloads into the Markdown `DataItem.content` the
//! engine normalizes everything to (spec.md §4.7).

use serde_json::Value;

fn str_field<'a>(value: &'a Value, field: &str) -> &'a str {
    value.get(field).and_then(|v| v.as_str()).unwrap_or("")
}

/// Title + body + comments + review comments as Markdown sections.
pub fn render_issue_or_pr(payload: &Value, comments: &[Value], review_comments: &[Value]) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", str_field(payload, "title")));
    out.push_str(str_field(payload, "body"));
    out.push_str("\n\n");

    if !comments.is_empty() {
        out.push_str("## Comments\n\n");
        for comment in comments {
            let author = payload_user_login(comment);
            out.push_str(&format!("**{author}**:\n\n{}\n\n", str_field(comment, "body")));
        }
    }

    if !review_comments.is_empty() {
        out.push_str("## Review Comments\n\n");
        for comment in review_comments {
            let author = payload_user_login(comment);
            let path = str_field(comment, "path");
            out.push_str(&format!("**{author}** on `{path}`:\n\n{}\n\n", str_field(comment, "body")));
        }
    }

    out
}

fn payload_user_login(payload: &Value) -> String {
    payload
        .get("user")
        .and_then(|u| u.get("login"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Decodes a GitHub contents-API base64 file body into UTF-8 Markdown,
/// falling back to a lossless placeholder for binary content.
pub fn decode_file_content(payload: &Value) -> String {
    use base64::Engine;
    let encoded = str_field(payload, "content").replace('\n', "");
    if encoded.is_empty() {
        return String::new();
    }
    match base64::engine::general_purpose::STANDARD.decode(encoded) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).to_string(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_title_body_and_comments() {
        let payload = serde_json::json!({"title": "Bug", "body": "It crashes"});
        let comments = vec![serde_json::json!({"user": {"login": "alice"}, "body": "confirmed"})];
        let markdown = render_issue_or_pr(&payload, &comments, &[]);
        assert!(markdown.contains("# Bug"));
        assert!(markdown.contains("It crashes"));
        assert!(markdown.contains("**alice**"));
        assert!(markdown.contains("confirmed"));
    }

    #[test]
    fn decodes_base64_file_content() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode("fn main() {}");
        let payload = serde_json::json!({"content": encoded});
        assert_eq!(decode_file_content(&payload), "fn main() {}");
    }
}
