//! Request classification and response bodies.

use serde::Serialize;

use super::animation::AnimationMode;

/// What to send back for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Bare `"{ip} {country}"`, for netcat-style clients that send nothing
    RawText,
    /// HTTP response with a JSON body
    Json,
    /// HTTP response with a plain text body
    HttpText,
    /// Endless in-place animation
    Animation(AnimationMode),
}

impl Reply {
    /// Decide the reply from the first bytes the client sent.
    pub fn classify(request: &[u8]) -> Self {
        if request.len() <= 1 {
            return Reply::RawText;
        }

        if let Some(mode) = AnimationMode::from_request(request) {
            return Reply::Animation(mode);
        }

        if String::from_utf8_lossy(request).contains(" /json") {
            Reply::Json
        } else {
            Reply::HttpText
        }
    }
}

#[derive(Serialize)]
struct JsonBody<'a> {
    ip: &'a str,
    country: &'a str,
}

/// `"{ip} {country}"`
pub fn text_body(ip: &str, country: &str) -> String {
    format!("{} {}", ip, country)
}

/// JSON body `{"ip": ..., "country": ...}`.
pub fn json_body(ip: &str, country: &str) -> serde_json::Result<String> {
    serde_json::to_string(&JsonBody { ip, country })
}

/// Wrap `body` in a `200 OK` HTTP response.
pub fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nServer: Onion\r\nContent-Type: {}; charset=utf-8\r\n\r\n{}",
        body.len(),
        content_type,
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(Reply::classify(b""), Reply::RawText);
        assert_eq!(Reply::classify(b"\n"), Reply::RawText);
        assert_eq!(
            Reply::classify(b"GET /json HTTP/1.1\r\nHost: x\r\n\r\n"),
            Reply::Json
        );
        assert_eq!(
            Reply::classify(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"),
            Reply::HttpText
        );
        assert_eq!(
            Reply::classify(b"1\n"),
            Reply::Animation(AnimationMode::Banner)
        );
        assert_eq!(
            Reply::classify(b"2\n"),
            Reply::Animation(AnimationMode::Flight)
        );
        assert_eq!(Reply::classify(b"hello"), Reply::HttpText);
    }

    #[test]
    fn test_json_body() {
        let body = json_body("8.8.8.8", "us").unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["ip"], "8.8.8.8");
        assert_eq!(value["country"], "us");

        let empty = json_body("127.0.0.1", "").unwrap();
        assert_eq!(empty, r#"{"ip":"127.0.0.1","country":""}"#);
    }

    #[test]
    fn test_http_response() {
        let response = http_response("text/plain", "8.8.8.8 us");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Length: 10\r\n"));
        assert!(response.contains("Server: Onion\r\n"));
        assert!(response.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(response.ends_with("\r\n\r\n8.8.8.8 us"));
    }

    #[test]
    fn test_text_body() {
        assert_eq!(text_body("1.1.1.1", "au"), "1.1.1.1 au");
        assert_eq!(text_body("10.0.0.1", ""), "10.0.0.1 ");
    }
}
