//! STOMP frame codec.
//!
//! The vendor tunnels STOMP over a WebSocket, so a frame always arrives as
//! one complete text message:
//!
//! ```text
//! COMMAND\n
//! header1:value1\n
//! header2:value2\n
//! \n
//! BODY\x00
//! ```
//!
//! The codec never reassembles frames split across transport reads; the
//! WebSocket layer already delivers whole messages.

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    /// Build a body-less frame.
    pub fn new(command: &str, headers: Vec<(String, String)>) -> Self {
        Self {
            command: command.to_string(),
            headers,
            body: String::new(),
        }
    }

    /// Look up a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Encode a frame as `command\n` + `k:v\n` per header + `\n` + body + NUL.
pub fn encode(frame: &Frame) -> String {
    let mut out = String::with_capacity(
        frame.command.len() + frame.body.len() + frame.headers.len() * 32 + 4,
    );
    out.push_str(&frame.command);
    out.push('\n');
    for (name, value) in &frame.headers {
        out.push_str(name);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&frame.body);
    out.push('\0');
    out
}

/// Decode one complete frame.
///
/// Splits on the first `"\n\n"`: the command is the text up to the first
/// `"\n"`, the body runs from after the separator to the first NUL (or end
/// of buffer). Returns `None` when no header/body separator exists -- a
/// partial frame is not an error, just not a frame.
pub fn decode(raw: &str) -> Option<Frame> {
    let header_end = raw.find("\n\n")?;
    let (head, rest) = raw.split_at(header_end);
    let rest = &rest[2..];

    let mut lines = head.lines();
    let command = lines.next()?.trim().to_string();
    if command.is_empty() {
        return None;
    }

    let headers = lines
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.to_string(), value.trim_end_matches('\r').to_string()))
        })
        .collect();

    let body = match rest.find('\0') {
        Some(nul) => &rest[..nul],
        None => rest,
    };

    Some(Frame {
        command,
        headers,
        body: body.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_wire_format() {
        let frame = Frame {
            command: "CONNECT".into(),
            headers: vec![
                ("host".into(), "lion.lamarzocco.io".into()),
                ("heart-beat".into(), "0,0".into()),
            ],
            body: String::new(),
        };
        assert_eq!(
            encode(&frame),
            "CONNECT\nhost:lion.lamarzocco.io\nheart-beat:0,0\n\n\0"
        );
    }

    #[test]
    fn roundtrip_preserves_command_headers_body() {
        let frame = Frame {
            command: "MESSAGE".into(),
            headers: vec![
                ("destination".into(), "/ws/sn/SN123/dashboard".into()),
                ("content-type".into(), "application/json".into()),
            ],
            body: r#"{"widgets":[]}"#.into(),
        };
        assert_eq!(decode(&encode(&frame)).unwrap(), frame);
    }

    #[test]
    fn roundtrip_with_empty_headers_and_body() {
        let frame = Frame::new("DISCONNECT", vec![]);
        assert_eq!(decode(&encode(&frame)).unwrap(), frame);
    }

    #[test]
    fn decode_without_separator_is_not_a_frame() {
        assert!(decode("CONNECTED\nversion:1.2\n").is_none());
        assert!(decode("").is_none());
        assert!(decode("garbage with no newlines").is_none());
    }

    #[test]
    fn decode_body_stops_at_nul() {
        let frame = decode("MESSAGE\n\n{\"a\":1}\0trailing-junk").unwrap();
        assert_eq!(frame.body, r#"{"a":1}"#);
    }

    #[test]
    fn decode_body_without_nul_runs_to_end() {
        let frame = decode("MESSAGE\ndestination:/x\n\n{\"a\":1}").unwrap();
        assert_eq!(frame.body, r#"{"a":1}"#);
        assert_eq!(frame.header("destination"), Some("/x"));
    }

    #[test]
    fn decode_tolerates_crlf_in_headers() {
        let frame = decode("CONNECTED\r\nversion:1.2\r\n\nbody\0");
        // \r\n\n still contains the \n\n separator after the \r is consumed
        // by the header line.
        let frame = frame.unwrap();
        assert_eq!(frame.command, "CONNECTED");
        assert_eq!(frame.header("version"), Some("1.2"));
    }

    #[test]
    fn header_values_may_contain_colons() {
        let frame = decode("CONNECT\nAuthorization:Bearer abc:def\n\n\0").unwrap();
        assert_eq!(frame.header("Authorization"), Some("Bearer abc:def"));
    }
}
