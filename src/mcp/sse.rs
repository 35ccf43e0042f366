//! `text/event-stream` bodies carrying JSON-RPC replies.

use serde_json::Value;

use crate::error::{McpError, Result};

/// Split an event-stream body into the data payloads of its events.
///
/// `data:` lines of one event are joined with `\n`; a blank line ends the
/// event. Comments and other fields (`event:`, `id:`, `retry:`) are ignored.
pub fn data_frames(body: &str) -> Vec<String> {
    let mut frames = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        if line.trim().is_empty() {
            flush(&mut current, &mut frames);
        } else if let Some(rest) = line.strip_prefix("data:") {
            current.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    flush(&mut current, &mut frames);
    frames
}

fn flush(current: &mut Vec<&str>, frames: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    let joined = current.join("\n");
    let joined = joined.trim();
    if !joined.is_empty() {
        frames.push(joined.to_string());
    }
    current.clear();
}

/// The reply carried by an event-stream body: the last frame that parses
/// as JSON. Earlier frames (progress notes, keep-alives) are skipped.
pub fn parse_event_stream(body: &str) -> Result<Value> {
    let frames = data_frames(body);
    if frames.is_empty() {
        return Err(McpError::Decode("empty event stream".to_string()));
    }
    frames
        .iter()
        .rev()
        .find_map(|frame| serde_json::from_str(frame).ok())
        .ok_or_else(|| McpError::Decode("no parsable JSON frame in event stream".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_parsable_frame_wins() {
        let body = concat!(
            ": keep-alive\n",
            "event: message\n",
            "data: {\"id\":1,\"result\":\"early\"}\n",
            "\n",
            "data: {\"id\":1,\n",
            "data:  \"result\":\"final\"}\n",
            "\n",
            "data: not json at all\n",
            "\n",
        );
        let value = parse_event_stream(body).unwrap();
        assert_eq!(value, json!({"id": 1, "result": "final"}));
    }

    #[test]
    fn test_unterminated_final_event_counts() {
        let value = parse_event_stream("data: {\"ok\":true}").unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_empty_and_garbage_streams_fail() {
        assert!(parse_event_stream("").is_err());
        assert!(parse_event_stream(": ping\n\n").is_err());
        assert!(parse_event_stream("data: nope\n\n").is_err());
    }

    #[test]
    fn test_crlf_lines() {
        let frames = data_frames("data: a\r\ndata: b\r\n\r\ndata: c\r\n");
        assert_eq!(frames, ["a\nb", "c"]);
    }
}
