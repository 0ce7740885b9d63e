use serde::{ Serialize, Deserialize };

/// Prefix of every frame line.
pub const FRAME_PREFIX: &str = "data: ";
/// Blank line that terminates a frame.
pub const FRAME_DELIMITER: &str = "\n\n";
/// Literal payload marking the end of the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// JSON payload of a content frame. `error` is set on the frame that reports
/// an upstream failure after streaming began.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramePayload {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFrame {
    Content(String),
    Error(String),
    Done,
}

impl StreamFrame {
    pub fn content(text: impl Into<String>) -> Self {
        StreamFrame::Content(text.into())
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StreamFrame::Done)
    }

    /// Wire form: `data: <json>\n\n`, or `data: [DONE]\n\n` for the sentinel.
    pub fn encode(&self) -> String {
        let payload = match self {
            StreamFrame::Done => {
                return format!("{}{}{}", FRAME_PREFIX, DONE_SENTINEL, FRAME_DELIMITER);
            }
            StreamFrame::Content(text) =>
                FramePayload {
                    content: text.clone(),
                    error: None,
                },
            StreamFrame::Error(message) =>
                FramePayload {
                    content: String::new(),
                    error: Some(message.clone()),
                },
        };
        // A struct of two strings always serializes.
        let json = serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());
        format!("{}{}{}", FRAME_PREFIX, json, FRAME_DELIMITER)
    }

    /// Parses the data portion of one frame (prefix already stripped).
    pub fn decode_data(data: &str) -> Result<Self, serde_json::Error> {
        if data.trim() == DONE_SENTINEL {
            return Ok(StreamFrame::Done);
        }
        let payload: FramePayload = serde_json::from_str(data)?;
        Ok(match payload.error {
            Some(message) => StreamFrame::Error(message),
            None => StreamFrame::Content(payload.content),
        })
    }
}
