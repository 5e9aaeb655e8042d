use serde::{ Serialize, Deserialize };

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum InboundFrame {
    /// One fragment of execution output. `mime` is set for non-code
    /// payloads such as `image/png`.
    #[serde(rename = "stream")] Stream {
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime: Option<String>,
    },
    #[serde(rename = "final")]
    Final,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "action")]
pub enum OutboundFrame {
    #[serde(rename = "run_code")] RunCode {
        code: String,
        model: String,
        credential: String,
    },
    #[serde(rename = "reset")]
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_stream_and_final_frames() {
        let stream: InboundFrame = serde_json
            ::from_str(r#"{"type":"stream","output":"print("}"#)
            .unwrap();
        assert_eq!(stream, InboundFrame::Stream { output: "print(".to_string(), mime: None });

        let fin: InboundFrame = serde_json::from_str(r#"{"type":"final"}"#).unwrap();
        assert_eq!(fin, InboundFrame::Final);
    }

    #[test]
    fn outbound_frames_match_the_server_contract() {
        let run = OutboundFrame::RunCode {
            code: "foo".to_string(),
            model: "gpt-4".to_string(),
            credential: "sk-test".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&run).unwrap(),
            json!({ "action": "run_code", "code": "foo", "model": "gpt-4", "credential": "sk-test" })
        );
        assert_eq!(serde_json::to_value(&OutboundFrame::Reset).unwrap(), json!({ "action": "reset" }));
    }
}
