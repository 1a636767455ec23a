#[cfg(test)]
mod tests {
    use crate::dto::*;
    use crate::error::{Error, ErrorResponse};

    fn item(summary: &str) -> DataItem {
        DataItem {
            client_id: "C1".to_string(),
            summary: summary.to_string(),
            language: Some("en".to_string()),
            category: None,
            url: Some("https://example.com/a".to_string()),
            max_length: None,
        }
    }

    #[test]
    fn test_fragment_wire_text() {
        assert_eq!(Fragment::Text("Hel".into()).wire_text(), "Hel");
        assert_eq!(Fragment::Error("boom".into()).wire_text(), "ERROR: boom");
        assert_eq!(Fragment::Stop.wire_text(), "[DONE]");
        assert!(Fragment::Stop.is_stop());
        assert!(!Fragment::Text(String::new()).is_stop());
    }

    #[test]
    fn test_data_item_into_request() {
        let request = item("a short summary")
            .into_request(512, 4096)
            .expect("valid item");

        assert_eq!(request.client_id, ClientId::from("C1"));
        assert_eq!(request.max_length, 512);
        assert_eq!(request.prompt, "summary: a short summary URL: https://example.com/a");
    }

    #[test]
    fn test_data_item_without_url() {
        let mut data = item("text");
        data.url = None;
        assert_eq!(data.prompt_text(), "summary: text");
    }

    #[test]
    fn test_data_item_validation() {
        // Empty summary
        assert!(matches!(
            item("   ").into_request(512, 4096),
            Err(Error::ValidationFailed(_))
        ));

        // Empty client id
        let mut data = item("hi");
        data.client_id = String::new();
        assert!(matches!(data.into_request(512, 4096), Err(Error::BadRequest(_))));

        // Out of range max_length
        let mut data = item("hi");
        data.max_length = Some(0);
        assert!(matches!(data.into_request(512, 4096), Err(Error::BadRequest(_))));

        let mut data = item("hi");
        data.max_length = Some(5000);
        assert!(matches!(data.into_request(512, 4096), Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_data_item_deserialization() {
        let json = serde_json::json!({
            "client_id": "C1",
            "prompt": "hi",
            "max_length": 50
        });

        let data: DataItem = serde_json::from_value(json).expect("Failed to deserialize item");
        assert_eq!(data.summary, "hi");
        assert_eq!(data.max_length, Some(50));
        assert!(data.url.is_none());
    }

    #[test]
    fn test_control_message_generate() {
        let action = ControlMessage::parse(r#"{"action":"generate","prompt":"hi","max_length":50}"#)
            .expect("valid control message");
        assert_eq!(
            action,
            ControlAction::Generate {
                prompt: "hi".to_string(),
                max_length: Some(50),
            }
        );
    }

    #[test]
    fn test_control_message_errors() {
        assert!(matches!(
            ControlMessage::parse(r#"{"action":"generate"}"#),
            Err(Error::ValidationFailed(_))
        ));
        assert!(matches!(
            ControlMessage::parse(r#"{"action":"dance","prompt":"hi"}"#),
            Err(Error::UnknownAction(a)) if a == "dance"
        ));
        assert!(matches!(ControlMessage::parse("not json"), Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_dispatch_ack_serialization() {
        let json = serde_json::to_value(DispatchAck::skipped(&ClientId::from("C2")))
            .expect("Failed to serialize ack");
        assert_eq!(json["status"], "skipped");
        assert!(json.get("stream_id").is_none());

        let json = serde_json::to_value(DispatchAck::accepted("abc".into()))
            .expect("Failed to serialize ack");
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["stream_id"], "abc");
    }

    #[test]
    fn test_client_id_serde() {
        let id: ClientId = serde_json::from_str("\"C9\"").expect("Failed to deserialize id");
        assert_eq!(id.as_str(), "C9");
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "\"C9\"");
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(Error::BadRequest("test".into()).status_code(), 400);
        assert_eq!(Error::UnknownAction("x".into()).status_code(), 400);
        assert_eq!(Error::PromptRejected("x".into()).status_code(), 422);
        assert_eq!(Error::BackendUnavailable("test".into()).status_code(), 503);
        assert_eq!(Error::Transport("test".into()).status_code(), 502);
        assert_eq!(Error::Internal("test".into()).status_code(), 500);
    }

    #[test]
    fn test_error_retryable() {
        assert!(Error::ServiceUnavailable("test".into()).is_retryable());
        assert!(Error::BackendUnavailable("test".into()).is_retryable());
        assert!(!Error::BadRequest("test".into()).is_retryable());
        assert!(!Error::ChannelClosed.is_retryable());
    }

    #[test]
    fn test_error_response_body() {
        let response = ErrorResponse::from(&Error::ValidationFailed("prompt is required".into()));
        let json = serde_json::to_value(&response).expect("serialize");
        assert_eq!(json["error"]["type"], "validation_failed");
        assert_eq!(json["error"]["code"], 400);
    }
}
