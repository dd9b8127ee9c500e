// Serialization tests for the collaborator request/reply messages

use loqa_voice::nats::messages::{
    DescribeImageReply, DescribeImageRequest, ReasonRequest, ServiceReply, SynthesizeReply,
    SynthesizeRequest, TranscribeReply, TranscribeRequest,
};
use loqa_voice::pipeline::{AssistantTurn, ToolPayload, Turn};

#[test]
fn test_transcribe_request_serialization() {
    let msg = TranscribeRequest {
        session_id: "session-1".to_string(),
        audio: "UklGRg==".to_string(),
    };

    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains("\"session_id\":\"session-1\""));
    assert!(json.contains("\"audio\":\"UklGRg==\""));
}

#[test]
fn test_transcribe_reply_and_error_envelope() {
    let ok: ServiceReply<TranscribeReply> = serde_json::from_str(r#"{"text":"hello"}"#).unwrap();
    assert_eq!(ok.into_result().unwrap().text, "hello");

    let err: ServiceReply<TranscribeReply> =
        serde_json::from_str(r#"{"error":"model not loaded"}"#).unwrap();
    assert_eq!(err.into_result().unwrap_err(), "model not loaded");
}

#[test]
fn test_reason_request_carries_history() {
    let msg = ReasonRequest {
        session_id: "session-1".to_string(),
        history: vec![Turn::human("hi"), Turn::assistant("hello")],
        request: Turn::human("what should I wear?"),
    };

    let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["history"].as_array().unwrap().len(), 2);
    assert_eq!(json["history"][0]["role"], "human");
    assert_eq!(json["history"][1]["role"], "assistant");
    assert_eq!(json["request"]["content"], "what should I wear?");
}

#[test]
fn test_reason_reply_variants() {
    let reply: ServiceReply<AssistantTurn> =
        serde_json::from_str(r#"{"type":"reply","text":"Wear the blue one"}"#).unwrap();
    assert_eq!(
        reply.into_result().unwrap(),
        AssistantTurn::Reply {
            text: "Wear the blue one".to_string()
        }
    );

    let tool: ServiceReply<AssistantTurn> = serde_json::from_str(
        r#"{"type":"tool_result","tool":"outfits","payload":{"media":["https://x/1.png"]}}"#,
    )
    .unwrap();
    assert_eq!(
        tool.into_result().unwrap(),
        AssistantTurn::ToolResult {
            tool: "outfits".to_string(),
            payload: ToolPayload::Media(vec!["https://x/1.png".to_string()]),
        }
    );

    let err: ServiceReply<AssistantTurn> = serde_json::from_str(r#"{"error":"timeout"}"#).unwrap();
    assert!(err.into_result().is_err());
}

#[test]
fn test_synthesize_request_omits_missing_preset() {
    let msg = SynthesizeRequest {
        session_id: "session-1".to_string(),
        text: "Hello".to_string(),
        voice_preset: None,
    };
    let json = serde_json::to_string(&msg).unwrap();
    assert!(!json.contains("voice_preset"));

    let msg = SynthesizeRequest {
        voice_preset: Some("calm".to_string()),
        ..msg
    };
    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains("\"voice_preset\":\"calm\""));
}

#[test]
fn test_synthesize_reply_defaults_to_wav() {
    let reply: ServiceReply<SynthesizeReply> = serde_json::from_str(r#"{"audio":"AAAA"}"#).unwrap();
    let reply = reply.into_result().unwrap();
    assert_eq!(reply.audio, "AAAA");
    assert_eq!(reply.format, "wav");
}

#[test]
fn test_describe_image_round_trip() {
    let msg = DescribeImageRequest {
        session_id: "session-1".to_string(),
        filename: "shirt.png".to_string(),
        mime_type: "image/png".to_string(),
        image_url: "data:image/png;base64,YWJj".to_string(),
    };
    let json = serde_json::to_string(&msg).unwrap();
    let back: DescribeImageRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(back.image_url, "data:image/png;base64,YWJj");

    let reply: ServiceReply<DescribeImageReply> =
        serde_json::from_str(r#"{"record_id":"rec-42"}"#).unwrap();
    assert_eq!(reply.into_result().unwrap().record_id, "rec-42");
}
