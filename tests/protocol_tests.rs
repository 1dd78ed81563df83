// Wire format tests: what the browser client sends and expects to read.

use reflections_voice::protocol::parse_client_message;
use reflections_voice::{ClientMessage, Inbound, ServerEvent, VoiceError};
use serde_json::json;

#[test]
fn test_parse_control_messages() {
    assert_eq!(
        parse_client_message(r#"{"type":"hello","sample_rate":48000}"#).unwrap(),
        ClientMessage::Hello {
            sample_rate: Some(48000)
        }
    );
    assert_eq!(
        parse_client_message(r#"{"type":"hello"}"#).unwrap(),
        ClientMessage::Hello { sample_rate: None }
    );
    assert_eq!(parse_client_message(r#"{"type":"start"}"#).unwrap(), ClientMessage::start());
    assert_eq!(
        parse_client_message(r#"{"type":"start","auto_end":false}"#).unwrap(),
        ClientMessage::start_with(false)
    );
    assert_eq!(parse_client_message(r#"{"type":"end"}"#).unwrap(), ClientMessage::End);
    assert_eq!(parse_client_message(r#"{"type":"cancel"}"#).unwrap(), ClientMessage::Cancel);
}

#[test]
fn test_start_omits_unset_auto_end() {
    assert_eq!(ClientMessage::start().to_json().unwrap(), r#"{"type":"start"}"#);
    assert_eq!(
        ClientMessage::start_with(true).to_json().unwrap(),
        r#"{"type":"start","auto_end":true}"#
    );
}

#[test]
fn test_malformed_messages_are_protocol_errors() {
    let cases = [
        ("{nope", "invalid_json"),
        ("[1, 2]", "invalid_message"),
        (r#"{"type":"teleport"}"#, "invalid_message"),
        (r#"{"sample_rate":16000}"#, "invalid_message"),
    ];
    for (text, expected) in cases {
        let err = parse_client_message(text).unwrap_err();
        assert_eq!(err.code(), "protocol_error", "for {}", text);
        assert_eq!(err.message(), expected, "for {}", text);
        assert!(!err.is_fatal());
    }
}

#[test]
fn test_json_audio_frame_becomes_audio() {
    let frame = ClientMessage::audio_frame(&[1, 2, 3, 4]).to_json().unwrap();
    assert_eq!(Inbound::from_text(&frame), Inbound::Audio(vec![1, 2, 3, 4]));

    match Inbound::from_text(r#"{"type":"audio_frame","pcm16le_b64":"***"}"#) {
        Inbound::Invalid(VoiceError::Protocol { message, .. }) => {
            assert_eq!(message, "invalid_audio")
        }
        other => panic!("expected invalid audio, got {:?}", other),
    }
}

#[test]
fn test_server_events_serialize_with_type_tag() {
    let cases = [
        (ServerEvent::Ready, json!({"type": "ready"})),
        (
            ServerEvent::PartialTranscript {
                text: "listening… ~0.25s".into(),
                bytes_received: 8000,
            },
            json!({"type": "partial_transcript", "text": "listening… ~0.25s", "bytes_received": 8000}),
        ),
        (
            ServerEvent::AssistantDelta { delta: "Hi".into() },
            json!({"type": "assistant_delta", "delta": "Hi"}),
        ),
        (
            ServerEvent::tts_chunk(2, "wav", b"RIFF"),
            json!({"type": "tts_chunk", "seq": 2, "format": "wav", "audio": "UklGRg=="}),
        ),
        (ServerEvent::Done, json!({"type": "done"})),
        (ServerEvent::Cancelled, json!({"type": "cancelled"})),
        (
            ServerEvent::Error {
                code: "generation_error".into(),
                message: "model offline".into(),
                details: None,
            },
            json!({"type": "error", "code": "generation_error", "message": "model offline"}),
        ),
    ];

    for (event, expected) in cases {
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value, expected, "for {}", event.kind());
    }
}

#[test]
fn test_server_event_parses_back() {
    let text = r#"{"type":"final_transcript","text":"hi","bytes_received":3200,"duration_s":0.1}"#;
    let event: ServerEvent = serde_json::from_str(text).unwrap();
    assert_eq!(
        event,
        ServerEvent::FinalTranscript {
            text: "hi".into(),
            bytes_received: 3200,
            duration_s: 0.1
        }
    );
}
