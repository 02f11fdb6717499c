use corvus_protocol::{IpcRequest, IpcResponse, StreamDone, StreamFrame};

#[test]
fn ipc_request_round_trip() {
    let json = r#"{"id":"abc-123","op":"task.claim","params":{"text":"hello"}}"#;
    let req: IpcRequest = serde_json::from_str(json).unwrap();
    assert_eq!(req.id, "abc-123");
    assert_eq!(req.op, "task.claim");
    assert!(req.params.is_some());
}

#[test]
fn ipc_request_without_params_deserializes() {
    let json = r#"{"id":"abc-124","op":"tool.bash"}"#;
    let req: IpcRequest = serde_json::from_str(json).unwrap();
    assert!(req.params.is_none());
}

#[test]
fn ipc_response_ok_omits_error_field() {
    let res = IpcResponse::ok("req-1", serde_json::json!({"pong": true}));
    let json = serde_json::to_string(&res).unwrap();

    assert!(json.contains(r#""ok":true"#));
    assert!(json.contains(r#""pong":true"#));
    assert!(!json.contains(r#""error""#));
}

#[test]
fn ipc_response_err_omits_result_field() {
    let res = IpcResponse::err("req-2", "bad token");
    let json = serde_json::to_string(&res).unwrap();

    assert!(json.contains(r#""ok":false"#));
    assert!(json.contains("bad token"));
    assert!(!json.contains(r#""result""#));
}

#[test]
fn stream_frame_round_trip() {
    let frame = StreamFrame { index: 42, text: "partial reply".into(), ts: 1_700_000_000 };
    let json = serde_json::to_string(&frame).unwrap();
    let back: StreamFrame = serde_json::from_str(&json).unwrap();
    assert_eq!(back.index, 42);
    assert_eq!(back.text, "partial reply");
}

#[test]
fn stream_done_round_trip() {
    let done = StreamDone { total_chunks: 7, completed_at: 1_700_000_123 };
    let json = serde_json::to_string(&done).unwrap();
    let back: StreamDone = serde_json::from_str(&json).unwrap();
    assert_eq!(back.total_chunks, 7);
}
