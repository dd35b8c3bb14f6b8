use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tutor_types::{AudioFrame, ChatContext, ChatRole};
use tutor_voice::{
    LanguageModel, LlmConfig, OpenAiLlm, OpenAiStt, OpenAiTts, SpeechToText, SttConfig,
    TextToSpeech, TtsConfig, VoiceError, TTS_SAMPLE_RATE,
};

#[derive(Default)]
struct Captured {
    authorization: Vec<String>,
    stt_body: Vec<u8>,
    llm_request: Option<Value>,
    tts_request: Option<Value>,
}

type Shared = Arc<Mutex<Captured>>;

fn bearer(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn transcriptions(State(state): State<Shared>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let mut captured = state.lock().unwrap();
    captured.authorization.push(bearer(&headers));
    captured.stt_body = body.to_vec();
    Json(json!({ "text": "  Ich heiße Anna.  " }))
}

async fn completions(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Json<Value> {
    let mut captured = state.lock().unwrap();
    captured.authorization.push(bearer(&headers));
    captured.llm_request = Some(request);
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": "Schön, dich kennenzulernen, Anna!" } }],
        "usage": { "prompt_tokens": 120, "completion_tokens": 9, "total_tokens": 129 }
    }))
}

async fn speech(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Vec<u8> {
    let mut captured = state.lock().unwrap();
    captured.authorization.push(bearer(&headers));
    captured.tts_request = Some(request);
    [1i16, 2, 3, -4].iter().flat_map(|s| s.to_le_bytes()).collect()
}

async fn speech_as_wav() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 22_050,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
    for sample in [5i16, -5, 7] {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}

async fn failing() -> (StatusCode, &'static str) {
    (StatusCode::TOO_MANY_REQUESTS, "rate limited")
}

async fn spawn_server(state: Shared) -> String {
    let app = Router::new()
        .route("/v1/audio/transcriptions", post(transcriptions))
        .route("/v1/chat/completions", post(completions))
        .route("/v1/audio/speech", post(speech))
        .route("/wav/audio/speech", post(speech_as_wav))
        .route("/broken/chat/completions", post(failing))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/v1", addr)
}

#[tokio::test]
async fn stt_uploads_wav_and_trims_transcript() {
    let state = Shared::default();
    let base_url = spawn_server(state.clone()).await;
    let stt = OpenAiStt::new(SttConfig {
        base_url,
        api_key: "stt-key".to_string(),
        ..SttConfig::default()
    })
    .unwrap();

    let audio = AudioFrame::new(vec![100; 1600], 16_000, 1);
    let event = stt.transcribe(&audio).await.unwrap();
    assert_eq!(event.text, "Ich heiße Anna.");
    assert_eq!(event.language.as_deref(), Some("de"));

    let captured = state.lock().unwrap();
    assert_eq!(captured.authorization, vec!["Bearer stt-key".to_string()]);
    let body = String::from_utf8_lossy(&captured.stt_body);
    assert!(body.contains("filename=\"audio.wav\""));
    assert!(body.contains("whisper-1"));

    let riff = captured
        .stt_body
        .windows(4)
        .position(|w| w == b"RIFF")
        .expect("multipart body carries a WAV file");
    let reader = hound::WavReader::new(Cursor::new(&captured.stt_body[riff..])).unwrap();
    assert_eq!(reader.spec().sample_rate, 16_000);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.len(), 1600);
}

#[tokio::test]
async fn llm_sends_history_and_reports_usage() {
    let state = Shared::default();
    let base_url = spawn_server(state.clone()).await;
    let llm = OpenAiLlm::new(LlmConfig {
        base_url,
        api_key: "llm-key".to_string(),
        temperature: Some(0.4),
        ..LlmConfig::default()
    })
    .unwrap();

    let ctx = ChatContext::new()
        .append(ChatRole::System, "Du bist Maria.")
        .append(ChatRole::User, "Ich heiße Anna.");
    let completion = llm.chat(&ctx).await.unwrap();
    assert_eq!(completion.text, "Schön, dich kennenzulernen, Anna!");
    assert_eq!(completion.usage.prompt_tokens, 120);
    assert_eq!(completion.usage.completion_tokens, 9);
    assert_eq!(completion.usage.total_tokens, 129);

    let captured = state.lock().unwrap();
    let request = captured.llm_request.as_ref().unwrap();
    assert_eq!(request["model"], "llama3.1-8b");
    assert_eq!(request["stream"], false);
    assert_eq!(request["messages"][0]["role"], "system");
    assert_eq!(request["messages"][1]["content"], "Ich heiße Anna.");
    assert!((request["temperature"].as_f64().unwrap() - 0.4).abs() < 1e-6);
}

#[tokio::test]
async fn llm_error_status_is_surfaced() {
    let state = Shared::default();
    let base_url = spawn_server(state).await.replace("/v1", "/broken");
    let llm = OpenAiLlm::new(LlmConfig {
        base_url,
        api_key: "llm-key".to_string(),
        ..LlmConfig::default()
    })
    .unwrap();

    let ctx = ChatContext::new().append(ChatRole::User, "Hallo");
    match llm.chat(&ctx).await {
        Err(VoiceError::Llm(msg)) => {
            assert!(msg.contains("429"), "message was: {}", msg);
            assert!(msg.contains("rate limited"));
        }
        other => panic!("expected LLM error, got {:?}", other),
    }
}

#[tokio::test]
async fn tts_requests_pcm_and_decodes_samples() {
    let state = Shared::default();
    let base_url = spawn_server(state.clone()).await;
    let tts = OpenAiTts::new(TtsConfig {
        base_url,
        api_key: "tts-key".to_string(),
        ..TtsConfig::default()
    })
    .unwrap();

    let frame = tts.synthesize("Hallo! Willkommen!").await.unwrap();
    assert_eq!(frame.data, vec![1, 2, 3, -4]);
    assert_eq!(frame.sample_rate, TTS_SAMPLE_RATE);
    assert_eq!(frame.num_channels, 1);

    let captured = state.lock().unwrap();
    let request = captured.tts_request.as_ref().unwrap();
    assert_eq!(request["input"], "Hallo! Willkommen!");
    assert_eq!(request["voice"], "de-DE-SeraphinaMultilingualNeural");
    assert_eq!(request["response_format"], "pcm");
    assert_eq!(captured.authorization, vec!["Bearer tts-key".to_string()]);
}

#[tokio::test]
async fn tts_wav_response_keeps_its_sample_rate() {
    let state = Shared::default();
    let base_url = spawn_server(state).await;
    let tts = OpenAiTts::new(TtsConfig {
        base_url: base_url.replace("/v1", "/wav"),
        api_key: "tts-key".to_string(),
        ..TtsConfig::default()
    })
    .unwrap();

    let frame = tts.synthesize("Hallo!").await.unwrap();
    assert_eq!(frame.data, vec![5, -5, 7]);
    assert_eq!(frame.sample_rate, 22_050);
    assert_eq!(frame.num_channels, 1);
}
