//! Envelope vectors from `tests/vectors/*.json`, parsed into typed cases.

use std::fs;
use std::path::PathBuf;

use base64::Engine;
use serde::Deserialize;

use communique_core::MessageKind;

/// One vector: raw frame bytes plus what decoding them must produce.
#[derive(Debug)]
pub struct EnvelopeCase {
    pub file: String,
    pub description: String,
    pub frame: Vec<u8>,
    pub expect: Expectation,
}

#[derive(Debug)]
pub enum Expectation {
    Envelope {
        kind: MessageKind,
        correlation_id: u32,
        body: Vec<u8>,
    },
    Error {
        code: String,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCase {
    description: String,
    frame: RawFrame,
    #[serde(default)]
    expect: Option<RawEnvelope>,
    #[serde(default)]
    expect_error: Option<RawError>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFrame {
    encoding: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvelope {
    kind: String,
    correlation_id: u32,
    body_hex: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawError {
    code: String,
}

fn frame_bytes(frame: &RawFrame) -> Vec<u8> {
    match frame.encoding.as_str() {
        "base64" => base64::engine::general_purpose::STANDARD
            .decode(&frame.data)
            .expect("invalid base64 in vector"),
        "hex" => hex::decode(&frame.data).expect("invalid hex in vector"),
        "utf8" => frame.data.as_bytes().to_vec(),
        other => panic!("unsupported encoding: {other}"),
    }
}

fn kind(name: &str) -> MessageKind {
    match name {
        "request" => MessageKind::Request,
        "response" => MessageKind::Response,
        "info" => MessageKind::Info,
        "request_error" => MessageKind::RequestError,
        other => panic!("unknown kind in vector: {other}"),
    }
}

fn parse(file: String, json: &str) -> EnvelopeCase {
    let raw: RawCase = serde_json::from_str(json).unwrap_or_else(|e| panic!("{file}: {e}"));
    let expect = match (raw.expect, raw.expect_error) {
        (Some(env), None) => Expectation::Envelope {
            kind: kind(&env.kind),
            correlation_id: env.correlation_id,
            body: hex::decode(&env.body_hex).expect("invalid body_hex in vector"),
        },
        (None, Some(err)) => Expectation::Error { code: err.code },
        _ => panic!("{file}: exactly one of expect / expect_error is required"),
    };
    EnvelopeCase {
        frame: frame_bytes(&raw.frame),
        description: raw.description,
        file,
        expect,
    }
}

/// Every vector file, sorted by name.
pub fn load_envelope_cases() -> Vec<EnvelopeCase> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/vectors");
    let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|x| x == "json"))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|p| {
            let file = p.file_name().unwrap().to_string_lossy().into_owned();
            let json = fs::read_to_string(&p).unwrap();
            parse(file, &json)
        })
        .collect()
}
