// ============================================================================
// Generation request adapter — inpaint service client
// ============================================================================
//
// Packages the rasterized board plus a prompt into a single POST to the
// inpaint endpoint. One attempt, no retry: failures surface the server's own
// body and the user re-triggers manually. Concurrent invocation is rejected
// by the adapter itself (an atomic flag), not just by a disabled button.

use std::sync::atomic::{AtomicBool, Ordering};

use base64::{Engine as _, engine::general_purpose};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::board::BoardElement;
use crate::render::png_to_base64;

/// Error type for generation calls.
#[derive(Debug)]
pub enum GenerateError {
    /// A prior request is still in flight.
    Busy,
    /// Nothing on the board — rejected before any render or network call.
    EmptyBoard,
    /// Transport-level failure (connect, timeout, ...).
    Network(String),
    /// The service answered with a non-2xx status; `body` is whatever it sent.
    Service { status: u16, body: String },
    /// 2xx but the payload was not the expected `{ image }` document.
    BadResponse(String),
}

impl std::fmt::Display for GenerateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerateError::Busy => write!(f, "A generation request is already running"),
            GenerateError::EmptyBoard => {
                write!(f, "Add at least one image to the canvas before generating")
            }
            GenerateError::Network(e) => write!(f, "Network error: {}", e),
            GenerateError::Service { status, body } => {
                write!(f, "Inpaint service error (HTTP {}): {}", status, body)
            }
            GenerateError::BadResponse(e) => write!(f, "Unexpected service response: {}", e),
        }
    }
}

/// Wire request for `POST /api/inpaint`. `base64_image` is the rasterized
/// board PNG, base64, without any data-URI prefix.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InpaintRequest {
    pub base64_image: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub internal_model: bool,
}

#[derive(Deserialize)]
struct InpaintResponse {
    image: String,
}

/// Pre-flight check: generation over an empty board is rejected before the
/// rasterizer or the network is touched.
pub fn validate_board(elements: &[BoardElement]) -> Result<(), GenerateError> {
    if elements.is_empty() {
        Err(GenerateError::EmptyBoard)
    } else {
        Ok(())
    }
}

/// Blocking inpaint client. Lives behind an `Arc` and is called from a rayon
/// worker thread; the UI polls the result over a channel.
pub struct InpaintClient {
    endpoint: String,
    http: reqwest::blocking::Client,
    in_flight: AtomicBool,
}

impl InpaintClient {
    /// `endpoint` is the service base URL; the `/api/inpaint` path is fixed.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::blocking::Client::new(),
            in_flight: AtomicBool::new(false),
        }
    }

    /// True while a request is running — the UI uses this to disable the
    /// trigger, but the real guard is inside [`generate`](Self::generate).
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Submit the rasterized board and wait for the generated image.
    ///
    /// Exactly one request at a time: a second call while one is in flight
    /// fails fast with [`GenerateError::Busy`]. There is no cancellation —
    /// a request runs to completion or failure.
    pub fn generate(
        &self,
        board_png: &[u8],
        prompt: &str,
        negative_prompt: &str,
        internal_model: bool,
    ) -> Result<RgbaImage, GenerateError> {
        let _guard = self.begin_flight()?;

        let request = InpaintRequest {
            base64_image: png_to_base64(board_png),
            prompt: prompt.to_string(),
            negative_prompt: negative_prompt.to_string(),
            internal_model,
        };

        let url = format!("{}/api/inpaint", self.endpoint.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .map_err(|e| GenerateError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| GenerateError::Network(e.to_string()))?;

        if !status.is_success() {
            // Hard failure; surface whatever the server said.
            return Err(GenerateError::Service {
                status: status.as_u16(),
                body,
            });
        }
        decode_response(&body)
    }

    /// Atomically claim the in-flight slot. The returned guard releases it on
    /// drop, error paths included.
    fn begin_flight(&self) -> Result<FlightGuard<'_>, GenerateError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GenerateError::Busy);
        }
        Ok(FlightGuard(&self.in_flight))
    }
}

struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Parse a successful response body: `{ "image": "<base64>" }` → pixels.
fn decode_response(body: &str) -> Result<RgbaImage, GenerateError> {
    let parsed: InpaintResponse =
        serde_json::from_str(body).map_err(|e| GenerateError::BadResponse(e.to_string()))?;
    let bytes = general_purpose::STANDARD
        .decode(parsed.image.trim())
        .map_err(|e| GenerateError::BadResponse(format!("image field is not base64: {}", e)))?;
    image::load_from_memory(&bytes)
        .map(|img| img.into_rgba8())
        .map_err(|e| GenerateError::BadResponse(format!("image field is not an image: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardElement;
    use crate::render::encode_png;

    #[test]
    fn empty_board_is_rejected_before_any_network_call() {
        let err = validate_board(&[]).unwrap_err();
        assert!(matches!(err, GenerateError::EmptyBoard));
        assert!(err.to_string().contains("at least one image"));

        let one = BoardElement::new("a.png", 0.0, 0.0, 10.0, 10.0);
        assert!(validate_board(&[one]).is_ok());
    }

    #[test]
    fn in_flight_guard_rejects_concurrent_requests() {
        let client = InpaintClient::new("http://localhost:0");

        let first = client.begin_flight().unwrap();
        assert!(client.is_in_flight());
        assert!(matches!(client.begin_flight(), Err(GenerateError::Busy)));

        drop(first);
        assert!(!client.is_in_flight());
        assert!(client.begin_flight().is_ok());
    }

    #[test]
    fn request_matches_the_wire_shape() {
        let request = InpaintRequest {
            base64_image: "QUJD".into(),
            prompt: "cozy reading corner".into(),
            negative_prompt: "text, watermark".into(),
            internal_model: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["base64_image"], "QUJD");
        assert_eq!(value["prompt"], "cozy reading corner");
        assert_eq!(value["negative_prompt"], "text, watermark");
        assert_eq!(value["internal_model"], true);
        assert_eq!(value.as_object().unwrap().len(), 4);
    }

    #[test]
    fn successful_response_decodes_to_pixels() {
        let img = image::RgbaImage::from_pixel(2, 3, image::Rgba([9, 9, 9, 255]));
        let png = encode_png(&img).unwrap();
        let body = serde_json::json!({ "image": crate::render::png_to_base64(&png) }).to_string();

        let out = decode_response(&body).unwrap();
        assert_eq!(out.dimensions(), (2, 3));
    }

    #[test]
    fn malformed_response_bodies_are_bad_responses() {
        assert!(matches!(
            decode_response("not json"),
            Err(GenerateError::BadResponse(_))
        ));
        assert!(matches!(
            decode_response(r#"{"image":"???"}"#),
            Err(GenerateError::BadResponse(_))
        ));
        assert!(matches!(
            decode_response(r#"{"image":"QUJD"}"#), // base64 but not an image
            Err(GenerateError::BadResponse(_))
        ));
    }
}
