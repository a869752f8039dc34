//! DevTools Network Protocol Types
//!
//! Event payloads for the `Network` domain of the Chrome DevTools Protocol,
//! shaped the way mobile debugger frontends expect them.

use base64::Engine;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::identity::RequestId;
use crate::transport::{HttpRequest, HttpResponse};

/// Event method names emitted by the inspector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CdpMethod {
    #[serde(rename = "Network.requestWillBeSent")]
    RequestWillBeSent,
    #[serde(rename = "Network.requestWillBeSentExtraInfo")]
    RequestWillBeSentExtraInfo,
    #[serde(rename = "Network.responseReceived")]
    ResponseReceived,
    /// Vendor extension carrying the captured body inline
    #[serde(rename = "Expo(Network.receivedResponseBody)")]
    ReceivedResponseBody,
    #[serde(rename = "Network.loadingFinished")]
    LoadingFinished,
}

impl CdpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CdpMethod::RequestWillBeSent => "Network.requestWillBeSent",
            CdpMethod::RequestWillBeSentExtraInfo => "Network.requestWillBeSentExtraInfo",
            CdpMethod::ResponseReceived => "Network.responseReceived",
            CdpMethod::ReceivedResponseBody => "Expo(Network.receivedResponseBody)",
            CdpMethod::LoadingFinished => "Network.loadingFinished",
        }
    }
}

impl fmt::Display for CdpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted protocol message. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct CdpEvent {
    method: CdpMethod,
    params: CdpParams,
}

impl CdpEvent {
    pub fn request_will_be_sent(params: RequestWillBeSentParams) -> Self {
        Self {
            method: CdpMethod::RequestWillBeSent,
            params: CdpParams::RequestWillBeSent(params),
        }
    }

    pub fn request_will_be_sent_extra_info(params: RequestWillBeSentExtraInfoParams) -> Self {
        Self {
            method: CdpMethod::RequestWillBeSentExtraInfo,
            params: CdpParams::RequestWillBeSentExtraInfo(params),
        }
    }

    pub fn response_received(params: ResponseReceivedParams) -> Self {
        Self {
            method: CdpMethod::ResponseReceived,
            params: CdpParams::ResponseReceived(params),
        }
    }

    pub fn received_response_body(params: ReceivedResponseBodyParams) -> Self {
        Self {
            method: CdpMethod::ReceivedResponseBody,
            params: CdpParams::ReceivedResponseBody(params),
        }
    }

    pub fn loading_finished(params: LoadingFinishedParams) -> Self {
        Self {
            method: CdpMethod::LoadingFinished,
            params: CdpParams::LoadingFinished(params),
        }
    }

    pub fn method(&self) -> CdpMethod {
        self.method
    }

    pub fn params(&self) -> &CdpParams {
        &self.params
    }

    pub fn request_id(&self) -> &str {
        match &self.params {
            CdpParams::RequestWillBeSent(p) => &p.request_id,
            CdpParams::RequestWillBeSentExtraInfo(p) => &p.request_id,
            CdpParams::ResponseReceived(p) => &p.request_id,
            CdpParams::ReceivedResponseBody(p) => &p.request_id,
            CdpParams::LoadingFinished(p) => &p.request_id,
        }
    }

    /// Wire form: `{"method": ..., "params": {...}}`
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CdpParams {
    RequestWillBeSent(RequestWillBeSentParams),
    RequestWillBeSentExtraInfo(RequestWillBeSentExtraInfoParams),
    ResponseReceived(ResponseReceivedParams),
    ReceivedResponseBody(ReceivedResponseBodyParams),
    LoadingFinished(LoadingFinishedParams),
}

/// `Network.Request`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_data: Option<String>,
}

impl From<&HttpRequest> for CdpRequest {
    fn from(request: &HttpRequest) -> Self {
        Self {
            url: request.url.clone(),
            method: request.method.clone(),
            headers: request.headers.clone(),
            post_data: request.body.clone(),
        }
    }
}

/// `Network.Response`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpResponse {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub mime_type: String,
    pub encoded_data_length: u64,
}

impl CdpResponse {
    pub fn new(response: &HttpResponse, encoded_data_length: u64) -> Self {
        Self {
            url: response.url.clone(),
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            mime_type: response.mime_type(),
            encoded_data_length,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Initiator {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSentParams {
    pub request_id: String,
    pub loader_id: String,
    #[serde(rename = "documentURL")]
    pub document_url: String,
    pub request: CdpRequest,
    pub timestamp: f64,
    pub wall_time: f64,
    pub initiator: Initiator,
    pub redirect_has_extra_info: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_response: Option<CdpResponse>,
    pub referrer_policy: String,
    #[serde(rename = "type")]
    pub resource_type: String,
}

impl RequestWillBeSentParams {
    pub fn new(
        now: f64,
        request_id: RequestId,
        request: &HttpRequest,
        encoded_data_length: u64,
        redirect_response: Option<&HttpResponse>,
    ) -> Self {
        let redirect_response =
            redirect_response.map(|response| CdpResponse::new(response, encoded_data_length));
        Self {
            request_id: request_id.to_string(),
            loader_id: String::new(),
            document_url: "mobile".to_string(),
            request: CdpRequest::from(request),
            timestamp: now,
            wall_time: now,
            initiator: Initiator {
                kind: "script".to_string(),
            },
            redirect_has_extra_info: redirect_response.is_some(),
            redirect_response,
            referrer_policy: "no-referrer".to_string(),
            resource_type: "Other".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTiming {
    pub request_time: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSentExtraInfoParams {
    pub request_id: String,
    pub associated_cookies: Vec<serde_json::Value>,
    pub headers: BTreeMap<String, String>,
    pub connect_timing: ConnectTiming,
}

impl RequestWillBeSentExtraInfoParams {
    pub fn new(now: f64, request_id: RequestId, request: &HttpRequest) -> Self {
        Self {
            request_id: request_id.to_string(),
            associated_cookies: Vec::new(),
            headers: request.headers.clone(),
            connect_timing: ConnectTiming { request_time: now },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceivedParams {
    pub request_id: String,
    pub loader_id: String,
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub response: CdpResponse,
    pub has_extra_info: bool,
}

impl ResponseReceivedParams {
    pub fn new(
        now: f64,
        request_id: RequestId,
        response: &HttpResponse,
        encoded_data_length: u64,
    ) -> Self {
        Self {
            request_id: request_id.to_string(),
            loader_id: String::new(),
            timestamp: now,
            resource_type: "Other".to_string(),
            response: CdpResponse::new(response, encoded_data_length),
            has_extra_info: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedResponseBodyParams {
    pub request_id: String,
    pub body: String,
    pub base64_encoded: bool,
}

impl ReceivedResponseBodyParams {
    /// Text bodies travel as UTF-8, everything else base64-encoded
    pub fn new(request_id: RequestId, body: &[u8], is_text: bool) -> Self {
        let (body, base64_encoded) = if is_text {
            (String::from_utf8_lossy(body).into_owned(), false)
        } else {
            (base64::engine::general_purpose::STANDARD.encode(body), true)
        };
        Self {
            request_id: request_id.to_string(),
            body,
            base64_encoded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinishedParams {
    pub request_id: String,
    pub timestamp: f64,
    pub encoded_data_length: u64,
}

impl LoadingFinishedParams {
    pub fn new(now: f64, request_id: RequestId, encoded_data_length: u64) -> Self {
        Self {
            request_id: request_id.to_string(),
            timestamp: now,
            encoded_data_length,
        }
    }
}

/// Best-effort text classification from a declared content type.
///
/// `text/*` and `application/json` (parameters ignored) are text; anything
/// else, including a missing type, is binary.
pub fn is_text_content_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return false;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime.starts_with("text/") || mime == "application/json"
}

/// Current wall-clock time in seconds since the UNIX epoch
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
