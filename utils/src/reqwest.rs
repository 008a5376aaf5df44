use std::{fmt::Debug, time::Duration};

use once_cell::sync::Lazy;
use reqwest::{Client, Method, RequestBuilder};
use inflow_common::text::redact;
use serde::de::DeserializeOwned;
use url::Url;

use crate::serde::{SerdePathError, SerdeResponseParseAsync};

/// Provider requests are abandoned after this long.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest part of an error response body kept in the error.
const MAX_ERROR_BODY: usize = 512;

static CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqwestStage {
    Send,
    Status,
    DecodeText,
    Deserialise,
}

/// What was being requested, kept for error messages. Secrets registered
/// with [`Reqwest::secret`] are masked in `url`.
#[derive(Debug)]
pub struct ReqwestErrorContext {
    pub method: Method,
    pub url: String,
    pub query: Option<String>,
    pub json_body: Option<String>,
}

#[derive(Debug)]
pub enum ReqwestInnerError {
    Reqwest(reqwest::Error),
    /// The server answered with a non-success status.
    Status { code: u16, body: String },
    SerdePath(SerdePathError),
}

impl ReqwestInnerError {
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Reqwest(err) if err.is_connect())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Reqwest(err) if err.is_timeout())
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Reqwest(err) => err.status().map(|s| s.as_u16()),
            Self::Status { code, .. } => Some(*code),
            Self::SerdePath(_) => None,
        }
    }
}

/// Request builder on the shared client that records enough context to make
/// a failure understandable.
pub struct Reqwest {
    builder: RequestBuilder,
    context: ReqwestErrorContext,
}

impl Reqwest {
    fn new<U: ToString>(method: Method, url: U) -> crate::Result<Self> {
        let url = url
            .to_string()
            .parse::<Url>()
            .map_err(|err| crate::Error::InvalidUrl(err.to_string()))?;
        Ok(Self {
            builder: CLIENT.request(method.clone(), url.clone()),
            context: ReqwestErrorContext {
                method,
                url: url.to_string(),
                query: None,
                json_body: None,
            },
        })
    }

    pub fn get<U: ToString>(url: U) -> crate::Result<Self> {
        Self::new(Method::GET, url)
    }

    pub fn post<U: ToString>(url: U) -> crate::Result<Self> {
        Self::new(Method::POST, url)
    }

    /// Masks `secret` wherever it appears in the recorded url, for providers
    /// that take the API key as a path segment.
    pub fn secret(mut self, secret: &str) -> Self {
        self.context.url = redact(&self.context.url, secret);
        self
    }

    pub fn query<T: serde::Serialize + Debug>(mut self, query: &T) -> Self {
        self.context.query = Some(format!("{query:?}"));
        self.builder = self.builder.query(query);
        self
    }

    pub fn json_body<T: serde::Serialize + Debug>(mut self, json_body: &T) -> Self {
        self.context.json_body = Some(format!("{json_body:?}"));
        self.builder = self.builder.json(json_body);
        self
    }

    pub async fn receive_json<J: Debug + DeserializeOwned>(self) -> crate::Result<J> {
        let (text, context) = self.send().await?;

        text.as_str()
            .serde_parse_custom()
            .await
            .map_err(|err| fail(ReqwestStage::Deserialise, context, ReqwestInnerError::SerdePath(err)))
    }

    async fn send(self) -> crate::Result<(String, ReqwestErrorContext)> {
        let context = self.context;

        let response = match self.builder.send().await {
            Ok(response) => response,
            Err(err) if err.is_connect() => return Err(crate::Error::Internet(context.url)),
            Err(err) => {
                let inner = ReqwestInnerError::Reqwest(err.without_url());
                return Err(fail(ReqwestStage::Send, context, inner));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(body.char_floor(MAX_ERROR_BODY));
            let inner = ReqwestInnerError::Status {
                code: status.as_u16(),
                body,
            };
            return Err(fail(ReqwestStage::Status, context, inner));
        }

        match response.text().await {
            Ok(text) => Ok((text, context)),
            Err(err) => {
                let inner = ReqwestInnerError::Reqwest(err.without_url());
                Err(fail(ReqwestStage::DecodeText, context, inner))
            }
        }
    }
}

fn fail(stage: ReqwestStage, context: ReqwestErrorContext, inner: ReqwestInnerError) -> crate::Error {
    crate::Error::ReqwestFailed {
        stage,
        context: Box::new(context),
        inner,
    }
}

trait CharFloor {
    fn char_floor(&self, index: usize) -> usize;
}

impl CharFloor for String {
    /// Largest char boundary not after `index`.
    fn char_floor(&self, index: usize) -> usize {
        if index >= self.len() {
            return self.len();
        }
        (0..=index)
            .rev()
            .find(|i| self.is_char_boundary(*i))
            .unwrap_or(0)
    }
}
