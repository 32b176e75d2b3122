use std::fmt;

use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue};

/// `ClientName`; header names travel lower-cased.
pub const CLIENT_NAME_HEADER: &str = "clientname";
pub const CLIENT_SECRET_HEADER: &str = "clientsecret";

/// Static client credentials sent with every request.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthHeaders {
    pub client_name: String,
    pub client_secret: Option<String>,
}

impl AuthHeaders {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            client_secret: None,
        }
    }

    pub fn with_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn to_header_map(&self) -> Result<HeaderMap, InvalidHeaderValue> {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_NAME_HEADER, HeaderValue::from_str(&self.client_name)?);
        if let Some(secret) = &self.client_secret {
            let mut value = HeaderValue::from_str(secret)?;
            value.set_sensitive(true);
            headers.insert(CLIENT_SECRET_HEADER, value);
        }
        Ok(headers)
    }
}

impl fmt::Debug for AuthHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthHeaders")
            .field("client_name", &self.client_name)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
