use serde::{Deserialize, Serialize};

/// One discovered RTSP endpoint and the outcome of attacking it.
///
/// Streams are produced by the engine and only ever forwarded by the server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stream {
    pub address: String,
    pub port: u16,
    pub route_found: bool,
    pub credentials_found: bool,
    pub route: String,
    pub username: String,
    pub password: String,
    pub device: String,
    pub available: bool,
}

impl Stream {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            available: true,
            ..Default::default()
        }
    }

    /// Both the route and the credentials are known.
    pub fn is_accessed(&self) -> bool {
        self.route_found && self.credentials_found
    }

    /// Full RTSP URL for the stream. Credentials are omitted until found.
    pub fn rtsp_url(&self) -> String {
        let route = self.route.trim_start_matches('/');
        if self.credentials_found {
            format!(
                "rtsp://{}:{}@{}:{}/{}",
                self.username, self.password, self.address, self.port, route
            )
        } else {
            format!("rtsp://{}:{}/{}", self.address, self.port, route)
        }
    }

    /// Web admin panel of the device, worth trying when the stream resisted.
    pub fn admin_panel_url(&self) -> String {
        format!("http://{}/", self.address)
    }
}
