use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::sync::Arc;

use crate::core::geo::TileIndex;
use crate::core::projection::ProjectionKind;
use crate::Result;

/// Stable identifier of a map provider, used as the cache namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Form of the id that is safe to use as a single path component.
    ///
    /// Letters, digits, `-` and non-leading `.` pass through; every other
    /// byte becomes `_xx` in hex, so distinct ids never share a directory.
    pub fn path_component(&self) -> String {
        if self.0.is_empty() {
            return "_".to_string();
        }
        let mut out = String::with_capacity(self.0.len());
        for (i, b) in self.0.bytes().enumerate() {
            if b.is_ascii_alphanumeric() || b == b'-' || (b == b'.' && i > 0) {
                out.push(b as char);
            } else {
                let _ = write!(out, "_{b:02x}");
            }
        }
        out
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Anything that can produce raw tile payloads.
///
/// The engine only relies on this capability set; how bytes are obtained
/// (HTTP, a local archive, a generator) is up to the implementation.
/// Implementations are called from loader worker threads and must enforce
/// their own timeouts.
pub trait MapProvider: Send + Sync {
    fn id(&self) -> &ProviderId;

    fn name(&self) -> &str;

    fn projection_kind(&self) -> ProjectionKind {
        ProjectionKind::SphericalMercator
    }

    fn min_zoom(&self) -> u8 {
        0
    }

    fn max_zoom(&self) -> u8 {
        19
    }

    /// Raw payload of `index`, or `Ok(None)` when the provider has no data
    /// there. Errors are treated as retryable fetch failures.
    fn fetch_tile(&self, index: TileIndex) -> Result<Option<Vec<u8>>>;

    /// Providers drawn beneath this one, bottom first
    fn overlays(&self) -> Vec<Arc<dyn MapProvider>> {
        Vec::new()
    }
}

/// The full bottom-to-top layer stack of `provider`
pub fn layer_stack(provider: &Arc<dyn MapProvider>) -> Vec<Arc<dyn MapProvider>> {
    let mut layers = provider.overlays();
    layers.push(Arc::clone(provider));
    layers
}

#[cfg(feature = "http")]
pub use self::http::UrlTemplateProvider;

#[cfg(feature = "http")]
mod http {
    use once_cell::sync::Lazy;
    use reqwest::blocking::Client;
    use reqwest::StatusCode;
    use std::sync::Arc;
    use std::time::Duration;

    use super::{MapProvider, ProviderId};
    use crate::core::geo::TileIndex;
    use crate::core::projection::ProjectionKind;
    use crate::{MapError, Result};

    /// Shared blocking HTTP client. Public tile servers reject requests
    /// without a User-Agent.
    pub(crate) static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
        Client::builder()
            .user_agent(concat!("mapcore/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(16)
            .build()
            .expect("failed to build reqwest blocking client")
    });

    /// Provider for `{z}/{x}/{y}` style tile servers.
    ///
    /// `{s}` in the template is replaced by one of the subdomains, picked
    /// from the tile position so that requests spread across hosts.
    pub struct UrlTemplateProvider {
        id: ProviderId,
        name: String,
        template: String,
        subdomains: Vec<String>,
        projection: ProjectionKind,
        min_zoom: u8,
        max_zoom: u8,
        overlays: Vec<Arc<dyn MapProvider>>,
    }

    impl UrlTemplateProvider {
        pub fn new(id: impl Into<ProviderId>, name: impl Into<String>, template: impl Into<String>) -> Self {
            Self {
                id: id.into(),
                name: name.into(),
                template: template.into(),
                subdomains: Vec::new(),
                projection: ProjectionKind::SphericalMercator,
                min_zoom: 0,
                max_zoom: 19,
                overlays: Vec::new(),
            }
        }

        pub fn openstreetmap() -> Self {
            Self::new(
                "openstreetmap",
                "OpenStreetMap",
                "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png",
            )
            .with_subdomains(&["a", "b", "c"])
        }

        pub fn with_subdomains(mut self, subdomains: &[&str]) -> Self {
            self.subdomains = subdomains.iter().map(|s| s.to_string()).collect();
            self
        }

        pub fn with_projection(mut self, projection: ProjectionKind) -> Self {
            self.projection = projection;
            self
        }

        pub fn with_zoom_range(mut self, min_zoom: u8, max_zoom: u8) -> Self {
            self.min_zoom = min_zoom;
            self.max_zoom = max_zoom;
            self
        }

        pub fn with_overlay(mut self, below: Arc<dyn MapProvider>) -> Self {
            self.overlays.push(below);
            self
        }

        pub fn url(&self, index: TileIndex) -> String {
            let mut url = self
                .template
                .replace("{z}", &index.zoom.to_string())
                .replace("{x}", &index.x.to_string())
                .replace("{y}", &index.y.to_string());
            if !self.subdomains.is_empty() {
                let idx = (index.x + index.y).rem_euclid(self.subdomains.len() as i64) as usize;
                url = url.replace("{s}", &self.subdomains[idx]);
            }
            url
        }
    }

    impl MapProvider for UrlTemplateProvider {
        fn id(&self) -> &ProviderId {
            &self.id
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn projection_kind(&self) -> ProjectionKind {
            self.projection
        }

        fn min_zoom(&self) -> u8 {
            self.min_zoom
        }

        fn max_zoom(&self) -> u8 {
            self.max_zoom
        }

        fn fetch_tile(&self, index: TileIndex) -> Result<Option<Vec<u8>>> {
            let url = self.url(index);
            log::debug!("GET {}", url);
            let resp = HTTP_CLIENT.get(&url).send()?;
            match resp.status() {
                StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => return Ok(None),
                status if !status.is_success() => {
                    return Err(MapError::FetchFailed(format!("HTTP {} for {}", status, url)));
                }
                _ => {}
            }
            let bytes = resp.bytes()?;
            if bytes.is_empty() {
                Ok(None)
            } else {
                Ok(Some(bytes.to_vec()))
            }
        }

        fn overlays(&self) -> Vec<Arc<dyn MapProvider>> {
            self.overlays.clone()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_url_template_expansion() {
            let osm = UrlTemplateProvider::openstreetmap();
            assert_eq!(
                osm.url(TileIndex::new(10, 686, 323)),
                "https://b.tile.openstreetmap.org/10/686/323.png"
            );
            assert_eq!(
                osm.url(TileIndex::new(10, 686, 324)),
                "https://c.tile.openstreetmap.org/10/686/324.png"
            );

            let plain = UrlTemplateProvider::new("plain", "Plain", "http://tiles/{z}/{x}/{y}.jpg");
            assert_eq!(plain.url(TileIndex::new(0, 0, 0)), "http://tiles/0/0/0.jpg");
        }
    }
}
