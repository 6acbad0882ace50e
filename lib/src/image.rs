//! Construction of the fully qualified target image reference.

/// Where to pull the target image from, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImageTarget {
    /// Fully qualified image reference.
    pub(crate) reference: String,
    /// Whether TLS verification is enabled for the pull.
    pub(crate) tls_verify: bool,
}

impl ImageTarget {
    /// Compute the pull source for `image`. With a distribution port the
    /// image is served by an ephemeral registry on the default gateway;
    /// such registries are unauthenticated with at best a self-signed
    /// certificate, so TLS verification is disabled for that case and
    /// only that case.
    pub(crate) fn new(gateway: &str, dist_port: Option<&str>, image: &str) -> Self {
        match dist_port {
            Some(port) => Self {
                reference: format!("{gateway}:{port}/{image}"),
                tls_verify: false,
            },
            None => Self {
                reference: image.to_string(),
                tls_verify: true,
            },
        }
    }
}
