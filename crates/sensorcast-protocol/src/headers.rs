//! Header values shared by every gateway response.

/// Content type of a sensor stream: one JSON record per line.
pub const CONTENT_TYPE_NDJSON: &str = "application/x-ndjson";

/// Origin allowed to read gateway responses from a browser.
pub const ALLOW_ORIGIN_ANY: &str = "*";

/// Methods advertised in CORS preflight responses.
pub const ALLOWED_METHODS: &str = "GET, OPTIONS";
