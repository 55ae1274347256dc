//! URL canonicalization: deriving a stable `server_key` from a request URL.
//!
//! Parsing is delegated to [`url::Url`] rather than hand-rolled, per the
//! crate's general policy of reusing a standard URL crate for RFC 3986
//! authority parsing.

use scheduler_macros::context;

/// Default port materialized for `https` when the URL omits one.
const DEFAULT_HTTPS_PORT: u16 = 443;
/// Default port materialized for `http` when the URL omits one.
const DEFAULT_HTTP_PORT: u16 = 80;

/// Returns `true` if `url` is a `data:` or `blob:` URI, which bypass the
/// scheduler entirely (no server key, no counters touched).
#[must_use]
pub fn is_data_or_blob_uri(url: &str) -> bool {
	let trimmed = url.trim_start();
	trimmed.starts_with("data:") || trimmed.starts_with("blob:")
}

/// Derives a canonical `host:port` server key for `url`.
///
/// If `url` has no scheme (a relative URL), it is resolved against `base`
/// first; if no `base` is configured, this is an error rather than a silent
/// guess, since there is no ambient "document location" in a non-browser
/// host.
///
/// # Errors
///
/// Returns an error if `url` cannot be parsed, or is schemeless with no
/// `base` supplied.
#[context("while deriving a server key for '{url}'")]
pub fn server_key_for(url: &str, base: Option<&url::Url>) -> anyhow::Result<String> {
	let parsed = parse_with_base(url, base)?;
	let host = parsed
		.host_str()
		.ok_or_else(|| anyhow::anyhow!("URL '{url}' has no host component"))?;
	let port = parsed.port().unwrap_or_else(|| default_port(parsed.scheme()));
	Ok(format!("{}:{port}", host.to_ascii_lowercase()))
}

fn parse_with_base(url: &str, base: Option<&url::Url>) -> anyhow::Result<url::Url> {
	match url::Url::parse(url) {
		Ok(parsed) => Ok(parsed),
		Err(url::ParseError::RelativeUrlWithoutBase) => {
			let base = base.ok_or_else(|| {
				anyhow::anyhow!("'{url}' is schemeless and no base URL was configured to resolve it against")
			})?;
			Ok(base.join(url)?)
		}
		Err(err) => Err(err.into()),
	}
}

fn default_port(scheme: &str) -> u16 {
	match scheme {
		"https" | "wss" => DEFAULT_HTTPS_PORT,
		_ => DEFAULT_HTTP_PORT,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn detects_data_uri() {
		assert!(is_data_or_blob_uri("data:text/plain;base64,aGVsbG8="));
		assert!(is_data_or_blob_uri("blob:https://example.com/abc"));
		assert!(!is_data_or_blob_uri("https://example.com/tile.glb"));
	}

	#[test]
	fn materializes_default_ports() {
		assert_eq!(
			server_key_for("https://api.example.com/tiles/0/0/0.glb", None).unwrap(),
			"api.example.com:443"
		);
		assert_eq!(
			server_key_for("http://api.example.com/tiles/0/0/0.glb", None).unwrap(),
			"api.example.com:80"
		);
	}

	#[test]
	fn preserves_explicit_port() {
		assert_eq!(
			server_key_for("https://api.example.com:8443/x", None).unwrap(),
			"api.example.com:8443"
		);
	}

	#[test]
	fn is_case_insensitive_on_host() {
		assert_eq!(
			server_key_for("https://API.Example.com/x", None).unwrap(),
			server_key_for("https://api.example.com/x", None).unwrap()
		);
	}

	#[test]
	fn resolves_relative_url_against_base() {
		let base = url::Url::parse("https://api.example.com/root/").unwrap();
		assert_eq!(
			server_key_for("tiles/0/0/0.glb", Some(&base)).unwrap(),
			"api.example.com:443"
		);
	}

	#[test]
	fn schemeless_without_base_is_an_error() {
		assert!(server_key_for("tiles/0/0/0.glb", None).is_err());
	}
}
