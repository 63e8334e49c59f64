use url::Url;

/// Reads the `expires` query parameter of a resolved media URL.
///
/// Returns 0 when the URL does not parse or carries no usable expiry, which
/// the controller treats as "always needs a refresh".
pub fn expiry_from_url(media_url: &str) -> u64 {
    let Ok(url) = Url::parse(media_url) else {
        return 0;
    };

    url.query_pairs()
        .find(|(key, _)| key == "expires")
        .and_then(|(_, value)| value.parse::<u64>().ok())
        .unwrap_or(0)
}
