use crate::UrlError;
use url::Url;

/// Query parameters that only identify a referral campaign
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "msclkid"];

/// Normalizes a URL to its canonical form for deduplication
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Reject anything but http/https
/// 3. Lowercase the scheme and host (done by the parser)
/// 4. Strip the scheme's default port (done by the parser)
/// 5. Remove dot segments; empty path becomes `/` (done by the parser)
/// 6. Remove the fragment
/// 7. Drop tracking query parameters (`utm_*`, click ids) and sort the rest
///
/// Path case and trailing slashes are preserved: servers may treat them as
/// distinct resources.
///
/// # Examples
///
/// ```
/// use harvest_frontier::url::normalize_url;
///
/// let url = normalize_url("HTTPS://Example.COM:443/a/../b?utm_source=x#top").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/b");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlError::MissingDomain),
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut()
                .clear()
                .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
    }

    Ok(url)
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
