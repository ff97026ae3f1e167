use url::Url;

use crate::error::SourceError;

/// Validates a source locator before it is handed to the backend.
pub fn parse_locator(raw: &str) -> Result<Url, SourceError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| SourceError::InvalidLocator(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" | "ftp" => Ok(url),
        other => Err(SourceError::InvalidLocator(format!("{raw}: unsupported scheme {other}"))),
    }
}

/// Parses the backend base URL so relative endpoints join under it.
pub fn parse_base_url(raw: &str) -> Result<Url, SourceError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| SourceError::InvalidLocator(format!("{raw}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(SourceError::InvalidLocator(format!("{raw}: not a base URL")));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}
