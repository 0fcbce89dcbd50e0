use axum::extract::Path;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use rust_embed::Embed;

#[derive(Embed)]
#[folder = "assets/"]
struct StaticAssets;

fn etag(hash: [u8; 32]) -> String {
    let digest: String = hash[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("\"{}\"", digest)
}

/// GET /assets/{*path}: stylesheet and friends, embedded at build time.
pub async fn serve(Path(path): Path<String>, headers: HeaderMap) -> Response {
    let Some(file) = StaticAssets::get(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let tag = etag(file.metadata.sha256_hash());
    let cached = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == tag);
    if cached {
        return (StatusCode::NOT_MODIFIED, [(header::ETAG, tag)]).into_response();
    }

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.as_ref().to_string()),
            (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
            (header::ETAG, tag),
        ],
        file.data.into_owned(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stylesheet_is_embedded() {
        assert!(StaticAssets::get("css/admin.css").is_some());
        assert!(StaticAssets::get("css/missing.css").is_none());
    }

    #[test]
    fn etag_is_quoted_hex() {
        let tag = etag([0xab; 32]);
        assert_eq!(tag, "\"abababababababab\"");
    }
}
