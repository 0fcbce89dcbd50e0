use axum::http::header;
use axum::http::request::Parts;
use rand::Rng;

/// Set-Cookie value binding a browser to its console.
pub fn console_cookie(name: &str, console_id: &str) -> String {
    format!("{}={}; HttpOnly; SameSite=Strict; Path=/", name, console_id)
}

pub fn clear_console_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

pub fn get_cookie_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name && !val.is_empty() {
                Some(val)
            } else {
                None
            }
        })
}

/// Generate a cryptographically random 32-byte hex token.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with_cookie(cookie: &str) -> Parts {
        let (parts, _) = Request::builder()
            .header(header::COOKIE, cookie)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn finds_named_cookie_among_others() {
        let parts = parts_with_cookie("theme=dark; pawscan_console=abc123; other=1");
        assert_eq!(get_cookie_value(&parts, "pawscan_console"), Some("abc123"));
        assert_eq!(get_cookie_value(&parts, "missing"), None);
    }

    #[test]
    fn cleared_cookie_reads_as_absent() {
        let parts = parts_with_cookie("pawscan_console=");
        assert_eq!(get_cookie_value(&parts, "pawscan_console"), None);
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        assert!(clear_console_cookie("pawscan_console").contains("Max-Age=0"));
        assert!(console_cookie("pawscan_console", "abc").starts_with("pawscan_console=abc;"));
    }
}
