/// Deep-link identity extraction.
///
/// Two historical forms are accepted: a fragment like `#user=Example` and a
/// query parameter like `?user=Example+Name` (anywhere in the query string,
/// `+` standing for a space). Pure parsing, no validation beyond shape.
pub fn identity_from_link(link: &str) -> Option<String> {
    if let Some((_, fragment)) = link.split_once('#') {
        if let Some(raw) = fragment.strip_prefix("user=") {
            if !raw.is_empty() {
                return Some(percent_decode(raw));
            }
        }
    }

    let query = query_part(link)?;
    for pair in query.split('&') {
        if let Some(raw) = pair.strip_prefix("user=") {
            if !raw.is_empty() {
                return Some(percent_decode(&raw.replace('+', " ")));
            }
        }
    }
    None
}

fn query_part(link: &str) -> Option<&str> {
    let (_, after) = link.split_once('?')?;
    Some(match after.split_once('#') {
        Some((query, _)) => query,
        None => after,
    })
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    // A link with broken escapes is passed through undecoded.
    String::from_utf8(out).unwrap_or_else(|_| raw.to_string())
}

fn hex_digit(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}
