//! Client identity resolution for new WebSocket sessions.

use std::net::IpAddr;

use uuid::Uuid;

const MAX_CLIENT_ID_LEN: usize = 128;

/// Whether `id` is an acceptable client identifier: 1 to 128 characters from
/// `[A-Za-z0-9._:-]`.
pub fn is_valid_client_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CLIENT_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b':' | b'-'))
}

/// Fresh identifier of the form `<peer-ip>-<uuid-v7>`, or a bare UUID when
/// the peer address is unknown.
pub fn generate_client_id(peer: Option<IpAddr>) -> String {
    let token = Uuid::now_v7();
    match peer {
        Some(ip) => format!("{ip}-{token}"),
        None => token.to_string(),
    }
}

/// Pick the client id for a new session.
///
/// Preference order: explicit query parameter, identity cookie, freshly
/// generated. Supplied ids failing [`is_valid_client_id`] are skipped. The
/// flag is `true` when the id was generated.
pub fn resolve_client_id(
    query: Option<&str>,
    cookie: Option<&str>,
    peer: Option<IpAddr>,
) -> (String, bool) {
    query
        .into_iter()
        .chain(cookie)
        .find(|id| is_valid_client_id(id))
        .map_or_else(|| (generate_client_id(peer), true), |id| (id.to_owned(), false))
}
