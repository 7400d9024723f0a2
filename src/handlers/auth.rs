//! Room access-key enforcement (§4.1 "Access control").
//!
//! Every room-scoped endpoint except room creation requires the
//! `x-room-access-key` header to match the room's `accessKey`, compared in
//! constant time so the check can't be used as a timing oracle. Director
//! dashboard GET endpoints may instead resolve the room by its
//! `accessToken`, which carries no corresponding write permission.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::models::Room;
use crate::{AppError, Result};

pub const ACCESS_KEY_HEADER: &str = "x-room-access-key";

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

/// Returns `Ok(())` iff `headers` carry the access key matching `room`.
pub fn require_room_access_key(headers: &HeaderMap, room: &Room) -> Result<()> {
    let provided = header_value(headers, ACCESS_KEY_HEADER)
        .ok_or_else(|| AppError::AccessDenied("missing x-room-access-key header".to_string()))?;

    let matches: bool = provided.as_bytes().ct_eq(room.access_key.as_bytes()).into();
    if matches {
        Ok(())
    } else {
        Err(AppError::AccessDenied("invalid room access key".to_string()))
    }
}

/// Generates an unguessable room access key: 16 random bytes, hex-encoded.
pub fn generate_access_key() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
