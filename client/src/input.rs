//! Turning typed commands and bot choices into key codes

use rand::seq::SliceRandom;
use rand::Rng;
use shared::{KEY_LEFT, KEY_RIGHT, KEY_SPACE, KEY_UP};

/// Keys a bot picks from
pub const BOT_KEYS: [i32; 4] = [KEY_LEFT, KEY_RIGHT, KEY_UP, KEY_SPACE];

/// Maps a typed token to a key code.
///
/// Accepts `left`, `right`, `up`, `jump` (or their first letter) and raw
/// decimal codes.
pub fn parse_key(token: &str) -> Option<i32> {
    let token = token.trim().to_ascii_lowercase();
    match token.as_str() {
        "left" | "l" | "a" => Some(KEY_LEFT),
        "right" | "r" | "d" => Some(KEY_RIGHT),
        "up" | "u" | "w" => Some(KEY_UP),
        "jump" | "j" | "space" => Some(KEY_SPACE),
        other => other.parse().ok(),
    }
}

/// Picks a random movement key.
pub fn random_key<R: Rng + ?Sized>(rng: &mut R) -> i32 {
    BOT_KEYS.choose(rng).copied().unwrap_or(KEY_SPACE)
}
