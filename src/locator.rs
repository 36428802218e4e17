//! Maidenhead grid locator conversion.

use arrayvec::ArrayString;

pub type Locator = ArrayString<6>;

/// Six-character Maidenhead locator (field, square, subsquare) for a position.
///
/// Latitude and longitude are clamped just inside the valid range so the
/// poles and the antimeridian still map onto `R`/`X` fields.
#[must_use]
pub fn maidenhead(lat: f64, lon: f64) -> Locator {
    let lat = lat.clamp(-90.0, 89.999_999) + 90.0;
    let lon = lon.clamp(-180.0, 179.999_999) + 180.0;

    let field_lon = (lon / 20.0).floor();
    let field_lat = (lat / 10.0).floor();
    let square_lon = ((lon - field_lon * 20.0) / 2.0).floor();
    let square_lat = (lat - field_lat * 10.0).floor();
    let sub_lon = ((lon - (lon / 2.0).floor() * 2.0) * 12.0).floor();
    let sub_lat = ((lat - lat.floor()) * 24.0).floor();

    let chars = [
        (b'A' + field_lon as u8) as char,
        (b'A' + field_lat as u8) as char,
        (b'0' + square_lon as u8) as char,
        (b'0' + square_lat as u8) as char,
        (b'a' + sub_lon as u8) as char,
        (b'a' + sub_lat as u8) as char,
    ];

    let mut locator = Locator::new();
    for ch in chars {
        locator.push(ch);
    }
    locator
}

/// Accepts 4 or 6 character locators, case-insensitive in the subsquare.
#[must_use]
pub fn is_valid_locator(locator: &str) -> bool {
    let bytes = locator.as_bytes();
    if bytes.len() != 4 && bytes.len() != 6 {
        return false;
    }
    let field = bytes[..2].iter().all(|b| (b'A'..=b'R').contains(&b.to_ascii_uppercase()));
    let square = bytes[2..4].iter().all(u8::is_ascii_digit);
    let sub = bytes[4..].iter().all(|b| (b'a'..=b'x').contains(&b.to_ascii_lowercase()));
    field && square && sub
}
