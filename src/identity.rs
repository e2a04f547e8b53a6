//! Identity embedding scheme.
//!
//! A principal is carried inside an issued certificate as two non-critical extensions that share
//! one object identifier (PKCS#9 unstructuredName). Their raw values are `UID:<value>` and
//! `DID:<value>`; only the prefix tells the two entries apart.

/// Object identifier both identity extensions are filed under.
pub const IDENTITY_OID: &str = "1.2.840.113549.1.9.2";

pub const UID_PREFIX: &str = "UID";
pub const DID_PREFIX: &str = "DID";

/// Extension value carrying the user identifier.
pub fn uid_value(uid: &str) -> String {
    format!("{}:{}", UID_PREFIX, uid)
}

/// Extension value carrying the device identifier.
pub fn did_value(did: &str) -> String {
    format!("{}:{}", DID_PREFIX, did)
}

/// Split a `KEY:VALUE` extension value. The value must be non-empty.
pub fn parse_value(raw: &[u8]) -> Option<(&str, &str)> {
    let text = std::str::from_utf8(raw).ok()?;
    let (key, value) = text.split_once(':')?;
    if value.is_empty() || value.contains('\n') {
        return None;
    }
    Some((key, value))
}

/// Fold a sequence of raw extension values into `(uid, did)`.
///
/// Entries with other prefixes are ignored; a later entry wins over an earlier one. Missing
/// parts come back as empty strings.
pub fn collect_identity<'a, I>(values: I) -> (String, String)
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut uid = String::new();
    let mut did = String::new();
    for raw in values {
        match parse_value(raw) {
            Some((UID_PREFIX, value)) => uid = value.to_string(),
            Some((DID_PREFIX, value)) => did = value.to_string(),
            _ => {}
        }
    }
    (uid, did)
}
