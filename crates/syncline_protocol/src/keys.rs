//! Key helpers.
//!
//! Patch keys are `"/<table>/<id>"`; CVR keys drop the leading slash.

/// Sentinel key put after a `clear` so the client knows a full load happened.
pub const INIT_KEY: &str = "/init";

/// Builds `"/" + parts.join("/")`.
///
/// Used both for patch keys and for client scan prefixes / get paths.
pub fn key_path<S: AsRef<str>>(parts: &[S]) -> String {
    let mut path = String::new();
    for part in parts {
        path.push('/');
        path.push_str(part.as_ref());
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

/// External key of an entity row.
pub fn entity_key(table: &str, id: &str) -> String {
    format!("/{table}/{id}")
}

/// CVR key of an entity row.
pub fn cvr_key(table: &str, id: &str) -> String {
    format!("{table}/{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_paths() {
        assert_eq!(key_path(&["issue", "wrk_1"]), "/issue/wrk_1");
        assert_eq!(key_path::<&str>(&[]), "/");
        assert_eq!(entity_key("stage", "stg_1"), "/stage/stg_1");
        assert_eq!(cvr_key("stage", "stg_1"), "stage/stg_1");
    }
}
