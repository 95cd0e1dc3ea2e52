//! `$utils` helpers
//!
//! The IP lookups are fixed answers, not real database queries.

use std::io::Read;

use flate2::read::GzDecoder;

pub const GEOIP_COUNTRY: &str = "CN";
pub const IP_ASN: &str = "AS4134";
pub const IP_ASO: &str = "China Telecom";

pub fn geoip(_ip: &str) -> &'static str {
    GEOIP_COUNTRY
}

pub fn ipasn(_ip: &str) -> &'static str {
    IP_ASN
}

pub fn ipaso(_ip: &str) -> &'static str {
    IP_ASO
}

/// Inflate gzip data, returning the input unchanged if it is not gzip
pub fn ungzip(data: &[u8]) -> Vec<u8> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    match decoder.read_to_end(&mut out) {
        Ok(_) => out,
        Err(e) => {
            tracing::debug!("ungzip: input is not gzip ({}), returning as-is", e);
            data.to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_ungzip_inflates() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello loon").unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(ungzip(&compressed), b"hello loon");
    }

    #[test]
    fn test_ungzip_passthrough() {
        assert_eq!(ungzip(b"plain"), b"plain");
    }

    #[test]
    fn test_lookups_are_fixed() {
        assert_eq!(geoip("1.1.1.1"), "CN");
        assert_eq!(ipasn("8.8.8.8"), "AS4134");
        assert_eq!(ipaso(""), "China Telecom");
    }
}
