//! Per-country block list sources.
//!
//! Upstream publishes one plain-text file per country and address family,
//! one CIDR literal per line. Malformed lines are skipped; a failed request
//! is an error for the whole country.

use ipnet::IpNet;
use std::io::{BufRead, BufReader};
use std::time::Duration;

use crate::config::GeolocationConfig;
use crate::error::{Error, Result};
use crate::table::Family;

/// Anything that can produce the ranges of one country and family.
pub trait RangeSource: Send + Sync {
    /// Fetch all ranges for `country` in `family`.
    ///
    /// Returns [`Error::Fetch`] when the list cannot be retrieved.
    fn fetch(&self, country: &str, family: Family) -> Result<Vec<IpNet>>;
}

/// Ranges read from one list plus the number of rejected lines.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedRanges {
    pub ranges: Vec<IpNet>,
    pub skipped: usize,
}

/// Parse a newline-delimited CIDR list.
///
/// Blank lines and `#` comments are ignored. Lines that are not a CIDR of
/// `family` are counted in [`ParsedRanges::skipped`]. Only read errors fail.
pub fn parse_ranges<R: BufRead>(mut reader: R, family: Family) -> std::io::Result<ParsedRanges> {
    let mut parsed = ParsedRanges::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line.parse::<IpNet>() {
            Ok(net) if Family::of(&net) == family => parsed.ranges.push(net.trunc()),
            _ => parsed.skipped += 1,
        }
    }

    Ok(parsed)
}

/// Downloads block lists over HTTP.
///
/// The list for a country lives at `{base_url}/{ipv4|ipv6}/{code}.netset`.
pub struct HttpSource {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpSource {
    /// Create a source with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a source from the service configuration.
    pub fn from_config(config: &GeolocationConfig) -> Result<Self> {
        Self::new(&config.base_url, config.request_timeout)
    }

    /// URL of the list for one country and family.
    pub fn url(&self, country: &str, family: Family) -> String {
        format!("{}/{}/{}.netset", self.base_url, family, country)
    }
}

impl RangeSource for HttpSource {
    fn fetch(&self, country: &str, family: Family) -> Result<Vec<IpNet>> {
        let url = self.url(country, family);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::fetch(country, family, e))?;

        if response.status() != 200 {
            return Err(Error::fetch(
                country,
                family,
                format!("HTTP {}", response.status()),
            ));
        }

        let parsed = parse_ranges(BufReader::new(response), family)
            .map_err(|e| Error::fetch(country, family, format!("read failed: {}", e)))?;

        if parsed.skipped > 0 {
            log::debug!(
                "Skipped {} malformed {} lines for {}",
                parsed.skipped,
                family,
                country
            );
        }

        Ok(parsed.ranges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Mock upstream running on its own tokio runtime.
    ///
    /// `HttpSource` is blocking, so requests are made from plain threads
    /// while the runtime workers drive the server.
    struct Upstream {
        server: MockServer,
        runtime: tokio::runtime::Runtime,
    }

    impl Upstream {
        fn start() -> Self {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            let server = runtime.block_on(MockServer::start());
            Self { server, runtime }
        }

        fn serve(&self, route: &str, response: ResponseTemplate) {
            self.runtime.block_on(
                Mock::given(method("GET"))
                    .and(path(route))
                    .respond_with(response)
                    .mount(&self.server),
            );
        }

        fn fetch(
            &self,
            timeout: Duration,
            country: &'static str,
            family: Family,
        ) -> Result<Vec<IpNet>> {
            let base_url = self.server.uri();
            thread::spawn(move || HttpSource::new(&base_url, timeout)?.fetch(country, family))
                .join()
                .unwrap()
        }
    }

    #[test]
    fn test_parse_skips_malformed_line() {
        let body = "1.0.0.0/24\n1.0.1.0/24\n1.0.2.0/23\n1.0.4.0/22\nnot-a-cidr\n\
                    1.0.8.0/21\n1.0.16.0/20\n1.0.32.0/19\n1.0.64.0/18\n1.0.128.0/17\n";
        let parsed = parse_ranges(body.as_bytes(), Family::V4).unwrap();

        assert_eq!(parsed.ranges.len(), 9);
        assert_eq!(parsed.skipped, 1);
    }

    #[test]
    fn test_parse_ignores_blank_and_comment_lines() {
        let body = "# generated list\n\n  2.16.0.0/13  \r\n\n";
        let parsed = parse_ranges(body.as_bytes(), Family::V4).unwrap();

        assert_eq!(parsed.ranges, vec!["2.16.0.0/13".parse::<IpNet>().unwrap()]);
        assert_eq!(parsed.skipped, 0);
    }

    #[test]
    fn test_parse_rejects_wrong_family() {
        let body = "2001:200::/23\n1.1.1.0/24\n";

        let v6 = parse_ranges(body.as_bytes(), Family::V6).unwrap();
        assert_eq!(v6.ranges.len(), 1);
        assert_eq!(v6.skipped, 1);

        let v4 = parse_ranges(body.as_bytes(), Family::V4).unwrap();
        assert_eq!(v4.ranges.len(), 1);
        assert_eq!(v4.skipped, 1);
    }

    #[test]
    fn test_parse_truncates_and_tolerates_bad_bytes() {
        let body: &[u8] = b"5.5.5.5/16\n\xff\xfe/8\n1.2.3.4/33\n1.2.3.4";
        let parsed = parse_ranges(body, Family::V4).unwrap();

        assert_eq!(parsed.ranges, vec!["5.5.0.0/16".parse::<IpNet>().unwrap()]);
        assert_eq!(parsed.skipped, 3);
    }

    #[test]
    fn test_url_layout() {
        let source = HttpSource::new("https://example.com/blocks/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            source.url("us", Family::V4),
            "https://example.com/blocks/ipv4/us.netset"
        );
        assert_eq!(
            source.url("eu", Family::V6),
            "https://example.com/blocks/ipv6/eu.netset"
        );
    }

    #[test]
    fn test_http_fetch_success() {
        let upstream = Upstream::start();
        upstream.serve(
            "/ipv4/us.netset",
            ResponseTemplate::new(200).set_body_string("1.1.1.0/24\ngarbage\n8.8.8.0/24\n"),
        );

        let ranges = upstream
            .fetch(Duration::from_secs(5), "us", Family::V4)
            .unwrap();
        assert_eq!(
            ranges,
            vec![
                "1.1.1.0/24".parse::<IpNet>().unwrap(),
                "8.8.8.0/24".parse::<IpNet>().unwrap(),
            ]
        );
    }

    #[test]
    fn test_http_fetch_bad_status() {
        let upstream = Upstream::start();
        upstream.serve(
            "/ipv6/xx.netset",
            ResponseTemplate::new(404).set_body_string("missing"),
        );

        match upstream.fetch(Duration::from_secs(5), "xx", Family::V6) {
            Err(Error::Fetch {
                country, family, reason,
            }) => {
                assert_eq!(country, "xx");
                assert_eq!(family, Family::V6);
                assert!(reason.contains("404"));
            }
            other => panic!("expected fetch error, got {:?}", other),
        }
    }

    #[test]
    fn test_http_fetch_unknown_path_fails() {
        let upstream = Upstream::start();
        upstream.serve(
            "/ipv4/us.netset",
            ResponseTemplate::new(200).set_body_string("1.1.1.0/24\n"),
        );

        // Unmatched requests get wiremock's default 404
        assert!(matches!(
            upstream.fetch(Duration::from_secs(5), "ca", Family::V4),
            Err(Error::Fetch { .. })
        ));
    }

    #[test]
    fn test_http_fetch_timeout() {
        let upstream = Upstream::start();
        upstream.serve(
            "/ipv4/us.netset",
            ResponseTemplate::new(200)
                .set_body_string("1.1.1.0/24\n")
                .set_delay(Duration::from_secs(3)),
        );

        assert!(matches!(
            upstream.fetch(Duration::from_millis(200), "us", Family::V4),
            Err(Error::Fetch { .. })
        ));
    }

    #[test]
    fn test_http_fetch_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let source = HttpSource::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        assert!(source.fetch("us", Family::V4).is_err());
    }
}
