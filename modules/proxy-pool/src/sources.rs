use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

pub const DEFAULT_FREE_SOURCES: &[&str] = &[
    "https://free-proxy-list.net/",
    "https://www.sslproxies.org/",
    "https://www.us-proxy.org/",
];

fn pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,3}(?:\.\d{1,3}){3}):(\d{1,5})\b").expect("pair regex"))
}

fn valid(ip: &str, port: &str) -> bool {
    ip.parse::<Ipv4Addr>().is_ok() && matches!(port.parse::<u32>(), Ok(p) if (1..=65535).contains(&p))
}

/// Extracts proxy addresses from a public list page. HTML tables (ip, port, .., https
/// in the seventh column) are read first; bare `ip:port` text is the fallback.
/// Output is deduplicated in page order.
pub fn parse_proxy_list(body: &str) -> Vec<String> {
    let mut out = table_rows(body);
    if out.is_empty() {
        for c in pair_re().captures_iter(body) {
            if valid(&c[1], &c[2]) {
                out.push(format!("http://{}:{}", &c[1], &c[2]));
            }
        }
    }
    dedupe(out)
}

fn table_rows(body: &str) -> Vec<String> {
    let (Ok(row_sel), Ok(cell_sel)) = (Selector::parse("tr"), Selector::parse("td")) else {
        return Vec::new();
    };
    let doc = Html::parse_document(body);
    doc.select(&row_sel)
        .filter_map(|row| {
            let cells: Vec<String> = row
                .select(&cell_sel)
                .map(|td| td.text().collect::<String>().trim().to_string())
                .collect();
            if cells.len() < 2 || !valid(&cells[0], &cells[1]) {
                return None;
            }
            let https = cells.get(6).map(|c| c.eq_ignore_ascii_case("yes")).unwrap_or(false);
            let scheme = if https { "https" } else { "http" };
            Some(format!("{scheme}://{}:{}", cells[0], cells[1]))
        })
        .collect()
}

pub(crate) fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|p| seen.insert(p.clone())).collect()
}

/// `host:port` gets an `http://` scheme; anything carrying a scheme is kept as is.
pub fn normalize_address(raw: &str) -> Option<String> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains("://") { Some(s.to_string()) } else { Some(format!("http://{s}")) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_table_rows_and_https_column() {
        let html = r#"<table><thead><tr><th>IP Address</th><th>Port</th></tr></thead><tbody>
            <tr><td>10.1.2.3</td><td>8080</td><td>IN</td><td>India</td><td>elite</td><td>no</td><td>yes</td><td>1 min</td></tr>
            <tr><td>10.1.2.4</td><td>3128</td><td>US</td><td>US</td><td>anon</td><td>no</td><td>no</td></tr>
            <tr><td>999.1.2.3</td><td>80</td></tr>
            <tr><td>10.1.2.5</td><td>70000</td></tr>
            <tr><td>10.1.2.3</td><td>8080</td><td></td><td></td><td></td><td></td><td>yes</td></tr>
        </tbody></table>"#;
        assert_eq!(parse_proxy_list(html), vec!["https://10.1.2.3:8080", "http://10.1.2.4:3128"]);
    }

    #[test]
    fn nested_markup_and_attributes_do_not_split_cells() {
        let html = r#"<table><tr data-note="a>b">
            <td><span class="ip"><b>10.9.8.7</b></span></td>
            <td title="port > 1024"><a href="/p">8888</a></td>
            <td>DE</td><td>Germany</td><td>elite</td><td>no</td><td><i>yes</i></td>
        </tr></table>"#;
        assert_eq!(parse_proxy_list(html), vec!["https://10.9.8.7:8888"]);
    }

    #[test]
    fn falls_back_to_plain_pairs() {
        let text = "10.0.0.1:80\nnoise 10.0.0.2:3128 more\n256.0.0.1:80\n10.0.0.1:80";
        assert_eq!(parse_proxy_list(text), vec!["http://10.0.0.1:80", "http://10.0.0.2:3128"]);
    }

    #[test]
    fn normalizes_bare_addresses() {
        assert_eq!(normalize_address(" 1.2.3.4:80 ").as_deref(), Some("http://1.2.3.4:80"));
        assert_eq!(normalize_address("socks5://u:p@h:1").as_deref(), Some("socks5://u:p@h:1"));
        assert_eq!(normalize_address("  "), None);
    }
}
